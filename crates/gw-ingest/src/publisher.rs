//! ---
//! gw_section: "02-messaging-ipc-data-model"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Versioned immutable snapshots fanned out over a watch channel."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gw_msg::ConnectionState;
use serde::Serialize;
use tokio::sync::watch;

use crate::events::EventLog;
use crate::store::BufferSnapshot;

/// Consistent view of buffers, connection state and event log.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub version: u64,
    pub generated_at: DateTime<Utc>,
    pub connection_state: ConnectionState,
    pub buffers: BufferSnapshot,
    pub raw_buffers: BufferSnapshot,
    pub event_log: EventLog,
}

impl Snapshot {
    /// Version 0, published before any event is processed.
    pub fn initial(buffers: BufferSnapshot, raw_buffers: BufferSnapshot) -> Self {
        Self {
            version: 0,
            generated_at: Utc::now(),
            connection_state: ConnectionState::Disconnected,
            buffers,
            raw_buffers,
            event_log: Arc::new(VecDeque::new()),
        }
    }

    /// Copy restricted to `topics`; event log and state are kept.
    pub fn restricted_to<'a, I>(&self, topics: I) -> Snapshot
    where
        I: IntoIterator<Item = &'a str> + Clone,
    {
        let keep = |topic: &str| topics.clone().into_iter().any(|wanted| wanted == topic);
        Snapshot {
            buffers: self
                .buffers
                .iter()
                .filter(|(topic, _)| keep(topic.as_str()))
                .map(|(topic, buffer)| (topic.clone(), Arc::clone(buffer)))
                .collect(),
            raw_buffers: self
                .raw_buffers
                .iter()
                .filter(|(topic, _)| keep(topic.as_str()))
                .map(|(topic, buffer)| (topic.clone(), Arc::clone(buffer)))
                .collect(),
            ..self.clone()
        }
    }
}

/// Writer side; owned by the ingestion task.
#[derive(Debug)]
pub struct SnapshotPublisher {
    tx: watch::Sender<Arc<Snapshot>>,
    version: u64,
}

impl SnapshotPublisher {
    pub fn new(initial: Snapshot) -> Self {
        let version = initial.version;
        let (tx, _) = watch::channel(Arc::new(initial));
        Self { tx, version }
    }

    /// Publish a new version built from the given parts.
    pub fn publish(
        &mut self,
        connection_state: ConnectionState,
        buffers: BufferSnapshot,
        raw_buffers: BufferSnapshot,
        event_log: EventLog,
    ) -> Arc<Snapshot> {
        self.version += 1;
        let snapshot = Arc::new(Snapshot {
            version: self.version,
            generated_at: Utc::now(),
            connection_state,
            buffers,
            raw_buffers,
            event_log,
        });
        self.tx.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn latest(&self) -> Arc<Snapshot> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> SnapshotSubscriber {
        SnapshotSubscriber {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only consumer handle.
#[derive(Debug, Clone)]
pub struct SnapshotSubscriber {
    rx: watch::Receiver<Arc<Snapshot>>,
}

impl SnapshotSubscriber {
    /// Latest published snapshot; does not mark it as seen.
    pub fn latest(&self) -> Arc<Snapshot> {
        Arc::clone(&self.rx.borrow())
    }

    /// Latest published snapshot, marked as seen.
    pub fn mark_seen(&mut self) -> Arc<Snapshot> {
        Arc::clone(&self.rx.borrow_and_update())
    }

    /// Wait for a version newer than the last one seen. `None` once the
    /// publisher is gone. Intermediate versions may be skipped.
    pub async fn changed(&mut self) -> Option<Arc<Snapshot>> {
        self.rx.changed().await.ok()?;
        Some(Arc::clone(&self.rx.borrow_and_update()))
    }
}
