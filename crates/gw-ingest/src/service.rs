//! ---
//! gw_section: "01-core-functionality"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Ingestion reactor: applies transport events to buffers, log, relay and snapshots."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::Utc;
use gw_common::AppConfig;
use gw_metrics::{DropReason, IngestMetrics};
use gw_msg::{ConnectionState, NormalizedRecord, RawFrame, RecordValue, TransportEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::events::EventLogExtractor;
use crate::pipeline::Pipeline;
use crate::publisher::{Snapshot, SnapshotPublisher, SnapshotSubscriber};
use crate::relay::Relay;
use crate::store::BufferStore;

/// Single writer of every piece of ingestion state.
pub struct IngestService {
    pipeline: Pipeline,
    store: BufferStore,
    extractor: EventLogExtractor,
    relay: Relay,
    publisher: SnapshotPublisher,
    metrics: IngestMetrics,
    state: ConnectionState,
}

impl IngestService {
    pub fn new(config: &AppConfig, relay: Relay, metrics: IngestMetrics) -> Self {
        let pipeline = Pipeline::from_config(config);
        let store = BufferStore::from_pipeline(&pipeline);
        let publisher = SnapshotPublisher::new(Snapshot::initial(store.snapshot(), store.raw_snapshot()));
        Self {
            extractor: EventLogExtractor::new(&config.event_log),
            pipeline,
            store,
            relay,
            publisher,
            metrics,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn subscribe(&self) -> SnapshotSubscriber {
        self.publisher.subscribe()
    }

    pub fn latest(&self) -> Arc<Snapshot> {
        self.publisher.latest()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// Apply one event and publish the resulting snapshot.
    pub fn handle_event(&mut self, event: TransportEvent) -> Arc<Snapshot> {
        match event {
            TransportEvent::State(state) => self.on_state(state),
            TransportEvent::Frame(frame) => self.on_frame(frame),
        }
        self.publish()
    }

    fn on_state(&mut self, state: ConnectionState) {
        debug!(from = %self.state, to = %state, "applying connection state");
        self.state = state;
        self.metrics.set_connection_state(state);
    }

    fn on_frame(&mut self, frame: RawFrame) {
        let topic = frame.topic.as_str();
        self.metrics.record_frame(topic);
        let now = Utc::now();
        let parsed = self.pipeline.on_raw_frame(&frame, now);
        trace!(topic, lines = parsed.lines.len(), records = parsed.records.len(), "frame parsed");

        if self.store.is_buffered(topic) {
            if parsed.rejected > 0 {
                debug!(topic, rejected = parsed.rejected, "dropped unparsable lines");
                self.metrics.record_dropped(topic, DropReason::Parse, parsed.rejected);
            }
            self.metrics.record_records(topic, parsed.records.len());
            for line in &parsed.lines {
                self.store.append_raw(NormalizedRecord {
                    topic: parsed.topic.clone(),
                    value: RecordValue::Text(line.clone()),
                    observed_at: now,
                });
            }
            for record in parsed.records {
                self.store.append(record);
            }
        } else if !parsed.lines.is_empty() {
            debug!(topic, "frame on unconfigured topic not buffered");
            self.metrics
                .record_dropped(topic, DropReason::UnknownTopic, parsed.lines.len());
        }

        for line in &parsed.lines {
            if let Some(entry) = self.extractor.scan(topic, line, now) {
                info!(topic, sequence = entry.sequence, message = %entry.message, "event logged");
                self.metrics.record_event_log_entry();
            }
        }

        self.relay.relay(&frame);
    }

    fn publish(&mut self) -> Arc<Snapshot> {
        let snapshot = self.publisher.publish(
            self.state,
            self.store.snapshot(),
            self.store.raw_snapshot(),
            self.extractor.entries(),
        );
        self.metrics.set_snapshot_version(snapshot.version);
        snapshot
    }

    /// Process events in order until every sender is dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<TransportEvent>) -> Self {
        info!(topics = self.store.snapshot().len(), relay = self.relay.is_enabled(), "ingestion service running");
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        info!(version = self.publisher.version(), "ingestion service drained");
        self
    }

    /// Run on a dedicated task.
    pub fn spawn(self, events: mpsc::Receiver<TransportEvent>) -> JoinHandle<IngestService> {
        tokio::spawn(self.run(events))
    }
}
