//! ---
//! gw_section: "02-messaging-ipc-data-model"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Connection supervisor: lifecycle state machine, reconnect and resubscribe."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use gw_common::AppConfig;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::link::BrokerLink;
use crate::{ConnectionState, LinkError, Topic, TransportEvent};

/// Static inputs of the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Topic filters subscribed on every entry into `Connected`.
    pub topics: Vec<Topic>,
    /// Fixed delay between reconnect attempts.
    pub reconnect_interval: Duration,
}

impl ConnectionSettings {
    /// Derive settings from the application configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            topics: config.topic_names(),
            reconnect_interval: config.broker.reconnect_interval,
        }
    }
}

enum Slot<L> {
    Idle(L),
    Running {
        shutdown: watch::Sender<bool>,
        task: JoinHandle<L>,
    },
    // Only observed while `stop` is joining or after a panicked task.
    Vacant,
}

/// Owns a [`BrokerLink`] and drives it through the connection lifecycle.
///
/// State transitions and frames are delivered in order on the channel passed
/// to [`BrokerConnection::new`].
pub struct BrokerConnection<L: BrokerLink> {
    settings: Arc<ConnectionSettings>,
    events: mpsc::Sender<TransportEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    slot: Mutex<Slot<L>>,
}

impl<L: BrokerLink> BrokerConnection<L> {
    /// Wrap `link`; nothing happens until [`BrokerConnection::start`].
    pub fn new(link: L, settings: ConnectionSettings, events: mpsc::Sender<TransportEvent>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            settings: Arc::new(settings),
            events,
            state: Arc::new(state),
            slot: Mutex::new(Slot::Idle(link)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Spawn the connection task. Calling it while running is a no-op.
    pub fn start(&self) {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Vacant) {
            Slot::Idle(link) => {
                let (shutdown, shutdown_rx) = watch::channel(false);
                let lifecycle = Lifecycle {
                    current: ConnectionState::Disconnected,
                    state: Arc::clone(&self.state),
                    events: self.events.clone(),
                };
                info!(link = link.name(), topics = self.settings.topics.len(), "starting broker connection");
                let task = tokio::spawn(run_connection(
                    link,
                    Arc::clone(&self.settings),
                    lifecycle,
                    shutdown_rx,
                ));
                *slot = Slot::Running { shutdown, task };
            }
            running @ Slot::Running { .. } => {
                debug!("broker connection already running");
                *slot = running;
            }
            Slot::Vacant => warn!("broker connection unavailable; start ignored"),
        }
    }

    /// Close the link and wait for the task to settle in `Disconnected`.
    /// Safe in any state; repeated calls do nothing.
    pub async fn stop(&self) {
        let taken = std::mem::replace(&mut *self.slot.lock(), Slot::Vacant);
        match taken {
            Slot::Running { shutdown, task } => {
                let _ = shutdown.send(true);
                match task.await {
                    Ok(link) => *self.slot.lock() = Slot::Idle(link),
                    Err(err) => {
                        error!(error = %err, "broker connection task failed");
                        self.state.send_replace(ConnectionState::Disconnected);
                    }
                }
            }
            other => {
                debug!("broker connection not running; stop ignored");
                *self.slot.lock() = other;
            }
        }
    }
}

struct Lifecycle {
    current: ConnectionState,
    state: Arc<watch::Sender<ConnectionState>>,
    events: mpsc::Sender<TransportEvent>,
}

impl Lifecycle {
    /// Returns false once the consumer is gone.
    async fn transition(&mut self, next: ConnectionState) -> bool {
        if self.current == next {
            return true;
        }
        info!(from = %self.current, to = %next, "connection state transition");
        self.current = next;
        self.state.send_replace(next);
        self.events.send(TransportEvent::State(next)).await.is_ok()
    }
}

enum Pump {
    Shutdown,
    ConsumerGone,
    Lost(LinkError),
    Fatal(LinkError),
}

async fn subscribe_all<L: BrokerLink>(link: &mut L, topics: &[Topic]) {
    for topic in topics {
        match link.subscribe(topic).await {
            Ok(()) => debug!(topic = %topic, "subscribed"),
            Err(err) => warn!(topic = %topic, error = %err, "subscription failed"),
        }
    }
}

async fn pump_frames<L: BrokerLink>(
    link: &mut L,
    events: &mpsc::Sender<TransportEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Pump {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => return Pump::Shutdown,
            frame = link.next_frame() => match frame {
                Ok(frame) => {
                    if events.send(TransportEvent::Frame(frame)).await.is_err() {
                        return Pump::ConsumerGone;
                    }
                }
                Err(err) if err.is_fatal() => return Pump::Fatal(err),
                Err(err) => return Pump::Lost(err),
            },
        }
    }
}

async fn run_connection<L: BrokerLink>(
    mut link: L,
    settings: Arc<ConnectionSettings>,
    mut lifecycle: Lifecycle,
    mut shutdown: watch::Receiver<bool>,
) -> L {
    let mut attempt = ConnectionState::Connecting;
    'session: loop {
        if !lifecycle.transition(attempt).await {
            break 'session;
        }
        let connected = tokio::select! {
            biased;
            _ = shutdown.changed() => break 'session,
            result = link.connect() => result,
        };

        let failure = match connected {
            Ok(()) => {
                if !lifecycle.transition(ConnectionState::Connected).await {
                    break 'session;
                }
                subscribe_all(&mut link, &settings.topics).await;
                match pump_frames(&mut link, &lifecycle.events, &mut shutdown).await {
                    Pump::Shutdown | Pump::ConsumerGone => break 'session,
                    Pump::Lost(err) => {
                        link.disconnect().await;
                        err
                    }
                    Pump::Fatal(err) => err,
                }
            }
            Err(err) => err,
        };

        if failure.is_fatal() {
            error!(error = %failure, "broker rejected session; automatic retry stopped");
            if lifecycle.transition(ConnectionState::Error).await {
                // Parked until stop().
                let _ = shutdown.changed().await;
            }
            break 'session;
        }

        warn!(error = %failure, retry_in = ?settings.reconnect_interval, "broker link lost");
        attempt = ConnectionState::Reconnecting;
        if !lifecycle.transition(attempt).await {
            break 'session;
        }
        tokio::select! {
            biased;
            _ = shutdown.changed() => break 'session,
            _ = tokio::time::sleep(settings.reconnect_interval) => {}
        }
    }

    link.disconnect().await;
    lifecycle.transition(ConnectionState::Disconnected).await;
    info!("broker connection stopped");
    link
}
