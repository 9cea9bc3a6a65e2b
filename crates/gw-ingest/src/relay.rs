//! ---
//! gw_section: "05-networking-external-interfaces"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Fire-and-forget forwarding of raw frames to the persistence backend."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gw_common::RelayConfig;
use gw_metrics::{IngestMetrics, RelayOutcome};
use gw_msg::{RawFrame, Topic};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

/// Errors surfaced by a [`PersistenceSink`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("backend responded with status {status}")]
    Status { status: u16 },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Destination of relayed records.
#[async_trait]
pub trait PersistenceSink: Send + Sync + 'static {
    /// Store one `"<topic> | <payload>"` value.
    async fn append(&self, value: &str) -> Result<(), RelayError>;
}

/// Value stored by the backend for a frame.
pub fn relay_value(topic: &str, payload: &str) -> String {
    format!("{topic} | {}", payload.trim())
}

/// A relay call that did not succeed, reported to the failure logger.
#[derive(Debug, Clone)]
pub struct RelayFailure {
    pub topic: Topic,
    pub error: RelayError,
}

/// What happened to a frame handed to [`Relay::relay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDispatch {
    /// A detached task owns the request now.
    Dispatched,
    /// Relay disabled or topic out of scope.
    Skipped,
    /// In-flight limit reached.
    Dropped,
}

pub struct Relay {
    sink: Option<Arc<dyn PersistenceSink>>,
    topic_prefixes: Vec<String>,
    timeout: Duration,
    permits: Arc<Semaphore>,
    failures: mpsc::UnboundedSender<RelayFailure>,
    metrics: IngestMetrics,
}

impl Relay {
    /// Build a relay and spawn its failure logger. Requires a Tokio runtime.
    pub fn spawn(config: &RelayConfig, sink: Arc<dyn PersistenceSink>, metrics: IngestMetrics) -> Self {
        let (failures, rx) = mpsc::unbounded_channel();
        tokio::spawn(log_failures(rx));
        Self {
            sink: config.enabled.then_some(sink),
            topic_prefixes: config.topic_prefixes.clone(),
            timeout: config.timeout,
            permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            failures,
            metrics,
        }
    }

    /// A relay that skips every frame.
    pub fn disabled(metrics: IngestMetrics) -> Self {
        let (failures, _) = mpsc::unbounded_channel();
        Self {
            sink: None,
            topic_prefixes: Vec::new(),
            timeout: Duration::ZERO,
            permits: Arc::new(Semaphore::new(1)),
            failures,
            metrics,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn in_scope(&self, topic: &str) -> bool {
        self.topic_prefixes.is_empty()
            || self
                .topic_prefixes
                .iter()
                .any(|prefix| topic.starts_with(prefix.as_str()))
    }

    /// Hand a frame to a detached task. Never waits on the backend.
    pub fn relay(&self, frame: &RawFrame) -> RelayDispatch {
        let Some(sink) = self.sink.as_ref().filter(|_| self.in_scope(&frame.topic)) else {
            self.metrics.record_relay(RelayOutcome::Skipped);
            return RelayDispatch::Skipped;
        };
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            debug!(topic = %frame.topic, "relay in-flight limit reached; frame dropped");
            self.metrics.record_relay(RelayOutcome::Dropped);
            return RelayDispatch::Dropped;
        };

        let sink = Arc::clone(sink);
        let value = relay_value(&frame.topic, &frame.text());
        let topic = frame.topic.clone();
        let timeout = self.timeout;
        let failures = self.failures.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, sink.append(&value)).await {
                Ok(result) => result,
                Err(_) => Err(RelayError::Timeout(timeout)),
            };
            drop(permit);
            match outcome {
                Ok(()) => metrics.record_relay(RelayOutcome::Sent),
                Err(error) => {
                    metrics.record_relay(RelayOutcome::Failed);
                    let _ = failures.send(RelayFailure { topic, error });
                }
            }
        });
        RelayDispatch::Dispatched
    }
}

async fn log_failures(mut rx: mpsc::UnboundedReceiver<RelayFailure>) {
    while let Some(failure) = rx.recv().await {
        warn!(topic = %failure.topic, error = %failure.error, "backend relay failed");
    }
}
