//! ---
//! gw_section: "03-persistence-logging"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Metrics collection and export utilities."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use gw_msg::ConnectionState;
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Address the exporter is bound to (resolved when port 0 was requested).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "gearwatchd_starts_total",
            "Total number of times the GearWatch daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "gearwatchd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "gearwatchd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, profile])
            .set(1.0);
    }
}

/// Why a payload line did not reach a topic buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The topic parser rejected the line.
    Parse,
    /// The topic is not in the configured table.
    UnknownTopic,
}

impl DropReason {
    fn as_str(&self) -> &'static str {
        match self {
            DropReason::Parse => "parse",
            DropReason::UnknownTopic => "unknown_topic",
        }
    }
}

/// Result of handing a frame to the backend relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Sent,
    Failed,
    /// In-flight limit exhausted.
    Dropped,
    /// Topic outside the relay scope or relay disabled.
    Skipped,
}

impl RelayOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            RelayOutcome::Sent => "sent",
            RelayOutcome::Failed => "failed",
            RelayOutcome::Dropped => "dropped",
            RelayOutcome::Skipped => "skipped",
        }
    }
}

/// Counters and gauges for the ingestion path.
#[derive(Clone, Debug)]
pub struct IngestMetrics {
    registry: SharedRegistry,
    frames: IntCounterVec,
    records: IntCounterVec,
    dropped_lines: IntCounterVec,
    event_log_entries: IntCounter,
    relay: IntCounterVec,
    connection_state: IntGaugeVec,
    reconnects: IntCounter,
    snapshot_version: IntGauge,
}

impl IngestMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let frames = IntCounterVec::new(
            Opts::new("gearwatch_frames_total", "Frames received from the broker by topic"),
            &["topic"],
        )?;
        registry.register(Box::new(frames.clone()))?;

        let records = IntCounterVec::new(
            Opts::new(
                "gearwatch_records_total",
                "Normalized records appended to topic buffers",
            ),
            &["topic"],
        )?;
        registry.register(Box::new(records.clone()))?;

        let dropped_lines = IntCounterVec::new(
            Opts::new(
                "gearwatch_dropped_lines_total",
                "Payload lines that did not produce a buffered record",
            ),
            &["topic", "reason"],
        )?;
        registry.register(Box::new(dropped_lines.clone()))?;

        let event_log_entries = IntCounter::with_opts(Opts::new(
            "gearwatch_event_log_entries_total",
            "Keyword matches appended to the event log",
        ))?;
        registry.register(Box::new(event_log_entries.clone()))?;

        let relay = IntCounterVec::new(
            Opts::new(
                "gearwatch_relay_total",
                "Backend relay attempts by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(relay.clone()))?;

        let connection_state = IntGaugeVec::new(
            Opts::new(
                "gearwatch_connection_state",
                "Indicator (0/1) of the current broker connection state",
            ),
            &["state"],
        )?;
        registry.register(Box::new(connection_state.clone()))?;

        let reconnects = IntCounter::with_opts(Opts::new(
            "gearwatch_reconnects_total",
            "Transitions into the reconnecting state",
        ))?;
        registry.register(Box::new(reconnects.clone()))?;

        let snapshot_version = IntGauge::with_opts(Opts::new(
            "gearwatch_snapshot_version",
            "Version of the most recently published snapshot",
        ))?;
        registry.register(Box::new(snapshot_version.clone()))?;

        let metrics = Self {
            registry,
            frames,
            records,
            dropped_lines,
            event_log_entries,
            relay,
            connection_state,
            reconnects,
            snapshot_version,
        };
        metrics.set_connection_state(ConnectionState::Disconnected);
        Ok(metrics)
    }

    /// Metrics bound to a private registry, for components run without an exporter.
    pub fn detached() -> Result<Self> {
        Self::new(new_registry())
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_frame(&self, topic: &str) {
        self.frames.with_label_values(&[topic]).inc();
    }

    pub fn record_records(&self, topic: &str, count: usize) {
        self.records.with_label_values(&[topic]).inc_by(count as u64);
    }

    pub fn record_dropped(&self, topic: &str, reason: DropReason, count: usize) {
        self.dropped_lines
            .with_label_values(&[topic, reason.as_str()])
            .inc_by(count as u64);
    }

    pub fn record_event_log_entry(&self) {
        self.event_log_entries.inc();
    }

    pub fn record_relay(&self, outcome: RelayOutcome) {
        self.relay.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn set_connection_state(&self, current: ConnectionState) {
        for state in ConnectionState::ALL {
            let gauge = self.connection_state.with_label_values(&[state.as_str()]);
            gauge.set(if state == current { 1 } else { 0 });
        }
        if current == ConnectionState::Reconnecting {
            self.reconnects.inc();
        }
    }

    pub fn set_snapshot_version(&self, version: u64) {
        self.snapshot_version.set(version as i64);
    }

    pub fn relay_count(&self, outcome: RelayOutcome) -> u64 {
        self.relay.with_label_values(&[outcome.as_str()]).get()
    }

    pub fn dropped_count(&self, topic: &str, reason: DropReason) -> u64 {
        self.dropped_lines
            .with_label_values(&[topic, reason.as_str()])
            .get()
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.get()
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_gauge_is_one_hot() {
        let metrics = IngestMetrics::detached().unwrap();
        metrics.set_connection_state(ConnectionState::Connected);
        metrics.set_connection_state(ConnectionState::Reconnecting);

        let gauge = |state: ConnectionState| {
            metrics
                .connection_state
                .with_label_values(&[state.as_str()])
                .get()
        };
        assert_eq!(gauge(ConnectionState::Reconnecting), 1);
        assert_eq!(gauge(ConnectionState::Connected), 0);
        assert_eq!(metrics.reconnect_count(), 1);
    }

    #[test]
    fn registering_twice_on_one_registry_fails() {
        let registry = new_registry();
        IngestMetrics::new(registry.clone()).unwrap();
        assert!(IngestMetrics::new(registry).is_err());
    }

    #[test]
    fn drop_and_relay_counters_are_labelled() {
        let metrics = IngestMetrics::detached().unwrap();
        metrics.record_dropped("a/b", DropReason::Parse, 2);
        metrics.record_relay(RelayOutcome::Dropped);
        assert_eq!(metrics.dropped_count("a/b", DropReason::Parse), 2);
        assert_eq!(metrics.dropped_count("a/b", DropReason::UnknownTopic), 0);
        assert_eq!(metrics.relay_count(RelayOutcome::Dropped), 1);
    }
}
