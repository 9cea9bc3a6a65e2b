//! ---
//! gw_section: "15-testing-qa-runbook"
//! gw_subsection: "integration-tests"
//! gw_type: "test"
//! gw_scope: "code"
//! gw_description: "Scrapes the metrics exporter over HTTP."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::net::SocketAddr;

use gw_metrics::{new_registry, spawn_http_server, DaemonMetrics, IngestMetrics};
use gw_msg::ConnectionState;

#[tokio::test]
async fn metrics_endpoint_serves_registered_families() -> anyhow::Result<()> {
    let registry = new_registry();
    let daemon = DaemonMetrics::new(registry.clone())?;
    daemon.inc_start();
    daemon.set_build_info("0.1.0", "debug");
    let ingest = IngestMetrics::new(registry.clone())?;
    ingest.record_frame("factory/gearbox1/out1/rpm");
    ingest.set_connection_state(ConnectionState::Connected);

    let server = spawn_http_server(registry, SocketAddr::from(([127, 0, 0, 1], 0)))?;
    let body = reqwest::get(format!("http://{}/metrics", server.addr()))
        .await?
        .text()
        .await?;

    assert!(body.contains("gearwatchd_starts_total 1"));
    assert!(body.contains("gearwatch_frames_total{topic=\"factory/gearbox1/out1/rpm\"} 1"));
    assert!(body.contains("gearwatch_connection_state{state=\"connected\"} 1"));

    server.shutdown().await?;
    Ok(())
}
