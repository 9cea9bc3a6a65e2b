//! ---
//! gw_section: "15-testing-qa-runbook"
//! gw_subsection: "integration-tests"
//! gw_type: "test"
//! gw_scope: "code"
//! gw_description: "Broker link through ingestion, relay and snapshot API in one process."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use gw_backend::BackendClient;
use gw_common::AppConfig;
use gw_ingest::{IngestService, Relay, Snapshot, SnapshotSubscriber};
use gw_metrics::IngestMetrics;
use gw_msg::{BrokerConnection, ConnectionSettings, ConnectionState, InMemoryLink, RecordValue};
use gw_net::SnapshotApiBuilder;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const INPUT: &str = "factory/gearbox1/input/rpm";
const OUT1: &str = "factory/gearbox1/out1/rpm";
const STATUS: &str = "factory/gearbox1/status";
const EVENTS: &str = "factory/gearbox1/events";

fn config(backend: SocketAddr) -> AppConfig {
    let raw = format!(
        r#"
[broker]
reconnect_interval_ms = 200

[buffers]
default_capacity = 5

[topics."{INPUT}"]
[topics."{OUT1}"]

[topics."{STATUS}"]
parser = "status"
retain_raw = true

[topics."{EVENTS}"]
parser = "text"

[relay]
base_url = "http://{backend}"
timeout_secs = 2
"#
    );
    AppConfig::from_str(&raw).expect("valid config")
}

#[derive(Clone, Default)]
struct Stored(Arc<Mutex<Vec<String>>>);

impl Stored {
    fn values(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

async fn spawn_backend(stored: Stored) -> anyhow::Result<SocketAddr> {
    async fn store(State(stored): State<Stored>, Json(body): Json<Value>) -> StatusCode {
        if let Some(value) = body["value"].as_str() {
            stored.0.lock().unwrap().push(value.to_owned());
        }
        StatusCode::CREATED
    }
    let app = Router::new()
        .route("/gear_value_view/", post(store))
        .with_state(stored);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    Ok(addr)
}

async fn wait_for<F>(subscriber: &mut SnapshotSubscriber, mut done: F) -> Arc<Snapshot>
where
    F: FnMut(&Snapshot) -> bool,
{
    let current = subscriber.mark_seen();
    if done(&current) {
        return current;
    }
    timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = subscriber.changed().await.expect("publisher alive");
            if done(&snapshot) {
                return snapshot;
            }
        }
    })
    .await
    .expect("snapshot condition before timeout")
}

async fn wait_until<F: FnMut() -> bool>(mut done: F) {
    timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition before timeout")
}

fn numbers(snapshot: &Snapshot, topic: &str) -> Vec<f64> {
    snapshot.buffers[topic]
        .iter()
        .filter_map(|record| record.value.as_number())
        .collect()
}

#[tokio::test]
async fn frames_flow_from_link_to_snapshot_and_backend() -> anyhow::Result<()> {
    let stored = Stored::default();
    let backend = spawn_backend(stored.clone()).await?;
    let config = config(backend);

    let metrics = IngestMetrics::detached()?;
    let client = BackendClient::from_config(&config.relay)?;
    let relay = Relay::spawn(&config.relay, Arc::new(client), metrics.clone());
    let service = IngestService::new(&config, relay, metrics.clone());
    let mut subscriber = service.subscribe();

    let (events_tx, events_rx) = mpsc::channel(config.broker.event_capacity);
    let ingest = service.spawn(events_rx);
    let (link, handle) = InMemoryLink::new();
    let connection = BrokerConnection::new(link, ConnectionSettings::from_config(&config), events_tx);
    connection.start();

    wait_for(&mut subscriber, |s| s.connection_state == ConnectionState::Connected).await;
    wait_until(|| handle.journal().sessions.first().map(|s| s.len()) == Some(4)).await;

    for value in ["10", "12", "9", "7", "15", "20"] {
        assert!(handle.publish(OUT1, value.to_owned()));
    }
    handle.publish(OUT1, "abc".to_owned());
    handle.publish(STATUS, "R=10.0, Y=20.0, B=0.1, C=3\nR=11, Y=21, B=0.2".to_owned());
    handle.publish(EVENTS, "Activated".to_owned());

    let snapshot = wait_for(&mut subscriber, |s| !s.event_log.is_empty()).await;
    assert_eq!(numbers(&snapshot, OUT1), vec![12.0, 9.0, 7.0, 15.0, 20.0]);
    assert!(snapshot.buffers[INPUT].is_empty());

    let status = &snapshot.buffers[STATUS];
    assert_eq!(status.len(), 2);
    assert_eq!(status[0].value.field("C"), Some(3.0));
    assert_eq!(status[1].value.field("C"), Some(0.0));
    assert_eq!(status[1].value.field("R"), Some(11.0));
    assert_eq!(snapshot.raw_buffers[STATUS].len(), 2);

    assert_eq!(snapshot.event_log[0].topic, EVENTS);
    assert_eq!(snapshot.event_log[0].message, "Activated");
    assert_eq!(snapshot.buffers[EVENTS][0].value, RecordValue::Text("Activated".into()));

    // Every frame reaches the backend, including the one that failed to parse.
    wait_until(|| stored.values().len() == 9).await;
    let values = stored.values();
    assert!(values.contains(&format!("{OUT1} | abc")));
    assert!(values.contains(&format!("{STATUS} | R=10.0, Y=20.0, B=0.1, C=3\nR=11, Y=21, B=0.2")));
    wait_until(|| metrics.relay_count(gw_metrics::RelayOutcome::Sent) == 9).await;

    connection.stop().await;
    connection.stop().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(handle.journal().disconnects, 1);
    drop(connection);

    let service = ingest.await?;
    assert_eq!(service.connection_state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn snapshot_api_serves_live_ingestion() -> anyhow::Result<()> {
    let mut config = config("127.0.0.1:9".parse()?);
    config.relay.enabled = false;
    let metrics = IngestMetrics::detached()?;
    let service = IngestService::new(&config, Relay::disabled(metrics.clone()), metrics);
    let mut subscriber = service.subscribe();
    let api = SnapshotApiBuilder::new("127.0.0.1:0".parse()?, service.subscribe())
        .spawn()
        .await?;

    let (events_tx, events_rx) = mpsc::channel(16);
    let ingest = service.spawn(events_rx);
    let (link, handle) = InMemoryLink::new();
    let connection = BrokerConnection::new(link, ConnectionSettings::from_config(&config), events_tx);
    connection.start();
    wait_for(&mut subscriber, |s| s.connection_state == ConnectionState::Connected).await;

    handle.publish(INPUT, "1480\n1490".to_owned());
    wait_for(&mut subscriber, |s| s.buffers[INPUT].len() == 2).await;

    let body: Value = reqwest::get(format!("http://{}/api/snapshot", api.local_addr()))
        .await?
        .json()
        .await?;
    assert_eq!(body["connection_state"], "connected");
    assert_eq!(body["buffers"][INPUT][1]["value"], 1490.0);

    connection.stop().await;
    drop(connection);
    ingest.await?;
    api.shutdown().await?;
    Ok(())
}
