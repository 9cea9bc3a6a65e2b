//! ---
//! gw_section: "15-testing-qa-runbook"
//! gw_subsection: "integration-tests"
//! gw_type: "test"
//! gw_scope: "code"
//! gw_description: "REST and WebSocket snapshot surfaces against a live ingestion service."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::str::FromStr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gw_common::AppConfig;
use gw_ingest::{IngestService, Relay};
use gw_metrics::IngestMetrics;
use gw_msg::{ConnectionState, RawFrame, TransportEvent};
use gw_net::{HealthResponse, SnapshotApiBuilder, TopicDescriptor, TopicSummary};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

const CONFIG: &str = r#"
[topics."factory/gearbox1/input/rpm"]
label = "Input"

[topics."factory/gearbox1/out1/rpm"]
label = "Output 1"
capacity = 3
"#;

fn service() -> (IngestService, AppConfig) {
    let config = AppConfig::from_str(CONFIG).expect("valid config");
    let metrics = IngestMetrics::detached().expect("metrics");
    let service = IngestService::new(&config, Relay::disabled(metrics.clone()), metrics);
    (service, config)
}

fn frame(topic: &str, payload: &str) -> TransportEvent {
    TransportEvent::Frame(RawFrame::new(topic, payload.to_owned()))
}

async fn next_json<S>(socket: &mut S) -> Value
where
    S: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let message = timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("message before timeout")
        .expect("stream open")
        .expect("valid frame");
    match message {
        WsMessage::Text(text) => serde_json::from_str(&text).expect("json payload"),
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn rest_endpoints_reflect_latest_snapshot() -> anyhow::Result<()> {
    let (mut service, config) = service();
    let handle = SnapshotApiBuilder::new("127.0.0.1:0".parse()?, service.subscribe())
        .with_topics(TopicDescriptor::from_config(&config))
        .spawn()
        .await?;
    let base = format!("http://{}", handle.local_addr());

    service.handle_event(TransportEvent::State(ConnectionState::Connected));
    service.handle_event(frame("factory/gearbox1/out1/rpm", "1500\n1510"));

    let health: HealthResponse = reqwest::get(format!("{base}/health")).await?.json().await?;
    assert_eq!(health.status, "ok");
    assert_eq!(health.connection, ConnectionState::Connected);
    assert_eq!(health.version, 2);

    let snapshot: Value = reqwest::get(format!("{base}/api/snapshot")).await?.json().await?;
    assert_eq!(snapshot["buffers"]["factory/gearbox1/out1/rpm"][1]["value"], json!(1510.0));
    assert_eq!(snapshot["connection_state"], "connected");

    let topics: Vec<TopicSummary> = reqwest::get(format!("{base}/api/topics")).await?.json().await?;
    assert_eq!(topics.len(), 2);
    assert_eq!(topics[0].descriptor.label.as_deref(), Some("Input"));
    assert_eq!(topics[0].len, 0);
    assert_eq!(topics[1].descriptor.capacity, 3);
    assert_eq!(topics[1].len, 2);
    assert_eq!(topics[1].latest, Some(gw_msg::RecordValue::Number(1510.0)));

    handle.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn websocket_pushes_filtered_snapshots() -> anyhow::Result<()> {
    let (mut service, _config) = service();
    let handle = SnapshotApiBuilder::new("127.0.0.1:0".parse()?, service.subscribe())
        .spawn()
        .await?;
    let url = format!("ws://{}/ws", handle.local_addr());
    let (mut socket, _response) = connect_async(&url).await?;

    let initial = next_json(&mut socket).await;
    assert_eq!(initial["version"], 0);
    assert_eq!(initial["buffers"].as_object().map(|b| b.len()), Some(2));

    socket
        .send(WsMessage::Text(
            json!({"action": "subscribe", "topics": ["factory/gearbox1/out1/rpm"]}).to_string(),
        ))
        .await?;
    let filtered = next_json(&mut socket).await;
    let keys: Vec<&String> = filtered["buffers"].as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["factory/gearbox1/out1/rpm"]);

    service.handle_event(frame("factory/gearbox1/out1/rpm", "900"));
    let pushed = next_json(&mut socket).await;
    assert_eq!(pushed["version"], 1);
    assert_eq!(pushed["buffers"]["factory/gearbox1/out1/rpm"][0]["value"], json!(900.0));
    assert!(pushed["buffers"].get("factory/gearbox1/input/rpm").is_none());

    socket
        .send(WsMessage::Text(json!({"action": "unsubscribe_all"}).to_string()))
        .await?;
    let everything = next_json(&mut socket).await;
    assert_eq!(everything["buffers"].as_object().map(|b| b.len()), Some(2));

    socket.send(WsMessage::Text("not json".into())).await?;
    let error = next_json(&mut socket).await;
    assert_eq!(error["error"], "invalid command");

    drop(service);
    handle.shutdown().await?;
    Ok(())
}
