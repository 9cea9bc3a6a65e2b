//! ---
//! gw_section: "05-networking-external-interfaces"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "HTTP server exposing health, snapshot and topic summaries."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use gw_common::{AppConfig, ParserKind};
use gw_ingest::{Snapshot, SnapshotSubscriber};
use gw_msg::{ConnectionState, RecordValue};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::websocket;

/// Static description of a configured topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicDescriptor {
    pub topic: String,
    pub label: Option<String>,
    pub parser: ParserKind,
    pub capacity: usize,
}

impl TopicDescriptor {
    pub fn from_config(config: &AppConfig) -> Vec<Self> {
        config
            .topics
            .iter()
            .map(|(topic, topic_config)| TopicDescriptor {
                topic: topic.clone(),
                label: topic_config.label.clone(),
                parser: topic_config.parser,
                capacity: config.capacity_for(topic),
            })
            .collect()
    }
}

/// Row of `GET /api/topics`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicSummary {
    #[serde(flatten)]
    pub descriptor: TopicDescriptor,
    pub len: usize,
    pub latest: Option<RecordValue>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub connection: ConnectionState,
    pub version: u64,
}

pub(crate) struct ApiState {
    pub(crate) snapshots: SnapshotSubscriber,
    pub(crate) topics: Vec<TopicDescriptor>,
}

/// Builder used to configure and spawn the snapshot API server.
pub struct SnapshotApiBuilder {
    listen: SocketAddr,
    snapshots: SnapshotSubscriber,
    topics: Vec<TopicDescriptor>,
}

impl SnapshotApiBuilder {
    pub fn new(listen: SocketAddr, snapshots: SnapshotSubscriber) -> Self {
        Self {
            listen,
            snapshots,
            topics: Vec::new(),
        }
    }

    /// Topic metadata reported by `/api/topics`.
    pub fn with_topics(mut self, topics: Vec<TopicDescriptor>) -> Self {
        self.topics = topics;
        self
    }

    /// Spawn the server and return a handle that can be awaited for shutdown.
    pub async fn spawn(self) -> anyhow::Result<SnapshotApiHandle> {
        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "snapshot api listening");

        let state = Arc::new(ApiState {
            snapshots: self.snapshots,
            topics: self.topics,
        });
        let router = Router::new()
            .route("/health", get(get_health))
            .route("/api/snapshot", get(get_snapshot))
            .route("/api/topics", get(get_topics))
            .route("/ws", get(websocket::upgrade_handler))
            .with_state(state);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "snapshot api exited with error");
            }
        });

        Ok(SnapshotApiHandle {
            address: local_addr,
            task,
            shutdown: shutdown_tx,
        })
    }
}

/// Handle returned from [`SnapshotApiBuilder::spawn`].
pub struct SnapshotApiHandle {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl SnapshotApiHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Request graceful shutdown and wait for the server task to finish.
    /// Open WebSocket sessions end when the snapshot publisher goes away.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(join) => Err(anyhow::anyhow!(join)),
        }
    }
}

async fn get_health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let snapshot = state.snapshots.latest();
    Json(HealthResponse {
        status: "ok".into(),
        connection: snapshot.connection_state,
        version: snapshot.version,
    })
}

async fn get_snapshot(State(state): State<Arc<ApiState>>) -> Json<Arc<Snapshot>> {
    Json(state.snapshots.latest())
}

async fn get_topics(State(state): State<Arc<ApiState>>) -> Json<Vec<TopicSummary>> {
    let snapshot = state.snapshots.latest();
    let summaries = state
        .topics
        .iter()
        .map(|descriptor| {
            let buffer = snapshot.buffers.get(&descriptor.topic);
            TopicSummary {
                descriptor: descriptor.clone(),
                len: buffer.map_or(0, |b| b.len()),
                latest: buffer.and_then(|b| b.back()).map(|r| r.value.clone()),
            }
        })
        .collect();
    Json(summaries)
}
