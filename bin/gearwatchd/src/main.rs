//! ---
//! gw_section: "01-core-functionality"
//! gw_subsection: "binary"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Binary entrypoint for the GearWatch daemon."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gw_backend::BackendClient;
use gw_common::{init_tracing, AppConfig, LogFormat};
use gw_ingest::{IngestService, Relay};
use gw_metrics::{new_registry, spawn_http_server, DaemonMetrics, IngestMetrics};
use gw_msg::{generate_client_id, BrokerConnection, ConnectionSettings, MqttLink};
use gw_net::{SnapshotApiBuilder, TopicDescriptor};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "GearWatch telemetry ingestion daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FORMAT", help = "Override log format (json|pretty)")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Connect to the broker and ingest until interrupted")]
    Run,
    #[command(about = "Load and validate configuration, then exit")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/gearwatch.toml"));
    candidates.push(PathBuf::from("configs/gearwatch.example.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let load_duration = load_started.elapsed();
    let mut config = loaded.config;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            println!(
                "{}: ok\nbroker: {}\ntopics: {}\nrelay: {}",
                loaded.source.display(),
                config.broker.url(),
                config.topics.len(),
                if config.relay.enabled {
                    config.relay.base_url.as_str()
                } else {
                    "disabled"
                }
            );
            Ok(())
        }
        Commands::Run => {
            init_tracing("gearwatchd", &config.logging)?;
            info!(config_path = %loaded.source.display(), load_time = ?load_duration, "configuration loaded");
            run_daemon(config, load_duration.as_secs_f64()).await
        }
    }
}

async fn run_daemon(config: AppConfig, config_load_seconds: f64) -> Result<()> {
    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(config_load_seconds);
    daemon_metrics.inc_start();
    daemon_metrics.set_build_info(
        env!("CARGO_PKG_VERSION"),
        if cfg!(debug_assertions) { "debug" } else { "release" },
    );
    let ingest_metrics = IngestMetrics::new(registry.clone())?;

    let metrics_server = if config.metrics.enabled {
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let relay = if config.relay.enabled {
        let client = BackendClient::from_config(&config.relay)
            .context("failed to build backend relay client")?;
        info!(base_url = %client.base_url(), "backend relay enabled");
        Relay::spawn(&config.relay, Arc::new(client), ingest_metrics.clone())
    } else {
        info!("backend relay disabled by configuration");
        Relay::disabled(ingest_metrics.clone())
    };
    let service = IngestService::new(&config, relay, ingest_metrics);

    let api_server = if config.api.enabled {
        let builder = SnapshotApiBuilder::new(config.api.listen, service.subscribe())
            .with_topics(TopicDescriptor::from_config(&config));
        match builder.spawn().await {
            Ok(server) => Some(server),
            Err(err) => {
                warn!(error = %err, "failed to start snapshot api");
                None
            }
        }
    } else {
        info!("snapshot api disabled by configuration");
        None
    };

    let (events_tx, events_rx) = mpsc::channel(config.broker.event_capacity);
    let ingest_task = service.spawn(events_rx);

    let client_id = generate_client_id(&config.broker.client_id_prefix);
    info!(broker = %config.broker.url(), client_id = %client_id, "connecting to broker");
    let link = MqttLink::from_config(&config.broker, client_id);
    let connection = BrokerConnection::new(link, ConnectionSettings::from_config(&config), events_tx);
    connection.start();

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    connection.stop().await;
    drop(connection);
    match ingest_task.await {
        Ok(service) => {
            info!(final_version = service.latest().version, "ingestion drained");
            drop(service);
        }
        Err(err) => warn!(error = %err, "ingestion task ended abnormally"),
    }

    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}
