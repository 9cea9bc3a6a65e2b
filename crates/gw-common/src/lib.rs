//! ---
//! gw_section: "01-core-functionality"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Shared primitives and utilities for the ingestion runtime."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
//! Shared primitives for the GearWatch workspace: configuration loading and
//! tracing bootstrap consumed by the daemon, the CLI, and the library crates.

pub mod config;
pub mod logging;

pub use config::{
    ApiConfig, AppConfig, BrokerConfig, BrokerTransport, BufferConfig, EventLogConfig,
    LoadedAppConfig, LoggingConfig, MetricsConfig, ParserKind, RelayConfig, TopicConfig,
    ValueShape,
};
pub use logging::{init_cli_tracing, init_tracing, LogFormat};
