//! ---
//! gw_section: "01-core-functionality"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Shared primitives and utilities for the ingestion runtime."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_broker_host() -> String {
    "localhost".to_owned()
}

fn default_broker_port() -> u16 {
    443
}

fn default_broker_path() -> String {
    "/mqtt".to_owned()
}

fn default_client_id_prefix() -> String {
    "mqtt_".to_owned()
}

fn default_reconnect_interval() -> Duration {
    Duration::from_millis(5000)
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(30)
}

fn default_event_capacity() -> usize {
    1024
}

fn default_buffer_capacity() -> usize {
    5
}

fn default_required_fields() -> Vec<String> {
    vec!["R".to_owned(), "Y".to_owned(), "B".to_owned()]
}

fn default_optional_fields() -> Vec<String> {
    vec!["C".to_owned(), "D".to_owned()]
}

fn default_event_keywords() -> Vec<String> {
    vec![
        "Activated".to_owned(),
        "Deactivated".to_owned(),
        "New R&D event scheduled".to_owned(),
    ]
}

fn default_event_topic_prefixes() -> Vec<String> {
    vec!["factory/gearbox1/".to_owned()]
}

fn default_event_log_max_entries() -> usize {
    1000
}

fn default_relay_enabled() -> bool {
    true
}

fn default_relay_base_url() -> String {
    "http://127.0.0.1:8000".to_owned()
}

fn default_relay_max_in_flight() -> usize {
    256
}

fn default_relay_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Primary configuration object for the GearWatch runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub buffers: BufferConfig,
    #[serde(default)]
    pub topics: IndexMap<String, TopicConfig>,
    #[serde(default)]
    pub event_log: EventLogConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "GEARWATCH_CONFIG";

    /// Load configuration from disk, respecting the `GEARWATCH_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Parse and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Topics in subscription order.
    pub fn topic_names(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    /// Effective buffer capacity for a topic.
    pub fn capacity_for(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .and_then(|t| t.capacity)
            .unwrap_or(self.buffers.default_capacity)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.topics.is_empty() {
            return Err(anyhow!("configuration must declare at least one topic"));
        }
        if self.buffers.default_capacity == 0 {
            return Err(anyhow!("buffers.default_capacity must be at least 1"));
        }
        for (name, topic) in &self.topics {
            topic.validate(name)?;
        }
        self.broker.validate()?;
        self.relay.validate()?;
        if self.event_log.max_entries == 0 {
            return Err(anyhow!("event_log.max_entries must be at least 1"));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            buffers: BufferConfig::default(),
            topics: IndexMap::new(),
            event_log: EventLogConfig::default(),
            relay: RelayConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Wire transport used to reach the broker.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerTransport {
    /// MQTT over TLS WebSocket.
    #[default]
    Wss,
    /// MQTT over plain WebSocket.
    Ws,
    /// Plain MQTT over TCP.
    Tcp,
}

impl BrokerTransport {
    pub fn scheme(&self) -> &'static str {
        match self {
            BrokerTransport::Wss => "wss",
            BrokerTransport::Ws => "ws",
            BrokerTransport::Tcp => "mqtt",
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_broker_path")]
    pub path: String,
    #[serde(default)]
    pub transport: BrokerTransport,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Name of an environment variable holding the password; wins over `password`.
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_reconnect_interval")]
    #[serde(rename = "reconnect_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_interval: Duration,
    #[serde(default = "default_keep_alive")]
    #[serde(rename = "keep_alive_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub keep_alive: Duration,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl BrokerConfig {
    /// Broker endpoint rendered as a URL, e.g. `wss://broker:443/mqtt`.
    pub fn url(&self) -> String {
        match self.transport {
            BrokerTransport::Tcp => format!("{}://{}:{}", self.transport.scheme(), self.host, self.port),
            _ => format!(
                "{}://{}:{}{}",
                self.transport.scheme(),
                self.host,
                self.port,
                self.path
            ),
        }
    }

    /// Resolve the broker password from the environment or the literal value.
    pub fn resolve_password(&self) -> Option<String> {
        if let Some(var) = &self.password_env {
            if let Ok(value) = std::env::var(var) {
                return Some(value);
            }
        }
        self.password.clone()
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("broker.host must not be empty"));
        }
        if self.reconnect_interval.is_zero() {
            return Err(anyhow!("broker.reconnect_interval_ms must be non-zero"));
        }
        if self.event_capacity == 0 {
            return Err(anyhow!("broker.event_capacity must be at least 1"));
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            path: default_broker_path(),
            transport: BrokerTransport::default(),
            username: None,
            password: None,
            password_env: None,
            client_id_prefix: default_client_id_prefix(),
            reconnect_interval: default_reconnect_interval(),
            keep_alive: default_keep_alive(),
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_buffer_capacity")]
    pub default_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            default_capacity: default_buffer_capacity(),
        }
    }
}

/// Parser selected for a topic.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    #[default]
    Numeric,
    Status,
    Text,
}

/// Resolved value shape for a topic, consumed by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueShape {
    Numeric,
    Status {
        required: Vec<String>,
        optional: Vec<String>,
    },
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    #[serde(default)]
    pub parser: ParserKind,
    #[serde(default)]
    pub capacity: Option<usize>,
    /// Keep every trimmed line in a companion raw buffer, including lines the parser rejects.
    #[serde(default)]
    pub retain_raw: bool,
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<String>,
    #[serde(default = "default_optional_fields")]
    pub optional_fields: Vec<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl TopicConfig {
    pub fn value_shape(&self) -> ValueShape {
        match self.parser {
            ParserKind::Numeric => ValueShape::Numeric,
            ParserKind::Text => ValueShape::Text,
            ParserKind::Status => ValueShape::Status {
                required: self.required_fields.clone(),
                optional: self.optional_fields.clone(),
            },
        }
    }

    pub fn validate(&self, topic: &str) -> Result<()> {
        if topic.trim().is_empty() {
            return Err(anyhow!("topic names must not be empty"));
        }
        if self.capacity == Some(0) {
            return Err(anyhow!("topic '{}' capacity must be at least 1", topic));
        }
        if self.parser == ParserKind::Status && self.required_fields.is_empty() {
            return Err(anyhow!(
                "status topic '{}' must declare at least one required field",
                topic
            ));
        }
        Ok(())
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            parser: ParserKind::default(),
            capacity: None,
            retain_raw: false,
            required_fields: default_required_fields(),
            optional_fields: default_optional_fields(),
            label: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    #[serde(default = "default_event_keywords")]
    pub keywords: Vec<String>,
    /// Only topics starting with one of these prefixes are scanned.
    #[serde(default = "default_event_topic_prefixes")]
    pub topic_prefixes: Vec<String>,
    #[serde(default = "default_event_log_max_entries")]
    pub max_entries: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            keywords: default_event_keywords(),
            topic_prefixes: default_event_topic_prefixes(),
            max_entries: default_event_log_max_entries(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_enabled")]
    pub enabled: bool,
    #[serde(default = "default_relay_base_url")]
    pub base_url: String,
    /// Empty means every topic is relayed.
    #[serde(default)]
    pub topic_prefixes: Vec<String>,
    #[serde(default = "default_relay_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_relay_timeout")]
    #[serde(rename = "timeout_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        url::Url::parse(&self.base_url)
            .with_context(|| format!("relay.base_url '{}' is not a valid URL", self.base_url))?;
        if self.max_in_flight == 0 {
            return Err(anyhow!("relay.max_in_flight must be at least 1"));
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: default_relay_enabled(),
            base_url: default_relay_base_url(),
            topic_prefixes: Vec::new(),
            max_in_flight: default_relay_max_in_flight(),
            timeout: default_relay_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const MINIMAL: &str = r#"
[broker]
host = "broker.example.com"

[topics."factory/gearbox1/out1/rpm"]

[topics."factory/gearbox1/status"]
parser = "status"
capacity = 10
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = AppConfig::from_str(MINIMAL).unwrap();
        assert_eq!(config.broker.port, 443);
        assert_eq!(config.broker.reconnect_interval, Duration::from_millis(5000));
        assert_eq!(config.broker.url(), "wss://broker.example.com:443/mqtt");
        assert_eq!(config.capacity_for("factory/gearbox1/out1/rpm"), 5);
        assert_eq!(config.capacity_for("factory/gearbox1/status"), 10);
        assert_eq!(
            config.topic_names(),
            vec!["factory/gearbox1/out1/rpm", "factory/gearbox1/status"]
        );
        assert_eq!(config.event_log.keywords.len(), 3);
        assert!(config.relay.enabled);
    }

    #[test]
    fn status_topic_resolves_default_fields() {
        let config = AppConfig::from_str(MINIMAL).unwrap();
        let shape = config.topics["factory/gearbox1/status"].value_shape();
        assert_eq!(
            shape,
            ValueShape::Status {
                required: vec!["R".into(), "Y".into(), "B".into()],
                optional: vec!["C".into(), "D".into()],
            }
        );
        assert_eq!(
            config.topics["factory/gearbox1/out1/rpm"].value_shape(),
            ValueShape::Numeric
        );
    }

    #[test]
    fn validation_rejects_missing_topics_and_zero_capacity() {
        assert!(AppConfig::from_str("[broker]\nhost = \"x\"\n").is_err());

        let zero = r#"
[topics."a/b"]
capacity = 0
"#;
        assert!(AppConfig::from_str(zero).is_err());

        let bad_relay = r#"
[relay]
base_url = "not a url"

[topics."a/b"]
"#;
        assert!(AppConfig::from_str(bad_relay).is_err());
    }

    #[test]
    fn password_env_takes_precedence() {
        let broker = BrokerConfig {
            password: Some("literal".into()),
            password_env: Some("GEARWATCH_TEST_UNSET_PASSWORD_VAR".into()),
            ..BrokerConfig::default()
        };
        assert_eq!(broker.resolve_password().as_deref(), Some("literal"));
    }

    #[test]
    fn tcp_url_omits_path() {
        let broker = BrokerConfig {
            transport: BrokerTransport::Tcp,
            port: 1883,
            ..BrokerConfig::default()
        };
        assert_eq!(broker.url(), "mqtt://localhost:1883");
    }
}
