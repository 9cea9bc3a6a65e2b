//! ---
//! gw_section: "02-messaging-ipc-data-model"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Broker link abstraction, connection lifecycle and telemetry data model."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
#![warn(missing_docs)]

pub mod connection;
pub mod link;
pub mod memory;
pub mod mqtt;
pub mod types;

/// Shared result type for broker link operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Failures reported by a [`BrokerLink`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// Network level failure; the connection supervisor retries.
    #[error("transport error: {0}")]
    Transport(String),
    /// The broker refused the session (credentials, authorization, protocol, client id).
    #[error("broker rejected connection: {0}")]
    Rejected(String),
    /// A single topic subscription failed; the link stays open.
    #[error("subscription to '{topic}' failed: {reason}")]
    Subscribe {
        /// Topic filter that could not be subscribed.
        topic: String,
        /// Broker or client supplied reason.
        reason: String,
    },
}

impl LinkError {
    /// Fatal errors stop automatic reconnection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LinkError::Rejected(_))
    }
}

pub use connection::{BrokerConnection, ConnectionSettings};
pub use link::{generate_client_id, BrokerLink};
pub use memory::{InMemoryLink, InMemoryLinkHandle, LinkJournal};
pub use mqtt::MqttLink;
pub use types::{
    ConnectionState, NormalizedRecord, RawFrame, RecordValue, Topic, TransportEvent,
};
