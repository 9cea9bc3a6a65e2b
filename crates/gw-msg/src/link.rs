//! ---
//! gw_section: "02-messaging-ipc-data-model"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Broker link trait shared by the MQTT and in-memory implementations."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use async_trait::async_trait;
use rand::Rng;

use crate::{RawFrame, Result};

/// Physical link to a broker, driven by [`crate::BrokerConnection`].
///
/// Implementations must keep `next_frame` cancel safe: the connection task
/// races it against shutdown.
#[async_trait]
pub trait BrokerLink: Send + 'static {
    /// Open a session. Returns once the broker acknowledged it.
    async fn connect(&mut self) -> Result<()>;
    /// Subscribe a single topic filter on the open session.
    async fn subscribe(&mut self, topic: &str) -> Result<()>;
    /// Wait for the next published frame.
    async fn next_frame(&mut self) -> Result<RawFrame>;
    /// Close the session; a no-op when nothing is open.
    async fn disconnect(&mut self);
    /// Human-readable link name for logging.
    fn name(&self) -> &'static str;
}

/// Client identifier for one process lifetime: `<prefix><12 hex chars>`.
pub fn generate_client_id(prefix: &str) -> String {
    let suffix: u64 = rand::thread_rng().gen_range(0..(1u64 << 48));
    format!("{prefix}{suffix:012x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_carry_prefix_and_hex_suffix() {
        let id = generate_client_id("mqtt_");
        assert!(id.starts_with("mqtt_"));
        let suffix = &id["mqtt_".len()..];
        assert_eq!(suffix.len(), 12);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn client_ids_differ_between_calls() {
        assert_ne!(generate_client_id("x"), generate_client_id("x"));
    }
}
