//! ---
//! gw_section: "05-networking-external-interfaces"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "MQTT broker link over secure WebSocket, plain WebSocket or TCP."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use gw_common::{BrokerConfig, BrokerTransport};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, SubscribeReasonCode, Transport,
};
use tracing::{debug, warn};

use crate::link::BrokerLink;
use crate::{LinkError, RawFrame, Result};

const REQUEST_CAPACITY: usize = 64;
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

struct Session {
    client: AsyncClient,
    eventloop: EventLoop,
    // Cleared once a poll fails; a failed eventloop reconnects if polled again.
    healthy: bool,
}

/// [`BrokerLink`] backed by `rumqttc`. A fresh MQTT session is built on every
/// `connect`, so reconnect timing stays with the connection supervisor.
pub struct MqttLink {
    client_id: String,
    broker: BrokerConfig,
    password: Option<String>,
    session: Option<Session>,
}

impl MqttLink {
    /// Build a link for `broker` using a per-process client id.
    pub fn from_config(broker: &BrokerConfig, client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            password: broker.resolve_password(),
            broker: broker.clone(),
            session: None,
        }
    }

    /// Client identifier presented to the broker.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn options(&self) -> MqttOptions {
        // Websocket transports take the full URL as host.
        let host = match self.broker.transport {
            BrokerTransport::Tcp => self.broker.host.clone(),
            BrokerTransport::Ws | BrokerTransport::Wss => self.broker.url(),
        };
        let mut options = MqttOptions::new(self.client_id.clone(), host, self.broker.port);
        options.set_keep_alive(self.broker.keep_alive);
        options.set_clean_session(true);
        if let Some(username) = &self.broker.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        match self.broker.transport {
            BrokerTransport::Wss => {
                options.set_transport(Transport::wss_with_default_config());
            }
            BrokerTransport::Ws => {
                options.set_transport(Transport::Ws);
            }
            BrokerTransport::Tcp => {}
        }
        options
    }
}

fn classify_refusal(code: ConnectReturnCode) -> LinkError {
    match code {
        ConnectReturnCode::ServiceUnavailable => {
            LinkError::Transport("broker service unavailable".into())
        }
        other => LinkError::Rejected(format!("{other:?}")),
    }
}

fn classify(err: ConnectionError) -> LinkError {
    match err {
        ConnectionError::ConnectionRefused(code) => classify_refusal(code),
        other => LinkError::Transport(other.to_string()),
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn connect(&mut self) -> Result<()> {
        self.session = None;
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    debug!(client_id = %self.client_id, session_present = ack.session_present, "broker acknowledged session");
                    break;
                }
                Ok(_) => continue,
                Err(err) => return Err(classify(err)),
            }
        }
        self.session = Some(Session {
            client,
            eventloop,
            healthy: true,
        });
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| LinkError::Transport("not connected".into()))?;
        session
            .client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|err| LinkError::Subscribe {
                topic: topic.to_owned(),
                reason: err.to_string(),
            })
    }

    async fn next_frame(&mut self) -> Result<RawFrame> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| LinkError::Transport("not connected".into()))?;
        loop {
            match session.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok(RawFrame::new(publish.topic, publish.payload));
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    for code in &ack.return_codes {
                        if matches!(code, SubscribeReasonCode::Failure) {
                            warn!(pkid = ack.pkid, "broker refused a subscription");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    session.healthy = false;
                    return Err(LinkError::Transport("broker closed the session".into()));
                }
                Ok(_) => {}
                Err(err) => {
                    session.healthy = false;
                    return Err(classify(err));
                }
            }
        }
    }

    async fn disconnect(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if !session.healthy {
            debug!(client_id = %self.client_id, "session already failed; dropped without flush");
            return;
        }
        if session.client.try_disconnect().is_err() {
            return;
        }
        let flushed = tokio::time::timeout(DISCONNECT_FLUSH, async {
            loop {
                match session.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if flushed.is_err() {
            debug!(client_id = %self.client_id, "disconnect not flushed before timeout");
        }
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_codes_split_into_fatal_and_transient() {
        assert!(classify_refusal(ConnectReturnCode::BadUserNamePassword).is_fatal());
        assert!(classify_refusal(ConnectReturnCode::NotAuthorized).is_fatal());
        assert!(classify_refusal(ConnectReturnCode::RefusedProtocolVersion).is_fatal());
        assert!(classify_refusal(ConnectReturnCode::BadClientId).is_fatal());
        assert!(!classify_refusal(ConnectReturnCode::ServiceUnavailable).is_fatal());
    }

    #[test]
    fn websocket_options_use_full_url() {
        let broker = BrokerConfig {
            host: "broker.example.com".into(),
            username: Some("user".into()),
            password: Some("secret".into()),
            ..BrokerConfig::default()
        };
        let link = MqttLink::from_config(&broker, "mqtt_0123456789ab");
        let options = link.options();
        assert_eq!(options.broker_address().0, "wss://broker.example.com:443/mqtt");
        assert_eq!(options.client_id(), "mqtt_0123456789ab");
        assert_eq!(
            options.credentials(),
            Some(("user".to_owned(), "secret".to_owned()))
        );
    }

    #[test]
    fn refused_connection_errors_use_refusal_mapping() {
        let rejected = classify(ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized));
        assert!(matches!(rejected, LinkError::Rejected(_)));
        let busy = classify(ConnectionError::ConnectionRefused(ConnectReturnCode::ServiceUnavailable));
        assert!(matches!(busy, LinkError::Transport(_)));
    }

    // Accepts TCP connections but never answers CONNECT.
    async fn silent_broker() -> (tokio::net::TcpListener, BrokerConfig) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let broker = BrokerConfig {
            host: "127.0.0.1".into(),
            port: listener.local_addr().unwrap().port(),
            transport: BrokerTransport::Tcp,
            ..BrokerConfig::default()
        };
        (listener, broker)
    }

    fn attach_session(link: &mut MqttLink, healthy: bool) {
        let (client, eventloop) = AsyncClient::new(link.options(), REQUEST_CAPACITY);
        link.session = Some(Session {
            client,
            eventloop,
            healthy,
        });
    }

    #[tokio::test]
    async fn failed_session_is_dropped_without_polling() {
        let (_listener, broker) = silent_broker().await;
        let mut link = MqttLink::from_config(&broker, "mqtt_failed");
        attach_session(&mut link, false);

        let started = std::time::Instant::now();
        link.disconnect().await;
        assert!(started.elapsed() < DISCONNECT_FLUSH / 2);
        assert!(link.session.is_none());
    }

    #[tokio::test]
    async fn healthy_session_tries_to_flush_disconnect() {
        let (_listener, broker) = silent_broker().await;
        let mut link = MqttLink::from_config(&broker, "mqtt_healthy");
        attach_session(&mut link, true);

        let started = std::time::Instant::now();
        link.disconnect().await;
        assert!(started.elapsed() >= DISCONNECT_FLUSH);
        assert!(link.session.is_none());
    }

    #[tokio::test]
    async fn operations_without_session_report_transport_errors() {
        let mut link = MqttLink::from_config(&BrokerConfig::default(), "mqtt_test");
        assert!(matches!(
            link.subscribe("a/b").await,
            Err(LinkError::Transport(_))
        ));
        assert!(matches!(link.next_frame().await, Err(LinkError::Transport(_))));
        link.disconnect().await;
    }
}
