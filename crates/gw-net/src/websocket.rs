//! ---
//! gw_section: "05-networking-external-interfaces"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "WebSocket push of snapshots with per-client topic filters."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use gw_ingest::Snapshot;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::rest::ApiState;

#[derive(Debug, Deserialize)]
struct ClientCommand {
    action: String,
    #[serde(default)]
    topics: Vec<String>,
}

/// Topics a client asked for. `None` means every topic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    allowed: Option<BTreeSet<String>>,
}

impl TopicFilter {
    /// Apply a client command. Returns false for unknown actions.
    pub fn apply(&mut self, action: &str, topics: Vec<String>) -> bool {
        match action {
            "subscribe" => {
                self.allowed.get_or_insert_with(BTreeSet::new).extend(topics);
            }
            "unsubscribe" => {
                if let Some(set) = self.allowed.as_mut() {
                    for topic in &topics {
                        set.remove(topic);
                    }
                }
            }
            "unsubscribe_all" => self.allowed = None,
            _ => return false,
        }
        true
    }

    pub fn render(&self, snapshot: &Snapshot) -> serde_json::Result<String> {
        match &self.allowed {
            None => serde_json::to_string(snapshot),
            Some(topics) => {
                serde_json::to_string(&snapshot.restricted_to(topics.iter().map(String::as_str)))
            }
        }
    }
}

pub(crate) async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
) -> axum::response::Response {
    ws.on_upgrade(|socket| client_loop(socket, state))
}

async fn send_snapshot(socket: &mut WebSocket, filter: &TopicFilter, snapshot: &Snapshot) -> bool {
    let Ok(text) = filter.render(snapshot) else {
        warn!(version = snapshot.version, "failed to serialise snapshot");
        return true;
    };
    socket.send(Message::Text(text)).await.is_ok()
}

async fn client_loop(mut socket: WebSocket, state: Arc<ApiState>) {
    let mut snapshots = state.snapshots.clone();
    let mut filter = TopicFilter::default();

    let initial = snapshots.mark_seen();
    if !send_snapshot(&mut socket, &filter, &initial).await {
        return;
    }

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                // Watch semantics: slow clients skip straight to the newest version.
                let Some(snapshot) = changed else {
                    break;
                };
                if !send_snapshot(&mut socket, &filter, &snapshot).await {
                    break;
                }
            }
            message = socket.recv() => {
                let Some(Ok(message)) = message else {
                    break;
                };

                match message {
                    Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(cmd) => {
                            if filter.apply(&cmd.action, cmd.topics) {
                                debug!(action = %cmd.action, "websocket filter updated");
                                let current = snapshots.mark_seen();
                                if !send_snapshot(&mut socket, &filter, &current).await {
                                    break;
                                }
                            } else {
                                warn!(action = %cmd.action, "unknown websocket command received");
                                let _ = socket
                                    .send(Message::Text("{\"error\":\"unknown action\"}".into()))
                                    .await;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "invalid websocket command payload");
                            let _ = socket
                                .send(Message::Text("{\"error\":\"invalid command\"}".into()))
                                .await;
                        }
                    },
                    Message::Binary(_) => {
                        let _ = socket
                            .send(Message::Text("{\"error\":\"binary unsupported\"}".into()))
                            .await;
                    }
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_commands_follow_subscribe_semantics() {
        let mut filter = TopicFilter::default();
        assert!(filter.apply("subscribe", vec!["a".into(), "b".into()]));
        assert!(filter.apply("unsubscribe", vec!["a".into()]));
        assert_eq!(
            filter.allowed,
            Some(BTreeSet::from(["b".to_owned()]))
        );
        assert!(filter.apply("unsubscribe_all", Vec::new()));
        assert_eq!(filter, TopicFilter::default());
        assert!(!filter.apply("explode", Vec::new()));
    }

    #[test]
    fn unsubscribe_without_subscription_keeps_everything() {
        let mut filter = TopicFilter::default();
        filter.apply("unsubscribe", vec!["a".into()]);
        assert_eq!(filter.allowed, None);
    }
}
