//! ---
//! gw_section: "02-messaging-ipc-data-model"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Scriptable in-process broker link for tests and demos."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::link::BrokerLink;
use crate::{LinkError, RawFrame, Result};

enum Scripted {
    Frame(RawFrame),
    Drop(String),
    Reject(String),
}

/// Record of the calls a [`InMemoryLink`] has seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkJournal {
    /// Every call to `connect`, successful or not.
    pub connect_attempts: usize,
    /// Topics subscribed, one entry per successful `connect`.
    pub sessions: Vec<Vec<String>>,
    /// Calls to `disconnect`.
    pub disconnects: usize,
}

#[derive(Default)]
struct Shared {
    journal: LinkJournal,
    connect_results: VecDeque<Result<()>>,
    failing_topics: HashSet<String>,
    connected: bool,
}

/// In-memory [`BrokerLink`]. Frames and failures are injected through the
/// paired [`InMemoryLinkHandle`].
pub struct InMemoryLink {
    shared: Arc<Mutex<Shared>>,
    inbound: mpsc::UnboundedReceiver<Scripted>,
}

/// Control side of an [`InMemoryLink`].
#[derive(Clone)]
pub struct InMemoryLinkHandle {
    shared: Arc<Mutex<Shared>>,
    outbound: mpsc::UnboundedSender<Scripted>,
}

impl InMemoryLink {
    /// Create a link and its control handle.
    pub fn new() -> (Self, InMemoryLinkHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (outbound, inbound) = mpsc::unbounded_channel();
        (
            Self {
                shared: Arc::clone(&shared),
                inbound,
            },
            InMemoryLinkHandle { shared, outbound },
        )
    }
}

#[async_trait]
impl BrokerLink for InMemoryLink {
    async fn connect(&mut self) -> Result<()> {
        let mut shared = self.shared.lock();
        shared.journal.connect_attempts += 1;
        let outcome = shared.connect_results.pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            shared.journal.sessions.push(Vec::new());
            shared.connected = true;
        }
        outcome
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        let mut shared = self.shared.lock();
        if !shared.connected {
            return Err(LinkError::Transport("not connected".into()));
        }
        if shared.failing_topics.contains(topic) {
            return Err(LinkError::Subscribe {
                topic: topic.to_owned(),
                reason: "scripted failure".into(),
            });
        }
        if let Some(session) = shared.journal.sessions.last_mut() {
            session.push(topic.to_owned());
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<RawFrame> {
        if !self.shared.lock().connected {
            return Err(LinkError::Transport("not connected".into()));
        }
        match self.inbound.recv().await {
            Some(Scripted::Frame(frame)) => Ok(frame),
            Some(Scripted::Drop(reason)) => {
                self.shared.lock().connected = false;
                Err(LinkError::Transport(reason))
            }
            Some(Scripted::Reject(reason)) => {
                self.shared.lock().connected = false;
                Err(LinkError::Rejected(reason))
            }
            // Every handle is gone; behave like an idle broker.
            None => std::future::pending().await,
        }
    }

    async fn disconnect(&mut self) {
        let mut shared = self.shared.lock();
        shared.journal.disconnects += 1;
        shared.connected = false;
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

impl InMemoryLinkHandle {
    /// Deliver a frame on `topic`. Returns false once the link is dropped.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        self.outbound
            .send(Scripted::Frame(RawFrame::new(topic, payload)))
            .is_ok()
    }

    /// Make the pending `next_frame` fail with a transport error.
    pub fn drop_connection(&self, reason: &str) -> bool {
        self.outbound.send(Scripted::Drop(reason.to_owned())).is_ok()
    }

    /// Make the pending `next_frame` fail with a broker rejection.
    pub fn reject_session(&self, reason: &str) -> bool {
        self.outbound.send(Scripted::Reject(reason.to_owned())).is_ok()
    }

    /// Queue the outcome of an upcoming `connect` call. Unscripted calls succeed.
    pub fn script_connect(&self, outcome: Result<()>) {
        self.shared.lock().connect_results.push_back(outcome);
    }

    /// Refuse every future subscription to `topic`.
    pub fn fail_subscription(&self, topic: &str) {
        self.shared.lock().failing_topics.insert(topic.to_owned());
    }

    /// Copy of the call journal.
    pub fn journal(&self) -> LinkJournal {
        self.shared.lock().journal.clone()
    }

    /// Whether a session is currently open.
    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_connect_results_are_consumed_in_order() {
        let (mut link, handle) = InMemoryLink::new();
        handle.script_connect(Err(LinkError::Transport("refused".into())));

        assert!(link.connect().await.is_err());
        assert!(!handle.is_connected());
        link.connect().await.unwrap();
        assert!(handle.is_connected());

        let journal = handle.journal();
        assert_eq!(journal.connect_attempts, 2);
        assert_eq!(journal.sessions.len(), 1);
    }

    #[tokio::test]
    async fn subscriptions_are_recorded_per_session() {
        let (mut link, handle) = InMemoryLink::new();
        handle.fail_subscription("b");

        link.connect().await.unwrap();
        link.subscribe("a").await.unwrap();
        let err = link.subscribe("b").await.unwrap_err();
        assert!(matches!(err, LinkError::Subscribe { .. }));
        assert!(!err.is_fatal());

        link.connect().await.unwrap();
        link.subscribe("a").await.unwrap();

        assert_eq!(
            handle.journal().sessions,
            vec![vec!["a".to_owned()], vec!["a".to_owned()]]
        );
    }

    #[tokio::test]
    async fn frames_and_drops_flow_through_next_frame() {
        let (mut link, handle) = InMemoryLink::new();
        link.connect().await.unwrap();

        handle.publish("factory/gearbox1/out1/rpm", "42");
        handle.drop_connection("socket closed");

        let frame = link.next_frame().await.unwrap();
        assert_eq!(frame.topic, "factory/gearbox1/out1/rpm");
        assert_eq!(frame.text(), "42");

        let err = link.next_frame().await.unwrap_err();
        assert_eq!(err, LinkError::Transport("socket closed".into()));
        assert!(!handle.is_connected());
        assert!(link.next_frame().await.is_err());
    }
}
