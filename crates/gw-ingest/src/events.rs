//! ---
//! gw_section: "01-core-functionality"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Keyword scan of payload lines into a bounded event log."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gw_common::EventLogConfig;
use gw_msg::Topic;
use serde::{Deserialize, Serialize};

/// One keyword match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Monotonic across evictions.
    pub sequence: u64,
    pub observed_at: DateTime<Utc>,
    pub topic: Topic,
    pub message: String,
}

/// Event log shared with published snapshots.
pub type EventLog = Arc<VecDeque<EventLogEntry>>;

#[derive(Debug, Clone)]
pub struct EventLogExtractor {
    keywords: Vec<String>,
    topic_prefixes: Vec<String>,
    max_entries: usize,
    entries: EventLog,
    next_sequence: u64,
}

impl EventLogExtractor {
    pub fn new(config: &EventLogConfig) -> Self {
        Self {
            keywords: config.keywords.clone(),
            topic_prefixes: config.topic_prefixes.clone(),
            max_entries: config.max_entries.max(1),
            entries: Arc::new(VecDeque::new()),
            next_sequence: 1,
        }
    }

    pub fn in_scope(&self, topic: &str) -> bool {
        self.topic_prefixes
            .iter()
            .any(|prefix| topic.starts_with(prefix.as_str()))
    }

    /// Match a line without touching the log.
    pub fn matches(&self, topic: &str, line: &str) -> bool {
        self.in_scope(topic)
            && self
                .keywords
                .iter()
                .any(|keyword| line.contains(keyword.as_str()))
    }

    /// Scan a line and append an entry on match.
    pub fn scan(&mut self, topic: &str, line: &str, now: DateTime<Utc>) -> Option<&EventLogEntry> {
        if !self.matches(topic, line) {
            return None;
        }
        let entry = EventLogEntry {
            sequence: self.next_sequence,
            observed_at: now,
            topic: topic.to_owned(),
            message: line.to_owned(),
        };
        self.next_sequence += 1;

        let entries = Arc::make_mut(&mut self.entries);
        entries.push_back(entry);
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
        entries.back()
    }

    pub fn entries(&self) -> EventLog {
        Arc::clone(&self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
