//! ---
//! gw_section: "01-core-functionality"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Bounded per-topic history buffers with copy-on-write snapshots."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::Arc;

use gw_msg::{NormalizedRecord, RecordValue, Topic};
use indexmap::IndexMap;

use crate::pipeline::Pipeline;

/// Records of one topic, oldest first.
pub type TopicBuffer = VecDeque<NormalizedRecord>;

/// Buffer shared between the store and published snapshots.
pub type SharedBuffer = Arc<TopicBuffer>;

/// Immutable view of every buffer, in configuration order.
pub type BufferSnapshot = IndexMap<Topic, SharedBuffer>;

#[derive(Debug, Clone)]
struct Slot {
    capacity: usize,
    records: SharedBuffer,
    raw: Option<SharedBuffer>,
}

/// Single-writer store of bounded topic buffers.
///
/// Buffers are `Arc`s: appending clones a buffer only while a published
/// snapshot still holds the previous version.
#[derive(Debug, Clone, Default)]
pub struct BufferStore {
    slots: IndexMap<Topic, Slot>,
}

impl BufferStore {
    /// Empty buffers for every configured topic.
    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        let slots = pipeline
            .policies()
            .map(|(topic, policy)| {
                let slot = Slot {
                    capacity: policy.capacity,
                    records: Arc::new(VecDeque::with_capacity(policy.capacity)),
                    raw: policy
                        .retain_raw
                        .then(|| Arc::new(VecDeque::with_capacity(policy.capacity))),
                };
                (topic.clone(), slot)
            })
            .collect();
        Self { slots }
    }

    /// Register a topic directly; existing buffers are kept.
    pub fn with_topic(mut self, topic: impl Into<Topic>, capacity: usize, retain_raw: bool) -> Self {
        let capacity = capacity.max(1);
        self.slots.entry(topic.into()).or_insert_with(|| Slot {
            capacity,
            records: Arc::new(VecDeque::with_capacity(capacity)),
            raw: retain_raw.then(|| Arc::new(VecDeque::with_capacity(capacity))),
        });
        self
    }

    pub fn is_buffered(&self, topic: &str) -> bool {
        self.slots.contains_key(topic)
    }

    pub fn capacity(&self, topic: &str) -> Option<usize> {
        self.slots.get(topic).map(|slot| slot.capacity)
    }

    /// Append at the tail, evicting from the head past capacity.
    /// Returns false for topics that are not buffered.
    pub fn append(&mut self, record: NormalizedRecord) -> bool {
        let Some(slot) = self.slots.get_mut(&record.topic) else {
            return false;
        };
        push_bounded(&mut slot.records, slot.capacity, record);
        true
    }

    /// Append a raw line to the companion buffer, when the topic keeps one.
    pub fn append_raw(&mut self, record: NormalizedRecord) -> bool {
        let Some(slot) = self.slots.get_mut(&record.topic) else {
            return false;
        };
        let Some(raw) = slot.raw.as_mut() else {
            return false;
        };
        let record = NormalizedRecord {
            value: match record.value {
                RecordValue::Text(text) => RecordValue::Text(text),
                other => RecordValue::Text(describe(&other)),
            },
            ..record
        };
        push_bounded(raw, slot.capacity, record);
        true
    }

    pub fn latest(&self, topic: &str) -> Option<&NormalizedRecord> {
        self.slots.get(topic).and_then(|slot| slot.records.back())
    }

    pub fn len(&self, topic: &str) -> usize {
        self.slots.get(topic).map_or(0, |slot| slot.records.len())
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        self.slots
            .iter()
            .map(|(topic, slot)| (topic.clone(), Arc::clone(&slot.records)))
            .collect()
    }

    pub fn raw_snapshot(&self) -> BufferSnapshot {
        self.slots
            .iter()
            .filter_map(|(topic, slot)| slot.raw.as_ref().map(|raw| (topic.clone(), Arc::clone(raw))))
            .collect()
    }
}

fn describe(value: &RecordValue) -> String {
    match value {
        RecordValue::Number(number) => number.to_string(),
        RecordValue::Fields(fields) => fields
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", "),
        RecordValue::Text(text) => text.clone(),
    }
}

fn push_bounded(buffer: &mut SharedBuffer, capacity: usize, mut record: NormalizedRecord) {
    let buffer = Arc::make_mut(buffer);
    if let Some(tail) = buffer.back() {
        if record.observed_at < tail.observed_at {
            record.observed_at = tail.observed_at;
        }
    }
    buffer.push_back(record);
    while buffer.len() > capacity {
        buffer.pop_front();
    }
}
