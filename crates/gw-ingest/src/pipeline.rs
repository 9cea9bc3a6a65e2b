//! ---
//! gw_section: "01-core-functionality"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Line splitting and per-topic parsing of raw broker frames."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use gw_common::{AppConfig, ValueShape};
use gw_msg::{NormalizedRecord, RawFrame, RecordValue, Topic};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

static STATUS_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z][A-Za-z0-9_]*)\s*=\s*([-+]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][-+]?\d+)?)")
        .expect("status field pattern compiles")
});

/// Parser applied to every line of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineParser {
    /// Whole line must be a finite number.
    Numeric,
    /// `NAME=value` pairs; required names must appear, optional ones default to 0.
    Status {
        required: Vec<String>,
        optional: Vec<String>,
    },
    /// Line kept verbatim.
    Text,
}

impl From<ValueShape> for LineParser {
    fn from(shape: ValueShape) -> Self {
        match shape {
            ValueShape::Numeric => LineParser::Numeric,
            ValueShape::Status { required, optional } => LineParser::Status { required, optional },
            ValueShape::Text => LineParser::Text,
        }
    }
}

impl LineParser {
    /// Parse one trimmed line. `None` means the line is dropped.
    pub fn parse(&self, line: &str) -> Option<RecordValue> {
        match self {
            LineParser::Numeric => parse_number(line).map(RecordValue::Number),
            LineParser::Status { required, optional } => {
                parse_status(line, required, optional).map(RecordValue::Fields)
            }
            LineParser::Text => Some(RecordValue::Text(line.to_owned())),
        }
    }
}

fn parse_number(line: &str) -> Option<f64> {
    line.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn parse_status(
    line: &str,
    required: &[String],
    optional: &[String],
) -> Option<IndexMap<String, f64>> {
    let mut found: IndexMap<&str, f64> = IndexMap::new();
    for captures in STATUS_FIELD.captures_iter(line) {
        let (Some(name), Some(value)) = (captures.get(1), captures.get(2)) else {
            continue;
        };
        if let Some(value) = parse_number(value.as_str()) {
            found.entry(name.as_str()).or_insert(value);
        }
    }

    let mut fields = IndexMap::with_capacity(required.len() + optional.len());
    for name in required {
        let value = found.get(name.as_str())?;
        fields.insert(name.clone(), *value);
    }
    for name in optional {
        let value = found.get(name.as_str()).copied().unwrap_or(0.0);
        fields.insert(name.clone(), value);
    }
    Some(fields)
}

/// Split a payload into trimmed, non-empty lines.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Resolved handling for a configured topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPolicy {
    pub parser: LineParser,
    pub capacity: usize,
    pub retain_raw: bool,
}

/// Outcome of running one frame through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame {
    pub topic: Topic,
    /// Every trimmed non-empty line, parsed or not.
    pub lines: Vec<String>,
    pub records: Vec<NormalizedRecord>,
    /// Lines the parser dropped.
    pub rejected: usize,
}

/// Topic to parser table, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Pipeline {
    policies: IndexMap<Topic, TopicPolicy>,
    fallback: LineParser,
}

impl Pipeline {
    pub fn from_config(config: &AppConfig) -> Self {
        let policies = config
            .topics
            .iter()
            .map(|(topic, topic_config)| {
                let policy = TopicPolicy {
                    parser: topic_config.value_shape().into(),
                    capacity: config.capacity_for(topic),
                    retain_raw: topic_config.retain_raw,
                };
                (topic.clone(), policy)
            })
            .collect();
        Self {
            policies,
            fallback: LineParser::Numeric,
        }
    }

    pub fn policy(&self, topic: &str) -> Option<&TopicPolicy> {
        self.policies.get(topic)
    }

    pub fn policies(&self) -> impl Iterator<Item = (&Topic, &TopicPolicy)> {
        self.policies.iter()
    }

    fn parser_for(&self, topic: &str) -> &LineParser {
        self.policies
            .get(topic)
            .map(|policy| &policy.parser)
            .unwrap_or(&self.fallback)
    }

    /// Split and parse a frame. Every record is stamped with `observed_at`.
    pub fn on_raw_frame(&self, frame: &RawFrame, observed_at: DateTime<Utc>) -> ParsedFrame {
        let parser = self.parser_for(&frame.topic);
        let lines = split_lines(&frame.text());
        let mut records = Vec::with_capacity(lines.len());
        for line in &lines {
            if let Some(value) = parser.parse(line) {
                records.push(NormalizedRecord {
                    topic: frame.topic.clone(),
                    value,
                    observed_at,
                });
            }
        }
        ParsedFrame {
            topic: frame.topic.clone(),
            rejected: lines.len() - records.len(),
            lines,
            records,
        }
    }
}
