//! ---
//! gw_section: "05-networking-external-interfaces"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "History rows returned by the query API and summary statistics over them."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

/// Row of `GET /filter_gear_value/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub date: String,
    pub time: String,
    pub value: String,
}

/// First numeric reading stored in a history value, e.g. `"topic | 1200"` or `"rpm: 1200"`.
pub fn parse_reading(value: &str) -> Option<f64> {
    parse_readings(value).into_iter().next()
}

/// Every numeric reading in a history value. A relayed multi-line frame
/// (`"topic | 10\n12\n9"`) carries one reading per line.
pub fn parse_readings(value: &str) -> Vec<f64> {
    let Some((_, rest)) = value.split_once([':', '|']) else {
        return Vec::new();
    };
    rest.lines()
        .filter_map(|line| {
            let segment = line.split([':', '|']).next().unwrap_or(line).trim();
            segment.parse::<f64>().ok().filter(|reading| reading.is_finite())
        })
        .collect()
}

/// Summary over the parsable entries of a history query.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct HistoryStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl HistoryStats {
    /// Unparsable entries are skipped; an empty set yields zeros.
    pub fn from_entries(entries: &[HistoryEntry]) -> Self {
        let readings: Vec<f64> = entries
            .iter()
            .flat_map(|entry| parse_readings(&entry.value))
            .collect();
        if readings.is_empty() {
            return Self::default();
        }
        let min = readings.iter().copied().fold(f64::INFINITY, f64::min);
        let max = readings.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = readings.iter().sum::<f64>() / readings.len() as f64;
        Self {
            count: readings.len(),
            min,
            max,
            mean,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: &str) -> HistoryEntry {
        HistoryEntry {
            date: "2024-03-01".into(),
            time: "10:00:00".into(),
            value: value.into(),
        }
    }

    #[test]
    fn readings_follow_first_separator() {
        assert_eq!(parse_reading("factory/gearbox1/out1/rpm | 1200"), Some(1200.0));
        assert_eq!(parse_reading("rpm: 12.5"), Some(12.5));
        assert_eq!(parse_reading("a: 3: 4"), Some(3.0));
        assert_eq!(parse_reading("1200"), None);
        assert_eq!(parse_reading("topic | abc"), None);
    }

    #[test]
    fn stats_skip_unparsable_entries() {
        let entries = vec![entry("t | 10"), entry("t | abc"), entry("t | 20"), entry("t | 30")];
        let stats = HistoryStats::from_entries(&entries);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.mean, 20.0);
    }

    #[test]
    fn relayed_multi_line_frames_count_every_line() {
        let value = gw_ingest::relay_value("factory/gearbox1/out1/rpm", "10\n12\n9\n");
        assert_eq!(parse_readings(&value), vec![10.0, 12.0, 9.0]);

        let stats = HistoryStats::from_entries(&[entry(&value), entry("t | 20")]);
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min, 9.0);
        assert_eq!(stats.max, 20.0);
        assert_eq!(stats.mean, 12.75);
    }

    #[test]
    fn noisy_lines_inside_a_frame_are_skipped() {
        assert_eq!(parse_readings("t | 10\nabc\n\n30"), vec![10.0, 30.0]);
        assert!(parse_readings("no separator").is_empty());
    }

    #[test]
    fn empty_history_yields_zeros() {
        assert_eq!(HistoryStats::from_entries(&[]), HistoryStats::default());
        assert_eq!(HistoryStats::from_entries(&[entry("noise")]).count, 0);
    }
}
