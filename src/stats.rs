use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::heap::HeapStats;

/// Aggregated allocation counters for one `(type_name, tag)` ledger key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationStat {
    pub type_name: String,
    pub tag: String,
    /// Number of `record` calls for this key
    pub alloc_count: u64,
    /// Sum of the size estimates of those calls
    pub total_alloc_bytes: u64,
    /// `total_alloc_bytes / alloc_count`, integer division
    pub average_alloc_bytes: u64,
}

impl AllocationStat {
    pub(crate) fn new(type_name: &str, tag: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            tag: tag.to_string(),
            alloc_count: 0,
            total_alloc_bytes: 0,
            average_alloc_bytes: 0,
        }
    }

    pub(crate) fn add(&mut self, bytes: u64) {
        self.alloc_count = self.alloc_count.saturating_add(1);
        self.total_alloc_bytes = self.total_alloc_bytes.saturating_add(bytes);
        self.average_alloc_bytes = self.total_alloc_bytes / self.alloc_count;
    }
}

/// Heuristic share of the current heap attributed to one ledger key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionStat {
    pub type_name: String,
    pub tag: String,
    pub retained_bytes: u64,
    pub retained_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    /// Case-insensitive, whitespace-tolerant parse.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A heuristic recommendation derived from one high-retention key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSuggestion {
    pub id: String,
    pub type_name: String,
    pub tag: String,
    pub severity: Severity,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Immutable point-in-time record kept in the history buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilerSnapshot {
    pub timestamp: DateTime<Utc>,

    pub heap_alloc_bytes: u64,
    pub heap_inuse_bytes: u64,
    pub heap_idle_bytes: u64,
    pub heap_released_bytes: u64,
    pub num_gc: u32,
    pub last_gc_unix: i64,
    pub next_gc_bytes: u64,
    pub total_alloc_bytes: u64,

    pub top_allocations: Vec<AllocationStat>,
    pub top_retentions: Vec<RetentionStat>,
}

impl ProfilerSnapshot {
    pub fn new(
        timestamp: DateTime<Utc>,
        heap: &HeapStats,
        top_allocations: Vec<AllocationStat>,
        top_retentions: Vec<RetentionStat>,
    ) -> Self {
        Self {
            timestamp,
            heap_alloc_bytes: heap.heap_alloc_bytes,
            heap_inuse_bytes: heap.heap_inuse_bytes,
            heap_idle_bytes: heap.heap_idle_bytes,
            heap_released_bytes: heap.heap_released_bytes,
            num_gc: heap.num_gc,
            last_gc_unix: heap.last_gc_unix,
            next_gc_bytes: heap.next_gc_bytes,
            total_alloc_bytes: heap.total_alloc_bytes,
            top_allocations,
            top_retentions,
        }
    }
}

/// One-decimal percent for messages, truncated toward zero: `14.96` is
/// `"14.9"`. Negative and NaN inputs render as `"0.0"`.
pub(crate) fn format_percent(value: f64) -> String {
    let tenths = (value.max(0.0) * 10.0) as u64;
    format!("{}.{}", tenths / 10, tenths % 10)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
/// Coarse class of a tracked type, guessed from its name
/// - `buffer`: byte slices, buffers
/// - `message`: requests, responses, messages
/// - `cache`: maps, caches
/// - `other`: anything else
///
/// Matching is a case-insensitive substring test, checked in that order.
pub enum TypeClass {
    Buffer,
    Message,
    Cache,
    Other,
}

pub fn guess_type_class(type_name: &str) -> TypeClass {
    let lower = type_name.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["byte", "buffer", "<u8>", "[u8"]) {
        TypeClass::Buffer
    } else if has(&["request", "response", "message"]) {
        TypeClass::Message
    } else if has(&["map", "cache"]) {
        TypeClass::Cache
    } else {
        TypeClass::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_uses_integer_division() {
        let mut stat = AllocationStat::new("u8", "default");
        stat.add(3);
        stat.add(4);
        assert_eq!(stat.alloc_count, 2);
        assert_eq!(stat.total_alloc_bytes, 7);
        assert_eq!(stat.average_alloc_bytes, 3);
    }

    #[test]
    fn type_classes() {
        assert_eq!(guess_type_class("alloc::vec::Vec<u8>"), TypeClass::Buffer);
        assert_eq!(guess_type_class("bytes::BytesMut"), TypeClass::Buffer);
        assert_eq!(guess_type_class("app::HttpRequest"), TypeClass::Message);
        assert_eq!(
            guess_type_class("std::collections::HashMap<u32, u64>"),
            TypeClass::Cache
        );
        assert_eq!(guess_type_class("app::SessionCache"), TypeClass::Cache);
        assert_eq!(guess_type_class("app::Point"), TypeClass::Other);
    }

    #[test]
    fn percents_truncate_to_one_decimal() {
        assert_eq!(format_percent(14.96), "14.9");
        assert_eq!(format_percent(15.0), "15.0");
        assert_eq!(format_percent(0.05), "0.0");
        assert_eq!(format_percent(250.0), "250.0");
        assert_eq!(format_percent(-3.0), "0.0");
        assert_eq!(format_percent(f64::NAN), "0.0");
    }

    #[test]
    fn severity_round_trips_through_text() {
        assert_eq!(Severity::parse(" Critical "), Some(Severity::Critical));
        assert_eq!(Severity::parse("nope"), None);
        assert_eq!(
            serde_json::to_string(&Severity::Warning).unwrap(),
            "\"warning\""
        );
    }
}
