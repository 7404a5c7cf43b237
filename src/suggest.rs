//! Rule-based optimization suggestions derived from a retention table.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::{
    heap::HeapStats,
    stats::{
        OptimizationSuggestion, RetentionStat, Severity, TypeClass, format_percent, guess_type_class,
    },
};

/// Heaps above this size get an extra pressure hint appended.
pub const LARGE_HEAP_BYTES: u64 = 512 * 1024 * 1024;

/// Derive suggestions from a freshly built retention table.
///
/// Entries at or above `threshold_percent` produce a suggestion; `critical`
/// when the entry exceeds twice the threshold. A threshold `<= 0` disables
/// generation. Output order follows the table order.
pub fn generate(
    retentions: &[RetentionStat],
    heap: &HeapStats,
    threshold_percent: f64,
    now: DateTime<Utc>,
    mut next_id: impl FnMut() -> u64,
) -> Vec<OptimizationSuggestion> {
    if threshold_percent <= 0.0 {
        return Vec::new();
    }

    retentions
        .iter()
        .filter(|rs| rs.retained_percent >= threshold_percent)
        .map(|rs| OptimizationSuggestion {
            id: format!("suggestion-{}", next_id()),
            type_name: rs.type_name.clone(),
            tag: rs.tag.clone(),
            severity: severity_for(rs.retained_percent, threshold_percent),
            message: message_for(rs, heap, threshold_percent),
            created_at: now,
        })
        .collect()
}

pub fn severity_for(retained_percent: f64, threshold_percent: f64) -> Severity {
    if retained_percent > 2.0 * threshold_percent {
        Severity::Critical
    } else {
        Severity::Warning
    }
}

fn message_for(rs: &RetentionStat, heap: &HeapStats, threshold_percent: f64) -> String {
    let mut msg = format!("High memory retention detected for {}", rs.type_name);
    if !rs.tag.is_empty() {
        let _ = write!(msg, " (tag={})", rs.tag);
    }
    let _ = write!(
        msg,
        ". Retains ~{}% of heap, threshold={}%.",
        format_percent(rs.retained_percent),
        format_percent(threshold_percent)
    );

    msg.push_str(match guess_type_class(&rs.type_name) {
        TypeClass::Buffer => {
            " Consider pooling or reusing buffers, or avoiding excessive copying of byte slices."
        }
        TypeClass::Message => {
            " Consider reducing the lifetime of request/response/message objects or avoiding storing them globally."
        }
        TypeClass::Cache => {
            " Consider bounding cache size, using LRU strategies, or evicting entries more aggressively."
        }
        TypeClass::Other => {
            " Consider reviewing allocation patterns, object lifetimes, and potential pooling opportunities."
        }
    });

    if heap.heap_alloc_bytes > LARGE_HEAP_BYTES {
        msg.push_str(
            " Overall heap is quite large; consider reducing retention to mitigate allocator pressure.",
        );
    }
    msg
}
