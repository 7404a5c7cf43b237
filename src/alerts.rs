use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config::ProfilerConfig,
    stats::{OptimizationSuggestion, ProfilerSnapshot, Severity, format_percent},
    suggest::LARGE_HEAP_BYTES,
};

/// An alert derived from profiler output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    pub source: AlertSource,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSource {
    Bootstrap,
    Heap,
    Retention,
    Suggestion,
}

/// Build alerts from the latest snapshot and the current suggestions.
///
/// Pure: the same inputs always give the same alerts.
pub fn build_alerts(
    latest: Option<&ProfilerSnapshot>,
    suggestions: &[OptimizationSuggestion],
    config: &ProfilerConfig,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    if !config.alerting_enabled {
        return Vec::new();
    }
    let Some(snapshot) = latest else {
        return vec![Alert {
            id: "bootstrap-no-samples".to_string(),
            severity: Severity::Info,
            message: "No profiler samples collected yet; the profiler may still be starting."
                .to_string(),
            source: AlertSource::Bootstrap,
            created_at: now,
        }];
    };

    let mut out = Vec::new();

    if snapshot.heap_alloc_bytes > LARGE_HEAP_BYTES {
        out.push(Alert {
            id: "heap-high".to_string(),
            severity: Severity::Warning,
            message: "Heap allocation exceeds 512MiB; consider reviewing retention and allocation hot paths."
                .to_string(),
            source: AlertSource::Heap,
            created_at: now,
        });
    }

    for rs in &snapshot.top_retentions {
        if rs.retained_percent < config.memory_spike_threshold_percent {
            continue;
        }
        let severity = if rs.retained_percent >= config.high_retention_threshold_percent {
            Severity::Critical
        } else {
            Severity::Warning
        };
        out.push(Alert {
            id: format!("retention-{}-{}", rs.type_name, rs.tag),
            severity,
            message: format!(
                "Allocation type {} (tag={}) retains ~{}% of heap; consider applying optimization suggestions.",
                rs.type_name,
                rs.tag,
                format_percent(rs.retained_percent.clamp(0.0, 100.0))
            ),
            source: AlertSource::Retention,
            created_at: now,
        });
    }

    out.extend(
        suggestions
            .iter()
            .filter(|s| s.severity == Severity::Critical)
            .map(|s| Alert {
                id: format!("critical-suggestion-{}-{}", s.type_name, s.tag),
                severity: Severity::Critical,
                message: s.message.clone(),
                source: AlertSource::Suggestion,
                created_at: now,
            }),
    );

    out
}
