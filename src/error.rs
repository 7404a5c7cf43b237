use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while loading or validating a [`crate::ProfilerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("unsupported config file extension for '{path}' (use .json or .toml)")]
    UnsupportedFormat { path: PathBuf },

    #[error("invalid environment override: {}", .problems.join("; "))]
    Env { problems: Vec<String> },

    #[error("invalid configuration: {}", .problems.join("; "))]
    Invalid { problems: Vec<String> },
}

/// The heap-stat source could not produce a reading for this cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HeapStatError {
    #[error("heap statistics unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while writing a heap-profile capture to disk.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to create capture directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write capture file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize capture: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("no capture collaborator attached to this profiler")]
    NotConfigured,

    #[error("capture task failed: {0}")]
    Task(String),
}

/// Readiness failures reported by [`crate::HealthChecker`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HealthError {
    #[error("profiler has not produced any samples yet")]
    NoSamples,

    #[error("profiler samples are stale ({age_ms}ms old, allowed {allowed_ms}ms)")]
    Stale { age_ms: i64, allowed_ms: i64 },
}
