use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, stats::Severity};

const ENV_PREFIX: &str = "MEMSIGHT_";
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Engine configuration. Validate with [`ProfilerConfig::validate`] (or
/// build it with [`ProfilerConfig::load`]) before handing it to a profiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// How often a sampling cycle runs
    pub sampling_interval_ms: u64,
    /// Time span the history is meant to cover; must fit at least one sample
    pub retention_window_sec: u64,
    /// Ring buffer capacity; 0 keeps no history
    pub max_history_samples: usize,
    /// Retention percent at which a key gets a suggestion; `<= 0` disables them
    pub high_retention_threshold_percent: f64,
    /// Retention percent at which a key raises a warning alert
    pub memory_spike_threshold_percent: f64,
    pub alerting_enabled: bool,
    /// One of trace, debug, info, warn, error
    pub log_level: String,
    pub capture: CaptureConfig,
}

/// Automatic heap-profile capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// Newest files kept after each capture; 0 keeps all
    pub max_files: usize,
    /// Cooldown between automatic captures
    pub min_interval_sec: u64,
    /// Severities that trigger a capture; empty means `critical`
    pub on_severities: Vec<Severity>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: 1_000,
            retention_window_sec: 600,
            max_history_samples: 3_600,
            high_retention_threshold_percent: 70.0,
            memory_spike_threshold_percent: 30.0,
            alerting_enabled: true,
            log_level: "info".to_string(),
            capture: CaptureConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("./profiles"),
            max_files: 10,
            min_interval_sec: 60,
            on_severities: vec![Severity::Critical],
        }
    }
}

impl CaptureConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_sec)
    }

    pub(crate) fn wants(&self, severity: Severity) -> bool {
        if self.on_severities.is_empty() {
            return severity == Severity::Critical;
        }
        self.on_severities.contains(&severity)
    }
}

impl ProfilerConfig {
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    /// Defaults, then the optional file, then `MEMSIGHT_*` environment
    /// overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.overlay_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a `.json` or `.toml` file over the defaults. Not validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |reason: String| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        };

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") => serde_json::from_str(&data).map_err(|e| parse_err(e.to_string())),
            Some("toml") => toml::from_str(&data).map_err(|e| parse_err(e.to_string())),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Apply `MEMSIGHT_*` overrides read through `lookup`. Every malformed
    /// value is reported, not just the first.
    pub fn overlay_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvOverlay {
            lookup,
            problems: Vec::new(),
        };

        env.apply("SAMPLING_INTERVAL_MS", &mut self.sampling_interval_ms, parse_num);
        env.apply("RETENTION_WINDOW_SEC", &mut self.retention_window_sec, parse_num);
        env.apply("MAX_HISTORY_SAMPLES", &mut self.max_history_samples, parse_num);
        env.apply(
            "HIGH_RETENTION_THRESHOLD_PERCENT",
            &mut self.high_retention_threshold_percent,
            parse_num,
        );
        env.apply(
            "MEMORY_SPIKE_THRESHOLD_PERCENT",
            &mut self.memory_spike_threshold_percent,
            parse_num,
        );
        env.apply("ALERTING_ENABLED", &mut self.alerting_enabled, parse_bool);
        env.apply("LOG_LEVEL", &mut self.log_level, |v| Ok(v.trim().to_string()));
        env.apply("CAPTURE_ENABLED", &mut self.capture.enabled, parse_bool);
        env.apply("CAPTURE_DIR", &mut self.capture.dir, |v| Ok(PathBuf::from(v)));
        env.apply("CAPTURE_MAX_FILES", &mut self.capture.max_files, parse_num);
        env.apply(
            "CAPTURE_MIN_INTERVAL_SEC",
            &mut self.capture.min_interval_sec,
            parse_num,
        );
        env.apply(
            "CAPTURE_ON_SEVERITIES",
            &mut self.capture.on_severities,
            parse_severities,
        );

        if env.problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Env {
                problems: env.problems,
            })
        }
    }

    /// Check every field and report all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.sampling_interval_ms == 0 {
            problems.push("sampling_interval_ms must be > 0".to_string());
        }
        if self.retention_window_sec == 0 {
            problems.push("retention_window_sec must be > 0".to_string());
        } else if self.retention_window_sec.saturating_mul(1_000) < self.sampling_interval_ms {
            problems.push(format!(
                "retention_window_sec ({}) is too small for sampling_interval_ms ({})",
                self.retention_window_sec, self.sampling_interval_ms
            ));
        }
        if self.max_history_samples == 0 {
            problems.push("max_history_samples must be > 0".to_string());
        }
        check_percent(
            &mut problems,
            "high_retention_threshold_percent",
            self.high_retention_threshold_percent,
        );
        check_percent(
            &mut problems,
            "memory_spike_threshold_percent",
            self.memory_spike_threshold_percent,
        );
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            problems.push(format!(
                "log_level must be one of [{}] (got {:?})",
                LOG_LEVELS.join(", "),
                self.log_level
            ));
        }
        if self.capture.enabled && self.capture.dir.as_os_str().is_empty() {
            problems.push("capture.dir must not be empty when capture is enabled".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }
}

fn check_percent(problems: &mut Vec<String>, name: &str, value: f64) {
    // NaN fails both comparisons, hence the negation.
    if !(value > 0.0 && value <= 100.0) {
        problems.push(format!("{name} must be in (0, 100] (got {value:.2})"));
    }
}

struct EnvOverlay<F> {
    lookup: F,
    problems: Vec<String>,
}

impl<F: Fn(&str) -> Option<String>> EnvOverlay<F> {
    fn apply<T>(&mut self, suffix: &str, slot: &mut T, parse: impl Fn(&str) -> Result<T, String>) {
        let var = format!("{ENV_PREFIX}{suffix}");
        let Some(raw) = (self.lookup)(&var) else {
            return;
        };
        match parse(&raw) {
            Ok(value) => *slot = value,
            Err(reason) => self.problems.push(format!("{var}: {reason}")),
        }
    }
}

fn parse_num<T>(raw: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| format!("invalid number {raw:?}: {e}"))
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => Ok(true),
        "0" | "false" | "f" | "no" | "n" => Ok(false),
        _ => Err(format!("invalid boolean value {raw:?}")),
    }
}

fn parse_severities(raw: &str) -> Result<Vec<Severity>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Severity::parse(s).ok_or_else(|| format!("unknown severity {s:?}")))
        .collect()
}
