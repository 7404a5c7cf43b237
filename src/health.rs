use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::{error::HealthError, profiler::Profiler};

/// Readiness and liveness judged from the profiler's last sample time.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    profiler: Profiler,
    interval: TimeDelta,
    created_at: DateTime<Utc>,
}

impl HealthChecker {
    pub fn new(profiler: Profiler, sampling_interval: Duration) -> Self {
        Self::with_start(profiler, sampling_interval, Utc::now())
    }

    fn with_start(profiler: Profiler, sampling_interval: Duration, created_at: DateTime<Utc>) -> Self {
        Self {
            profiler,
            interval: TimeDelta::from_std(sampling_interval).unwrap_or(TimeDelta::MAX),
            created_at,
        }
    }

    /// The process answers; always succeeds.
    pub fn liveness(&self) -> Result<(), HealthError> {
        Ok(())
    }

    pub fn readiness(&self) -> Result<(), HealthError> {
        self.readiness_at(Utc::now())
    }

    /// Readiness as of `now`.
    ///
    /// Ready during a grace period of two intervals while no sample exists,
    /// `NoSamples` after it, `Stale` once the last sample is older than
    /// three intervals.
    pub fn readiness_at(&self, now: DateTime<Utc>) -> Result<(), HealthError> {
        match self.profiler.last_sample_time() {
            None => {
                let grace = self.interval.checked_mul(2).unwrap_or(TimeDelta::MAX);
                if now - self.created_at <= grace {
                    Ok(())
                } else {
                    Err(HealthError::NoSamples)
                }
            }
            Some(last) => {
                let allowed = self.interval.checked_mul(3).unwrap_or(TimeDelta::MAX);
                let age = now - last;
                if age > allowed {
                    Err(HealthError::Stale {
                        age_ms: age.num_milliseconds(),
                        allowed_ms: allowed.num_milliseconds(),
                    })
                } else {
                    Ok(())
                }
            }
        }
    }
}
