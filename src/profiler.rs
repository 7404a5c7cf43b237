use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    alerts::{self, Alert},
    capture::{CaptureInput, HeapCapture},
    config::ProfilerConfig,
    error::CaptureError,
    heap::{HeapStatSource, HeapStats},
    history::History,
    ledger::{self, Ledger},
    retention,
    size::{EstimateSize, Shape},
    stats::{AllocationStat, OptimizationSuggestion, ProfilerSnapshot, RetentionStat, Severity},
    suggest,
    tracker::Tracker,
};

/// Entries per table kept in every snapshot.
pub const SNAPSHOT_TOP_N: usize = 10;

/// Lifecycle of the sampling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    /// Constructed, `start` not called yet
    Idle = 0,
    /// Timer armed, waiting for the next tick
    Running = 1,
    /// Inside a cycle
    Sampling = 2,
    /// Cancellation observed, loop exited
    Stopped = 3,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoopState::Running,
            2 => LoopState::Sampling,
            3 => LoopState::Stopped,
            _ => LoopState::Idle,
        }
    }
}

/// What one call to [`Profiler::sample_now`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A snapshot was appended
    Sampled,
    /// The heap-stat source failed; nothing changed
    Skipped,
}

/// Everything guarded by the single engine lock.
#[derive(Debug)]
struct State {
    ledger: Ledger,
    retentions: Vec<RetentionStat>,
    suggestions: Vec<OptimizationSuggestion>,
    history: History,
    last_sample_at: Option<DateTime<Utc>>,
    last_capture_at: Option<DateTime<Utc>>,
    /// Set by the cycle that claimed an automatic capture, until it finishes
    capture_in_flight: bool,
}

struct Inner {
    config: ProfilerConfig,
    source: Box<dyn HeapStatSource>,
    capture: Option<Box<dyn HeapCapture>>,
    state: RwLock<State>,
    loop_state: AtomicU8,
    next_suggestion_id: AtomicU64,
    capture_count: AtomicU64,
    skipped_cycles: AtomicU64,
}

/// The profiler engine.
///
/// A cheap handle: clones share the same ledger, tables and history. Hand
/// clones to producers (for [`Profiler::record`]) and to whatever serves
/// the query API.
///
/// ```rust
/// use memsight::{FixedHeapSource, Profiler, ProfilerConfig};
///
/// let profiler = Profiler::new(ProfilerConfig::default(), FixedHeapSource::with_heap_alloc(4096));
/// profiler.record(&vec![0_u8; 512], "uploads");
/// profiler.sample_now();
///
/// let latest = profiler.latest().unwrap();
/// assert_eq!(latest.top_allocations[0].total_alloc_bytes, 512);
/// ```
#[derive(Clone)]
pub struct Profiler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`Profiler`] with optional collaborators.
pub struct ProfilerBuilder {
    config: ProfilerConfig,
    source: Box<dyn HeapStatSource>,
    capture: Option<Box<dyn HeapCapture>>,
}

impl ProfilerBuilder {
    /// Attach the collaborator used for automatic and on-demand captures.
    pub fn capture(mut self, capture: impl HeapCapture + 'static) -> Self {
        self.capture = Some(Box::new(capture));
        self
    }

    pub fn build(self) -> Profiler {
        let history = History::new(self.config.max_history_samples);
        Profiler {
            inner: Arc::new(Inner {
                config: self.config,
                source: self.source,
                capture: self.capture,
                state: RwLock::new(State {
                    ledger: Ledger::new(),
                    retentions: Vec::new(),
                    suggestions: Vec::new(),
                    history,
                    last_sample_at: None,
                    last_capture_at: None,
                    capture_in_flight: false,
                }),
                loop_state: AtomicU8::new(LoopState::Idle as u8),
                next_suggestion_id: AtomicU64::new(0),
                capture_count: AtomicU64::new(0),
                skipped_cycles: AtomicU64::new(0),
            }),
        }
    }
}

impl Profiler {
    /// A profiler without a capture collaborator. Sampling does not begin
    /// until [`Profiler::start`].
    pub fn new(config: ProfilerConfig, source: impl HeapStatSource + 'static) -> Self {
        Self::builder(config, source).build()
    }

    pub fn builder(config: ProfilerConfig, source: impl HeapStatSource + 'static) -> ProfilerBuilder {
        ProfilerBuilder {
            config,
            source: Box::new(source),
            capture: None,
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.inner.loop_state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LoopState) {
        self.inner.loop_state.store(state as u8, Ordering::Release);
    }

    /// Attribute one observed value to `tag` (empty means `"default"`).
    ///
    /// The type identifier is `std::any::type_name::<T>()`; values whose
    /// estimate is zero are ignored. Never fails.
    pub fn record<T: EstimateSize + ?Sized>(&self, value: &T, tag: &str) {
        self.record_bytes(std::any::type_name::<T>(), value.estimated_size(), tag);
    }

    /// Like [`Profiler::record`] for values described by an explicit shape.
    pub fn record_shape(&self, type_name: &str, shape: Shape, tag: &str) {
        self.record_bytes(type_name, shape.bytes(), tag);
    }

    fn record_bytes(&self, type_name: &str, bytes: u64, tag: &str) {
        if bytes == 0 || type_name.is_empty() {
            return;
        }
        self.inner.state.write().ledger.record(type_name, tag, bytes);
    }

    /// A request-scoped tracker that records under `base:route`.
    pub fn tracker(&self, base_tag: &str, route_tag: &str) -> Tracker {
        Tracker::new(self.clone(), base_tag, route_tag)
    }

    /// Spawn the sampling loop on the current tokio runtime.
    ///
    /// Only the first call on an instance spawns anything; later calls
    /// return `None`. The loop runs one cycle per tick until `shutdown` is
    /// cancelled. Cancellation is checked between cycles, never during one.
    ///
    /// Returns `None` without changing state when called outside a tokio
    /// runtime.
    pub fn start(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(component = "profiler", error = %e, "no tokio runtime, sampling loop not started");
                return None;
            }
        };
        self.inner
            .loop_state
            .compare_exchange(
                LoopState::Idle as u8,
                LoopState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()?;

        // tokio intervals reject a zero period.
        let period = self
            .inner
            .config
            .sampling_interval()
            .max(std::time::Duration::from_millis(1));
        info!(
            component = "profiler",
            sampling_interval_ms = self.inner.config.sampling_interval_ms,
            "starting sampling loop"
        );

        let profiler = self.clone();
        Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        info!(component = "profiler", reason = "cancelled", "stopping sampling loop");
                        break;
                    }
                    _ = ticker.tick() => {
                        profiler.set_state(LoopState::Sampling);
                        let pending = profiler.run_cycle();
                        if let Some(input) = pending {
                            let worker = profiler.clone();
                            let result = tokio::task::spawn_blocking(move || worker.write_capture(&input, true))
                                .await
                                .map_err(|e| {
                                    profiler.release_capture_slot();
                                    CaptureError::Task(e.to_string())
                                })
                                .and_then(|r| r);
                            if let Err(e) = result {
                                warn!(component = "profiler", error = %e, "auto heap capture failed");
                            }
                        }
                        profiler.set_state(LoopState::Running);
                    }
                }
            }
            profiler.set_state(LoopState::Stopped);
        }))
    }

    /// Run one full cycle on the calling thread, including any capture it
    /// triggers.
    pub fn sample_now(&self) -> CycleOutcome {
        let Some(pending) = self.try_cycle() else {
            return CycleOutcome::Skipped;
        };
        if let Some(input) = pending {
            if let Err(e) = self.write_capture(&input, true) {
                warn!(component = "profiler", error = %e, "auto heap capture failed");
            }
        }
        CycleOutcome::Sampled
    }

    fn run_cycle(&self) -> Option<CaptureInput> {
        self.try_cycle().flatten()
    }

    /// The exclusive part of a cycle: heap read, retention, suggestions,
    /// snapshot. Returns `None` when skipped, otherwise the capture (if any)
    /// to perform once the lock is released.
    fn try_cycle(&self) -> Option<Option<CaptureInput>> {
        let inner = &*self.inner;
        let mut state = inner.state.write();

        let heap = match inner.source.read() {
            Ok(heap) => heap,
            Err(e) => {
                drop(state);
                let skipped = inner.skipped_cycles.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(component = "profiler", error = %e, skipped, "skipping sampling cycle");
                return None;
            }
        };
        let now = Utc::now();

        let state = &mut *state;
        state.retentions = retention::estimate(&state.ledger, heap.heap_alloc_bytes);
        state.suggestions = suggest::generate(
            &state.retentions,
            &heap,
            inner.config.high_retention_threshold_percent,
            now,
            || inner.next_suggestion_id.fetch_add(1, Ordering::Relaxed) + 1,
        );

        let snapshot = build_snapshot(&state.ledger, &state.retentions, &heap, now);
        let capture = self
            .should_capture(&snapshot, state.capture_in_flight, state.last_capture_at, now)
            .then(|| CaptureInput {
                taken_at: now,
                history: Vec::new(),
                allocations: state.ledger.top(0),
            });
        // Claim the slot before the lock is released so an overlapping cycle
        // cannot pass the cooldown check while this capture is written.
        if capture.is_some() {
            state.capture_in_flight = true;
        }
        state.history.append(snapshot);
        state.last_sample_at = Some(now);

        debug!(
            component = "profiler",
            heap_alloc_bytes = heap.heap_alloc_bytes,
            ledger_keys = state.ledger.len(),
            suggestions = state.suggestions.len(),
            "sampling cycle complete"
        );

        Some(capture.map(|mut input| {
            input.history = state.history.query(0);
            input
        }))
    }

    /// Trigger rule: a top retention at or above the high threshold when
    /// `critical` captures are wanted, or at or above the spike threshold
    /// when `warning` captures are wanted, outside the cooldown and with no
    /// automatic capture still being written.
    fn should_capture(
        &self,
        snapshot: &ProfilerSnapshot,
        in_flight: bool,
        last_capture_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        let config = &self.inner.config;
        if !config.capture.enabled || self.inner.capture.is_none() || in_flight {
            return false;
        }

        let want_critical = config.capture.wants(Severity::Critical);
        let want_warning = config.capture.wants(Severity::Warning);
        let triggered = snapshot.top_retentions.iter().any(|rs| {
            (want_critical && rs.retained_percent >= config.high_retention_threshold_percent)
                || (want_warning && rs.retained_percent >= config.memory_spike_threshold_percent)
        });
        if !triggered {
            return false;
        }

        match last_capture_at {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= config.capture.min_interval()),
        }
    }

    fn write_capture(&self, input: &CaptureInput, automatic: bool) -> Result<PathBuf, CaptureError> {
        let result = match self.inner.capture.as_ref() {
            Some(capture) => capture.capture(input),
            None => Err(CaptureError::NotConfigured),
        };

        let path = {
            let mut state = self.inner.state.write();
            if automatic {
                state.capture_in_flight = false;
            }
            let path = result?;
            state.last_capture_at = Some(input.taken_at);
            path
        };
        let count = self.inner.capture_count.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            component = "profiler",
            path = %path.display(),
            automatic,
            count,
            "heap profile captured"
        );
        Ok(path)
    }

    fn release_capture_slot(&self) {
        self.inner.state.write().capture_in_flight = false;
    }

    /// Capture now, ignoring the trigger rule and the cooldown.
    pub fn capture_now(&self) -> Result<PathBuf, CaptureError> {
        if self.inner.capture.is_none() {
            return Err(CaptureError::NotConfigured);
        }
        let input = {
            let state = self.inner.state.read();
            CaptureInput {
                taken_at: Utc::now(),
                history: state.history.query(0),
                allocations: state.ledger.top(0),
            }
        };
        self.write_capture(&input, false)
    }

    /// Most recent snapshot, `None` before the first successful cycle.
    pub fn latest(&self) -> Option<ProfilerSnapshot> {
        self.inner.state.read().history.latest().cloned()
    }

    /// Up to `limit` most recent snapshots, oldest first; `0` means all.
    pub fn history(&self, limit: usize) -> Vec<ProfilerSnapshot> {
        self.inner.state.read().history.query(limit)
    }

    /// Ledger entries by `total_alloc_bytes`, descending; `0` means all.
    pub fn top_allocations(&self, limit: usize) -> Vec<AllocationStat> {
        self.inner.state.read().ledger.top(limit)
    }

    /// Retention entries of the last cycle by `retained_bytes`, descending.
    pub fn top_retentions(&self, limit: usize) -> Vec<RetentionStat> {
        let state = self.inner.state.read();
        ledger::top_by(state.retentions.clone(), limit, |rs| rs.retained_bytes)
    }

    /// Suggestions of the last cycle, unordered.
    pub fn suggestions(&self) -> Vec<OptimizationSuggestion> {
        self.inner.state.read().suggestions.clone()
    }

    pub fn last_sample_time(&self) -> Option<DateTime<Utc>> {
        self.inner.state.read().last_sample_at
    }

    /// Alerts for the current snapshot and suggestions, built on demand.
    pub fn alerts(&self) -> Vec<Alert> {
        let state = self.inner.state.read();
        alerts::build_alerts(
            state.history.latest(),
            &state.suggestions,
            &self.inner.config,
            Utc::now(),
        )
    }

    /// Successful captures, automatic and on-demand.
    pub fn capture_count(&self) -> u64 {
        self.inner.capture_count.load(Ordering::Relaxed)
    }

    /// Cycles skipped because the heap-stat source failed.
    pub fn skipped_cycles(&self) -> u64 {
        self.inner.skipped_cycles.load(Ordering::Relaxed)
    }
}

fn build_snapshot(
    ledger: &Ledger,
    retentions: &[RetentionStat],
    heap: &HeapStats,
    now: DateTime<Utc>,
) -> ProfilerSnapshot {
    ProfilerSnapshot::new(
        now,
        heap,
        ledger.top(SNAPSHOT_TOP_N),
        ledger::top_by(retentions.to_vec(), SNAPSHOT_TOP_N, |rs| rs.retained_bytes),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::HeapStatError, heap::FixedHeapSource};

    #[test]
    fn unstarted_profiler_answers_with_empty_results() {
        let profiler = Profiler::new(ProfilerConfig::default(), FixedHeapSource::with_heap_alloc(1));
        assert_eq!(profiler.state(), LoopState::Idle);
        assert!(profiler.latest().is_none());
        assert!(profiler.history(0).is_empty());
        assert!(profiler.top_allocations(0).is_empty());
        assert!(profiler.top_retentions(0).is_empty());
        assert!(profiler.suggestions().is_empty());
        assert!(profiler.last_sample_time().is_none());
    }

    #[test]
    fn start_outside_a_runtime_leaves_the_loop_idle() {
        let profiler = Profiler::new(ProfilerConfig::default(), FixedHeapSource::with_heap_alloc(1));
        assert!(profiler.start(CancellationToken::new()).is_none());
        assert_eq!(profiler.state(), LoopState::Idle);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let shutdown = CancellationToken::new();
        let handle = runtime
            .block_on(async { profiler.start(shutdown.clone()) })
            .unwrap();
        assert_eq!(profiler.state(), LoopState::Running);

        shutdown.cancel();
        runtime.block_on(handle).unwrap();
        assert_eq!(profiler.state(), LoopState::Stopped);
    }

    #[test]
    fn failed_source_skips_the_cycle() {
        let profiler = Profiler::new(ProfilerConfig::default(), || -> Result<HeapStats, HeapStatError> {
            Err(HeapStatError::Unavailable("offline".to_string()))
        });
        profiler.record(&[0_u8; 32], "t");

        assert_eq!(profiler.sample_now(), CycleOutcome::Skipped);
        assert_eq!(profiler.skipped_cycles(), 1);
        assert!(profiler.latest().is_none());
        assert!(profiler.last_sample_time().is_none());
        assert!(profiler.top_retentions(0).is_empty());
    }

    #[test]
    fn suggestion_ids_are_unique_across_cycles() {
        let config = ProfilerConfig {
            high_retention_threshold_percent: 1.0,
            ..ProfilerConfig::default()
        };
        let profiler = Profiler::new(config, FixedHeapSource::with_heap_alloc(100));
        profiler.record(&[0_u8; 50], "t");

        profiler.sample_now();
        let first = profiler.suggestions();
        profiler.sample_now();
        let second = profiler.suggestions();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].id, "suggestion-1");
        assert_eq!(second[0].id, "suggestion-2");
    }

    #[test]
    fn snapshot_tables_hold_at_most_ten_entries() {
        let profiler = Profiler::new(ProfilerConfig::default(), FixedHeapSource::with_heap_alloc(1 << 20));
        for i in 0..25_u64 {
            profiler.record_shape("Blob", Shape::Opaque { size: i + 1 }, &format!("tag-{i}"));
        }
        profiler.sample_now();

        let latest = profiler.latest().unwrap();
        assert_eq!(latest.top_allocations.len(), SNAPSHOT_TOP_N);
        assert_eq!(latest.top_retentions.len(), SNAPSHOT_TOP_N);
        assert_eq!(latest.top_allocations[0].total_alloc_bytes, 25);
        assert_eq!(latest.top_retentions[0].retained_bytes, 25);
        assert_eq!(profiler.top_allocations(0).len(), 25);
    }
}
