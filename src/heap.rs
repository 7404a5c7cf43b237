use serde::{Deserialize, Serialize};

use crate::error::HeapStatError;

/// Point-in-time heap counters, as reported by a [`HeapStatSource`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapStats {
    /// Bytes currently allocated and not yet freed
    pub heap_alloc_bytes: u64,
    /// Bytes held by live allocations
    pub heap_inuse_bytes: u64,
    /// Bytes reserved at some point but not in use anymore
    pub heap_idle_bytes: u64,
    /// Bytes returned to the operating system
    pub heap_released_bytes: u64,
    /// Completed collection cycles (0 when there is no collector)
    pub num_gc: u32,
    /// Unix seconds of the last collection, 0 if none
    pub last_gc_unix: i64,
    /// Heap size that triggers the next collection, 0 if unknown
    pub next_gc_bytes: u64,
    /// Cumulative bytes allocated over the process lifetime
    pub total_alloc_bytes: u64,
}

/// Where a sampling cycle reads heap statistics from.
///
/// Reads must be side-effect free as far as the profiler is concerned: the
/// cycle calls `read` while holding its exclusive section.
pub trait HeapStatSource: Send + Sync {
    fn read(&self) -> Result<HeapStats, HeapStatError>;
}

impl<F> HeapStatSource for F
where
    F: Fn() -> Result<HeapStats, HeapStatError> + Send + Sync,
{
    fn read(&self) -> Result<HeapStats, HeapStatError> {
        self()
    }
}

/// A source that always reports the same statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedHeapSource(pub HeapStats);

impl FixedHeapSource {
    /// Only `heap_alloc_bytes` (and the in-use mirror) set; handy for tests.
    pub fn with_heap_alloc(bytes: u64) -> Self {
        Self(HeapStats {
            heap_alloc_bytes: bytes,
            heap_inuse_bytes: bytes,
            total_alloc_bytes: bytes,
            ..HeapStats::default()
        })
    }
}

impl HeapStatSource for FixedHeapSource {
    fn read(&self) -> Result<HeapStats, HeapStatError> {
        Ok(self.0)
    }
}
