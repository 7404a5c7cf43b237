use std::{
    alloc::{GlobalAlloc, Layout},
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    error::HeapStatError,
    heap::{HeapStatSource, HeapStats},
};

/// A global allocator that counts heap traffic and serves it as [`HeapStats`].
///
/// ```rust
/// use memsight::{CountingAllocator, HeapStatSource};
///
/// #[global_allocator]
/// static ALLOCATOR: CountingAllocator = CountingAllocator::new();
///
/// fn main() {
///     let buffer = vec![0_u8; 4096];
///     let stats = ALLOCATOR.read().unwrap();
///     assert!(stats.heap_alloc_bytes >= buffer.len() as u64);
/// }
/// ```
///
/// The counters are plain relaxed atomics: a reading taken while other
/// threads allocate is approximate, which is fine for trend sampling.
pub struct CountingAllocator {
    alloc: std::alloc::System,
    live_bytes: AtomicU64,
    peak_bytes: AtomicU64,
    total_alloc_bytes: AtomicU64,
    alloc_count: AtomicU64,
    dealloc_count: AtomicU64,
}

impl Default for CountingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CountingAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountingAllocator")
            .field("live_bytes", &self.live_bytes.load(Ordering::Relaxed))
            .field("alloc_count", &self.alloc_count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CountingAllocator {
    pub const fn new() -> Self {
        CountingAllocator {
            alloc: std::alloc::System,
            live_bytes: AtomicU64::new(0),
            peak_bytes: AtomicU64::new(0),
            total_alloc_bytes: AtomicU64::new(0),
            alloc_count: AtomicU64::new(0),
            dealloc_count: AtomicU64::new(0),
        }
    }

    /// Number of allocations served so far.
    pub fn alloc_count(&self) -> u64 {
        self.alloc_count.load(Ordering::Relaxed)
    }

    /// Number of deallocations served so far.
    pub fn dealloc_count(&self) -> u64 {
        self.dealloc_count.load(Ordering::Relaxed)
    }

    fn on_alloc(&self, size: usize) {
        let size = size as u64;
        let live = self.live_bytes.fetch_add(size, Ordering::Relaxed) + size;
        self.peak_bytes.fetch_max(live, Ordering::Relaxed);
        self.total_alloc_bytes.fetch_add(size, Ordering::Relaxed);
        self.alloc_count.fetch_add(1, Ordering::Relaxed);
    }

    fn on_dealloc(&self, size: usize) {
        let size = size as u64;
        // Saturate: memory allocated before this allocator was consulted can be freed through it.
        let _ = self
            .live_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |live| {
                Some(live.saturating_sub(size))
            });
        self.dealloc_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counters mapped onto [`HeapStats`].
    ///
    /// Rust has no collector, so the GC-related fields stay zero. Idle bytes
    /// are the distance between the high-water mark and the live heap.
    pub fn snapshot(&self) -> HeapStats {
        let live = self.live_bytes.load(Ordering::Relaxed);
        let peak = self.peak_bytes.load(Ordering::Relaxed).max(live);
        HeapStats {
            heap_alloc_bytes: live,
            heap_inuse_bytes: live,
            heap_idle_bytes: peak - live,
            heap_released_bytes: 0,
            num_gc: 0,
            last_gc_unix: 0,
            next_gc_bytes: 0,
            total_alloc_bytes: self.total_alloc_bytes.load(Ordering::Relaxed),
        }
    }
}

impl HeapStatSource for CountingAllocator {
    fn read(&self) -> Result<HeapStats, HeapStatError> {
        if self.alloc_count() == 0 {
            return Err(HeapStatError::Unavailable(
                "CountingAllocator is not installed as the global allocator".to_string(),
            ));
        }
        Ok(self.snapshot())
    }
}

/// Lets the `#[global_allocator]` static be handed to a profiler directly.
impl HeapStatSource for &'static CountingAllocator {
    fn read(&self) -> Result<HeapStats, HeapStatError> {
        (**self).read()
    }
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.alloc.alloc(layout) };
        if !ptr.is_null() {
            self.on_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.alloc.alloc_zeroed(layout) };
        if !ptr.is_null() {
            self.on_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { self.alloc.dealloc(ptr, layout) };
        self.on_dealloc(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { self.alloc.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            self.on_dealloc(layout.size());
            self.on_alloc(new_size);
        }
        new_ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_allocator_reports_unavailable() {
        let allocator = CountingAllocator::new();
        assert!(matches!(
            allocator.read(),
            Err(HeapStatError::Unavailable(_))
        ));
    }

    #[test]
    fn counters_follow_alloc_and_dealloc() {
        let allocator = CountingAllocator::new();
        let layout = Layout::from_size_align(256, 8).unwrap();

        let ptr = unsafe { allocator.alloc(layout) };
        assert!(!ptr.is_null());
        let stats = allocator.read().unwrap();
        assert_eq!(stats.heap_alloc_bytes, 256);
        assert_eq!(stats.total_alloc_bytes, 256);
        assert_eq!(stats.heap_idle_bytes, 0);

        unsafe { allocator.dealloc(ptr, layout) };
        let stats = allocator.read().unwrap();
        assert_eq!(stats.heap_alloc_bytes, 0);
        assert_eq!(stats.heap_idle_bytes, 256);
        assert_eq!(stats.total_alloc_bytes, 256);
        assert_eq!(allocator.dealloc_count(), 1);
    }

    #[test]
    fn realloc_moves_live_bytes() {
        let allocator = CountingAllocator::new();
        let layout = Layout::from_size_align(64, 8).unwrap();

        let ptr = unsafe { allocator.alloc(layout) };
        let grown = unsafe { allocator.realloc(ptr, layout, 192) };
        assert!(!grown.is_null());

        let stats = allocator.snapshot();
        assert_eq!(stats.heap_alloc_bytes, 192);
        assert_eq!(stats.total_alloc_bytes, 64 + 192);

        let grown_layout = Layout::from_size_align(192, 8).unwrap();
        unsafe { allocator.dealloc(grown, grown_layout) };
        assert_eq!(allocator.snapshot().heap_alloc_bytes, 0);
    }
}
