use memsight::{CountingAllocator, CycleOutcome, HeapStatSource, Profiler, ProfilerConfig};

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator::new();

const MIB: usize = 1024 * 1024;

#[inline(never)]
fn hold(size: usize) -> Vec<u8> {
    vec![1_u8; size]
}

#[test]
fn live_bytes_follow_the_process_heap() {
    let before = ALLOCATOR.read().unwrap();

    let buffer = hold(4 * MIB);
    let during = ALLOCATOR.read().unwrap();
    assert!(during.heap_alloc_bytes >= 4 * MIB as u64);
    assert!(during.total_alloc_bytes >= before.total_alloc_bytes + 4 * MIB as u64);
    assert_eq!(during.heap_inuse_bytes, during.heap_alloc_bytes);
    assert_eq!(during.num_gc, 0);

    let deallocs = ALLOCATOR.dealloc_count();
    drop(buffer);
    assert!(ALLOCATOR.dealloc_count() > deallocs);

    let after = ALLOCATOR.read().unwrap();
    assert!(after.total_alloc_bytes >= during.total_alloc_bytes);
    assert!(after.heap_idle_bytes > 0);
}

#[test]
fn profiler_samples_the_global_allocator() {
    let profiler = Profiler::new(ProfilerConfig::default(), &ALLOCATOR);
    let buffer = hold(MIB);
    profiler.record(&buffer, "buffers");

    assert_eq!(profiler.sample_now(), CycleOutcome::Sampled);

    let latest = profiler.latest().unwrap();
    assert!(latest.heap_alloc_bytes >= MIB as u64);
    let retention = &latest.top_retentions[0];
    assert_eq!(retention.tag, "buffers");
    assert!(retention.retained_percent > 0.0 && retention.retained_percent <= 100.0);
    drop(buffer);
}
