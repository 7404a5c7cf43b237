use memsight::{FirefoxCapture, FixedHeapSource, Profiler, ProfilerConfig, Shape};

fn main() {
    let mut config = ProfilerConfig::default();
    config.capture.enabled = true;
    config.capture.dir = std::env::current_dir().unwrap().join("profiles");

    let capture = FirefoxCapture::new(&config.capture.dir, config.capture.max_files);
    let profiler = Profiler::builder(config, FixedHeapSource::with_heap_alloc(1 << 20))
        .capture(capture)
        .build();

    profiler.record(&vec![0_u8; 300 * 1024], "uploads");
    profiler.record_shape(
        "app::SessionCache",
        Shape::Associative {
            len: 12_000,
            key_size: 8,
            value_size: 64,
        },
        "sessions",
    );
    profiler.record(&String::from("GET /health"), "");

    // The session cache alone is ~82% of the 1 MiB heap, above the 70% threshold,
    // so this cycle captures on its own.
    profiler.sample_now();
    let path = profiler.capture_now().unwrap();

    println!(
        "{} capture(s); open {} at https://profiler.firefox.com",
        profiler.capture_count(),
        path.display()
    );
}
