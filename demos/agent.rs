use std::{collections::HashMap, path::PathBuf, time::Duration};

use memsight::{CountingAllocator, EstimateSize, HealthChecker, Profiler, ProfilerConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator::new();

struct Session {
    user: String,
    scratch: Vec<u8>,
}

impl EstimateSize for Session {
    fn estimated_size(&self) -> u64 {
        self.user.estimated_size() + self.scratch.estimated_size()
    }
}

// Pass a .json or .toml config path as the first argument; MEMSIGHT_* variables override it.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let mut config = ProfilerConfig::load(path.as_deref())?;
    if path.is_none() {
        config.sampling_interval_ms = 200;
    }
    memsight::logging::init(&config.log_level)?;

    let profiler = Profiler::new(config, &ALLOCATOR);
    let health = HealthChecker::new(profiler.clone(), profiler.config().sampling_interval());
    let shutdown = CancellationToken::new();
    let handle = profiler
        .start(shutdown.clone())
        .ok_or("sampling loop already running")?;

    let mut sessions: HashMap<u32, Session> = HashMap::new();
    for round in 0..10_u32 {
        let tracker = profiler.tracker("demo", "POST /login");
        let session = Session {
            user: format!("user-{round}"),
            scratch: vec![0; 16 * 1024],
        };
        tracker.track(&session, Some("session"));
        sessions.insert(round, session);
        profiler.record(&sessions, "session-cache");

        let body = vec![0_u8; 4 * 1024];
        tracker.track(&body, None);

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    shutdown.cancel();
    handle.await?;

    info!(state = ?profiler.state(), readiness = ?health.readiness(), "agent stopped");
    if let Some(latest) = profiler.latest() {
        println!("{}", serde_json::to_string_pretty(&latest)?);
    }
    for suggestion in profiler.suggestions() {
        println!("[{}] {}", suggestion.severity, suggestion.message);
    }
    for alert in profiler.alerts() {
        println!("alert {} ({}): {}", alert.id, alert.severity, alert.message);
    }
    Ok(())
}
