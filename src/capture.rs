//! Heap-profile captures and capture-file rotation.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::SystemTime,
};

use chrono::{DateTime, Utc};
use fxprof_processed_profile::{
    CategoryColor, CategoryHandle, CategoryPairHandle, Frame as FxFrame,
    FrameFlags as FxFrameFlags, FrameInfo as FxFrameInfo, Profile, ReferenceTimestamp,
    SamplingInterval, StackHandle, ThreadHandle, Timestamp,
};
use tracing::debug;

use crate::{
    error::CaptureError,
    stats::{AllocationStat, ProfilerSnapshot, TypeClass, guess_type_class},
};

/// Everything a capture gets to see, copied out of the engine.
#[derive(Debug, Clone)]
pub struct CaptureInput {
    pub taken_at: DateTime<Utc>,
    /// Retained history, oldest first
    pub history: Vec<ProfilerSnapshot>,
    /// Full allocation ledger, largest first
    pub allocations: Vec<AllocationStat>,
}

/// Side-effecting collaborator that persists a heap profile.
pub trait HeapCapture: Send + Sync {
    /// Write one capture and return where it went.
    fn capture(&self, input: &CaptureInput) -> Result<PathBuf, CaptureError>;
}

/// Writes captures as Firefox Profiler JSON files and rotates old ones.
///
/// Open the files at <https://profiler.firefox.com>: the `Heap` thread plots
/// heap growth across the retained history, the `Ledger` thread shows the
/// allocation ledger as `tag -> type` call trees.
///
/// Files are named `heap-YYYYMMDD-HHMMSS.mmmZ-NNNNNN.json`; the trailing
/// per-instance sequence keeps captures taken within one millisecond apart.
#[derive(Debug)]
pub struct FirefoxCapture {
    dir: PathBuf,
    max_files: usize,
    prefix: String,
    seq: AtomicU64,
}

impl FirefoxCapture {
    pub fn new(dir: impl Into<PathBuf>, max_files: usize) -> Self {
        Self {
            dir: dir.into(),
            max_files,
            prefix: "heap".to_string(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl HeapCapture for FirefoxCapture {
    fn capture(&self, input: &CaptureInput) -> Result<PathBuf, CaptureError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| CaptureError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!(
            "{}-{}-{seq:06}.json",
            self.prefix,
            input.taken_at.format("%Y%m%d-%H%M%S%.3fZ")
        );
        let path = self.dir.join(name);

        let profile = HeapProfileBuilder::new(input.taken_at, input.history.first())
            .ingest(input)
            .finish();
        let json = serde_json::to_vec(&profile)?;
        std::fs::write(&path, json).map_err(|source| CaptureError::Write {
            path: path.clone(),
            source,
        })?;

        if let Err(e) = rotate(&self.dir, self.max_files, &self.prefix) {
            debug!(dir = %self.dir.display(), error = %e, "capture rotation failed");
        }
        Ok(path)
    }
}

/// Keep only the newest `max_files` files named `{prefix}-*` in `dir`.
/// `max_files == 0` keeps everything. Returns how many files were removed.
pub fn rotate(dir: &Path, max_files: usize, prefix: &str) -> std::io::Result<usize> {
    if max_files == 0 {
        return Ok(0);
    }
    let wanted = format!("{prefix}-");

    let mut files: Vec<(SystemTime, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&wanted))
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .collect();
    if files.len() <= max_files {
        return Ok(0);
    }

    // Newest first; names embed the capture time, so they break mtime ties.
    files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    let mut removed = 0;
    for (_, path) in files.into_iter().skip(max_files) {
        if std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

struct HeapProfileBuilder {
    profile: Profile,
    heap_thread: ThreadHandle,
    ledger_thread: ThreadHandle,
    categories: CategoryHandles,
    reference: DateTime<Utc>,
    last_timestamp: Timestamp,
}

impl HeapProfileBuilder {
    fn new(taken_at: DateTime<Utc>, first: Option<&ProfilerSnapshot>) -> Self {
        let reference = first.map_or(taken_at, |s| s.timestamp.min(taken_at));
        let mut profile = Profile::new(
            "memsight heap capture",
            ReferenceTimestamp::from(SystemTime::from(reference)),
            SamplingInterval::from_millis(1),
        );

        let start = Timestamp::from_millis_since_reference(0.0);
        let process = profile.add_process("memsight", std::process::id(), start);
        let heap_thread = profile.add_thread(process, 1, start, true);
        profile.set_thread_name(heap_thread, "Heap");
        let ledger_thread = profile.add_thread(process, 2, start, false);
        profile.set_thread_name(ledger_thread, "Ledger");
        profile.add_initial_visible_thread(heap_thread);
        profile.add_initial_visible_thread(ledger_thread);
        profile.add_initial_selected_thread(ledger_thread);

        let categories = CategoryHandles::new(&mut profile);

        Self {
            profile,
            heap_thread,
            ledger_thread,
            categories,
            reference,
            last_timestamp: start,
        }
    }

    fn offset(&self, at: DateTime<Utc>) -> Timestamp {
        let nanos = (at - self.reference)
            .num_nanoseconds()
            .unwrap_or(i64::MAX)
            .max(0);
        Timestamp::from_nanos_since_reference(nanos as u64)
    }

    fn ingest(mut self, input: &CaptureInput) -> Self {
        let (heap_thread, ledger_thread) = (self.heap_thread, self.ledger_thread);
        let mut previous = 0_u64;
        for (index, snap) in input.history.iter().enumerate() {
            let delta = to_i64(snap.heap_alloc_bytes) - to_i64(previous);
            previous = snap.heap_alloc_bytes;
            if delta == 0 {
                continue;
            }
            let timestamp = self.offset(snap.timestamp);
            let stack = self.build_stack(heap_thread, &["heap"], TypeClass::Other);
            self.profile.add_allocation_sample(
                heap_thread,
                timestamp,
                stack,
                index as u64,
                delta,
            );
            self.last_timestamp = timestamp;
        }

        let at = self.offset(input.taken_at);
        for (index, stat) in input.allocations.iter().enumerate() {
            let class = guess_type_class(&stat.type_name);
            let stack = self.build_stack(
                ledger_thread,
                &[stat.tag.as_str(), stat.type_name.as_str()],
                class,
            );
            self.profile.add_allocation_sample(
                ledger_thread,
                at,
                stack,
                index as u64,
                to_i64(stat.total_alloc_bytes),
            );
        }
        self.last_timestamp = at;
        self
    }

    fn build_stack(
        &mut self,
        thread: ThreadHandle,
        labels: &[&str],
        leaf_class: TypeClass,
    ) -> Option<StackHandle> {
        let last = labels.len().saturating_sub(1);
        let frames: Vec<FxFrameInfo> = labels
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let class = if i == last { leaf_class } else { TypeClass::Other };
                FxFrameInfo {
                    frame: FxFrame::Label(self.profile.intern_string(label)),
                    category_pair: self.categories.get(class),
                    flags: FxFrameFlags::empty(),
                }
            })
            .collect();

        if frames.is_empty() {
            None
        } else {
            self.profile.intern_stack_frames(thread, frames.into_iter())
        }
    }

    fn finish(mut self) -> Profile {
        self.profile
            .set_thread_end_time(self.heap_thread, self.last_timestamp);
        self.profile
            .set_thread_end_time(self.ledger_thread, self.last_timestamp);
        self.profile
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

struct CategoryHandles {
    buffer: CategoryPairHandle,
    message: CategoryPairHandle,
    cache: CategoryPairHandle,
    other: CategoryPairHandle,
}

impl CategoryHandles {
    fn new(profile: &mut Profile) -> Self {
        let buffer = profile.add_category("Buffers", CategoryColor::Blue).into();
        let message = profile
            .add_category("Messages", CategoryColor::Green)
            .into();
        let cache = profile.add_category("Caches", CategoryColor::Orange).into();
        let other = CategoryHandle::OTHER.into();

        Self {
            buffer,
            message,
            cache,
            other,
        }
    }

    fn get(&self, class: TypeClass) -> CategoryPairHandle {
        match class {
            TypeClass::Buffer => self.buffer,
            TypeClass::Message => self.message,
            TypeClass::Cache => self.cache,
            TypeClass::Other => self.other,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::heap::HeapStats;

    fn input(now: DateTime<Utc>) -> CaptureInput {
        let heap = |bytes| HeapStats {
            heap_alloc_bytes: bytes,
            ..HeapStats::default()
        };
        CaptureInput {
            taken_at: now,
            history: vec![
                ProfilerSnapshot::new(now - Duration::seconds(2), &heap(1_000), vec![], vec![]),
                ProfilerSnapshot::new(now - Duration::seconds(1), &heap(4_000), vec![], vec![]),
            ],
            allocations: vec![AllocationStat {
                type_name: "alloc::vec::Vec<u8>".to_string(),
                tag: "uploads".to_string(),
                alloc_count: 2,
                total_alloc_bytes: 2_048,
                average_alloc_bytes: 1_024,
            }],
        }
    }

    #[test]
    fn capture_writes_a_firefox_profile() {
        let dir = tempfile::tempdir().unwrap();
        let capture = FirefoxCapture::new(dir.path().join("nested"), 5);

        let path = capture.capture(&input(Utc::now())).unwrap();
        assert!(path.starts_with(dir.path().join("nested")));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("heap-") && name.ends_with("Z-000001.json"), "{name}");

        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("uploads"));
        assert!(json.contains("alloc::vec::Vec<u8>"));
        assert!(json.contains("Ledger"));
    }

    #[test]
    fn captures_in_the_same_millisecond_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let capture = FirefoxCapture::new(dir.path(), 0);
        let input = input(Utc::now());

        let first = capture.capture(&input).unwrap();
        let second = capture.capture(&input).unwrap();

        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
        let name = second.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("Z-000002.json"), "{name}");
    }

    #[test]
    fn rotate_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("heap-{i}.json")), "{}").unwrap();
        }
        std::fs::write(dir.path().join("other-1.json"), "{}").unwrap();

        let removed = rotate(dir.path(), 2, "heap").unwrap();
        assert_eq!(removed, 3);

        let mut left: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        left.sort();
        assert_eq!(left.len(), 3);
        assert!(left.contains(&"other-1.json".to_string()));
    }

    #[test]
    fn rotate_zero_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("heap-a.json"), "{}").unwrap();
        assert_eq!(rotate(dir.path(), 0, "heap").unwrap(), 0);
    }
}
