use crate::{profiler::Profiler, size::EstimateSize};

/// Request-scoped allocation tracker.
///
/// Built once per request (or job) and passed explicitly to the code that
/// handles it, so allocations are attributed to the route without any
/// ambient state.
///
/// ```rust
/// use memsight::{FixedHeapSource, Profiler, ProfilerConfig};
///
/// let profiler = Profiler::new(ProfilerConfig::default(), FixedHeapSource::default());
/// let tracker = profiler.tracker("api", "GET /items");
/// tracker.track(&vec![0_u64; 16], Some("page"));
///
/// let top = profiler.top_allocations(1);
/// assert_eq!(top[0].tag, "api:GET /items:page");
/// ```
#[derive(Debug, Clone)]
pub struct Tracker {
    profiler: Profiler,
    tag: String,
}

impl Tracker {
    pub fn new(profiler: Profiler, base_tag: &str, route_tag: &str) -> Self {
        let base_tag = base_tag.trim();
        let tag = if base_tag.is_empty() {
            route_tag.to_string()
        } else {
            format!("{base_tag}:{route_tag}")
        };
        Self { profiler, tag }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Record `value` under this tracker's tag, suffixed with `:subtag`
    /// when one is given and not blank.
    pub fn track<T: EstimateSize + ?Sized>(&self, value: &T, subtag: Option<&str>) {
        match subtag.map(str::trim).filter(|s| !s.is_empty()) {
            Some(subtag) => self
                .profiler
                .record(value, &format!("{}:{subtag}", self.tag)),
            None => self.profiler.record(value, &self.tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ProfilerConfig, heap::FixedHeapSource};

    fn profiler() -> Profiler {
        Profiler::new(ProfilerConfig::default(), FixedHeapSource::default())
    }

    #[test]
    fn tags_compose_base_route_and_subtag() {
        let profiler = profiler();
        let tracker = profiler.tracker(" svc ", "POST /upload");
        assert_eq!(tracker.tag(), "svc:POST /upload");

        tracker.track("payload", None);
        tracker.track("payload", Some("  "));
        tracker.track("payload", Some(" body "));

        let mut tags: Vec<_> = profiler
            .top_allocations(0)
            .into_iter()
            .map(|s| (s.tag, s.alloc_count))
            .collect();
        tags.sort();
        assert_eq!(
            tags,
            vec![
                ("svc:POST /upload".to_string(), 2),
                ("svc:POST /upload:body".to_string(), 1)
            ]
        );
    }

    #[test]
    fn blank_base_uses_route_only() {
        let tracker = Tracker::new(profiler(), "", "GET /");
        assert_eq!(tracker.tag(), "GET /");
    }
}
