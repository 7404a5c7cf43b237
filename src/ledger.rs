use std::collections::HashMap;

use crate::stats::AllocationStat;

pub(crate) const DEFAULT_TAG: &str = "default";

/// Cumulative allocation counters keyed by `(type_name, tag)`.
///
/// Keys are never removed. The two-level map lets an existing key be
/// updated from borrowed strings, so the hot path does not allocate.
#[derive(Debug, Default)]
pub struct Ledger {
    by_type: HashMap<String, HashMap<String, AllocationStat>>,
    len: usize,
}

/// Blank tags are folded into `"default"`.
pub(crate) fn normalize_tag(tag: &str) -> &str {
    if tag.is_empty() { DEFAULT_TAG } else { tag }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one observation of `bytes` to the `(type_name, tag)` entry.
    /// Zero-byte observations are ignored.
    pub fn record(&mut self, type_name: &str, tag: &str, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let tag = normalize_tag(tag);

        if !self.by_type.contains_key(type_name) {
            self.by_type.insert(type_name.to_string(), HashMap::new());
        }
        let Some(tags) = self.by_type.get_mut(type_name) else {
            return;
        };
        if !tags.contains_key(tag) {
            tags.insert(tag.to_string(), AllocationStat::new(type_name, tag));
            self.len += 1;
        }
        if let Some(stat) = tags.get_mut(tag) {
            stat.add(bytes);
        }
    }

    pub fn get(&self, type_name: &str, tag: &str) -> Option<&AllocationStat> {
        self.by_type
            .get(type_name)
            .and_then(|tags| tags.get(normalize_tag(tag)))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entries in map order (unspecified).
    pub fn iter(&self) -> impl Iterator<Item = &AllocationStat> {
        self.by_type.values().flat_map(|tags| tags.values())
    }

    /// Top `limit` entries by `total_alloc_bytes`, descending. `0` returns all.
    pub fn top(&self, limit: usize) -> Vec<AllocationStat> {
        top_by(self.iter().cloned().collect(), limit, |stat| {
            stat.total_alloc_bytes
        })
    }
}

/// Sort `items` by `weight` descending, ties by `(type_name, tag)`, and
/// keep the first `limit` (`0` keeps everything).
pub(crate) fn top_by<T, F>(mut items: Vec<T>, limit: usize, weight: F) -> Vec<T>
where
    T: Keyed,
    F: Fn(&T) -> u64,
{
    items.sort_by(|a, b| {
        weight(b)
            .cmp(&weight(a))
            .then_with(|| a.key().cmp(&b.key()))
    });
    if limit > 0 {
        items.truncate(limit);
    }
    items
}

pub(crate) trait Keyed {
    fn key(&self) -> (&str, &str);
}

impl Keyed for AllocationStat {
    fn key(&self) -> (&str, &str) {
        (&self.type_name, &self.tag)
    }
}

impl Keyed for crate::stats::RetentionStat {
    fn key(&self) -> (&str, &str) {
        (&self.type_name, &self.tag)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn counters_accumulate_per_key() {
        let mut ledger = Ledger::new();
        for bytes in [8_u64, 8, 16] {
            ledger.record("Vec<u8>", "upload", bytes);
        }
        ledger.record("Vec<u8>", "download", 4);

        let stat = ledger.get("Vec<u8>", "upload").unwrap();
        assert_eq!(stat.alloc_count, 3);
        assert_eq!(stat.total_alloc_bytes, 32);
        assert_eq!(stat.average_alloc_bytes, 10);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn empty_tag_is_default() {
        let mut ledger = Ledger::new();
        ledger.record("u64", "", 8);
        ledger.record("u64", DEFAULT_TAG, 8);

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("u64", "").unwrap().alloc_count, 2);
        assert_eq!(ledger.get("u64", "default").unwrap().tag, "default");
    }

    #[test]
    fn zero_bytes_do_not_create_entries() {
        let mut ledger = Ledger::new();
        ledger.record("()", "noise", 0);
        assert!(ledger.is_empty());
        assert!(ledger.top(10).is_empty());
    }

    #[test]
    fn top_orders_by_bytes_then_key() {
        let mut ledger = Ledger::new();
        ledger.record("b", "x", 100);
        ledger.record("a", "y", 100);
        ledger.record("c", "z", 500);
        ledger.record("d", "w", 1);

        let top: Vec<_> = ledger
            .top(3)
            .into_iter()
            .map(|s| (s.type_name, s.total_alloc_bytes))
            .collect();
        assert_eq!(
            top,
            vec![
                ("c".to_string(), 500),
                ("a".to_string(), 100),
                ("b".to_string(), 100)
            ]
        );
        assert_eq!(ledger.top(0).len(), 4);
        assert_eq!(ledger.top(99).len(), 4);
    }
}
