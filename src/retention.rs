//! Retention estimates: how much of the heap each ledger key accounts for.

use crate::{ledger::Ledger, stats::RetentionStat};

/// Rebuild the retention table from the ledger and the current heap size.
///
/// Retained bytes are the key's cumulative allocated bytes: a conservative,
/// non-decreasing proxy, not live residency. A zero heap yields an empty
/// table, as do keys with zero bytes.
pub fn estimate(ledger: &Ledger, heap_alloc_bytes: u64) -> Vec<RetentionStat> {
    if heap_alloc_bytes == 0 {
        return Vec::new();
    }
    let heap = heap_alloc_bytes as f64;

    ledger
        .iter()
        .filter(|alloc| alloc.total_alloc_bytes > 0)
        .map(|alloc| {
            let retained = alloc.total_alloc_bytes;
            RetentionStat {
                type_name: alloc.type_name.clone(),
                tag: alloc.tag.clone(),
                retained_bytes: retained,
                retained_percent: (100.0 * retained as f64 / heap).max(0.0),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_relative_to_heap() {
        let mut ledger = Ledger::new();
        ledger.record("Foo", "a", 150);
        ledger.record("Bar", "b", 250);

        let mut table = estimate(&ledger, 1000);
        table.sort_by(|a, b| a.type_name.cmp(&b.type_name));

        assert_eq!(table.len(), 2);
        assert_eq!(table[0].type_name, "Bar");
        assert_eq!(table[0].retained_bytes, 250);
        assert!((table[0].retained_percent - 25.0).abs() < f64::EPSILON);
        assert!((table[1].retained_percent - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_heap_clears_the_table() {
        let mut ledger = Ledger::new();
        ledger.record("Foo", "a", 150);
        assert!(estimate(&ledger, 0).is_empty());
    }

    #[test]
    fn percent_can_exceed_one_hundred() {
        let mut ledger = Ledger::new();
        ledger.record("Foo", "a", 300);
        let table = estimate(&ledger, 100);
        assert!((table[0].retained_percent - 300.0).abs() < f64::EPSILON);
    }
}
