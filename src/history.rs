use std::collections::VecDeque;

use crate::stats::ProfilerSnapshot;

/// Fixed-capacity FIFO of snapshots. A capacity of 0 keeps nothing.
#[derive(Debug)]
pub struct History {
    capacity: usize,
    entries: VecDeque<ProfilerSnapshot>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            // Grows on demand; large capacities are mostly never filled.
            entries: VecDeque::with_capacity(capacity.min(64)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append, evicting the oldest entry once full.
    pub fn append(&mut self, snapshot: ProfilerSnapshot) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
    }

    /// The most recent `limit` snapshots, oldest first. `0` or a limit at
    /// or above the stored count returns everything.
    pub fn query(&self, limit: usize) -> Vec<ProfilerSnapshot> {
        let len = self.entries.len();
        let take = if limit == 0 || limit > len { len } else { limit };
        self.entries.iter().skip(len - take).cloned().collect()
    }

    pub fn latest(&self) -> Option<&ProfilerSnapshot> {
        self.entries.back()
    }
}
