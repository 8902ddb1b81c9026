//! Bounded in-memory dedup window for remote message ids.

use std::collections::{HashSet, VecDeque};

/// Insertion-ordered set of recently seen ids with a hard cap.
///
/// When an insert pushes the set past its cap, the oldest entries are
/// dropped until only the most recent half remain.
pub struct RecentIds {
    cap: usize,
    keep: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            keep: cap / 2,
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn insert(&mut self, id: &str) {
        if !self.seen.insert(id.to_string()) {
            return;
        }
        self.order.push_back(id.to_string());

        if self.order.len() > self.cap {
            while self.order.len() > self.keep {
                if let Some(oldest) = self.order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_after_insert() {
        let mut ids = RecentIds::new(10);
        assert!(!ids.contains("a"));
        ids.insert("a");
        assert!(ids.contains("a"));
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_reinsert_does_not_duplicate() {
        let mut ids = RecentIds::new(10);
        ids.insert("a");
        ids.insert("a");
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_trims_to_most_recent_half() {
        let mut ids = RecentIds::new(10);
        for i in 0..11 {
            ids.insert(&format!("id-{i}"));
        }

        // exceeded the cap of 10, trimmed down to the newest 5
        assert_eq!(ids.len(), 5);
        for i in 0..6 {
            assert!(!ids.contains(&format!("id-{i}")), "id-{i} should be gone");
        }
        for i in 6..11 {
            assert!(ids.contains(&format!("id-{i}")), "id-{i} should remain");
        }
    }

    #[test]
    fn test_never_exceeds_cap() {
        let mut ids = RecentIds::new(6);
        for i in 0..100 {
            ids.insert(&format!("id-{i}"));
            assert!(ids.len() <= 6);
        }
    }
}
