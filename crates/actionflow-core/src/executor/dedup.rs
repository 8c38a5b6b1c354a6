//! Bounded memory of completed task ids.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use uuid::Uuid;

/// FIFO-bounded set of task ids whose processing finished.
///
/// Redeliveries of a remembered task are acked without re-executing. Once
/// `capacity` ids are held the oldest is forgotten.
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    inner: Mutex<DedupInner>,
}

#[derive(Debug, Default)]
struct DedupInner {
    seen: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(DedupInner::default()),
        }
    }

    pub fn contains(&self, task_id: &Uuid) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.seen.contains(task_id))
            .unwrap_or(false)
    }

    /// Remember `task_id`. Returns `false` if it was already present.
    pub fn insert(&self, task_id: Uuid) -> bool {
        if self.capacity == 0 {
            return true;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return true;
        };
        if !inner.seen.insert(task_id) {
            return false;
        }
        inner.order.push_back(task_id);
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.order.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remembers_and_rejects_duplicates() {
        let cache = DedupCache::new(4);
        let id = Uuid::now_v7();
        assert!(!cache.contains(&id));
        assert!(cache.insert(id));
        assert!(cache.contains(&id));
        assert!(!cache.insert(id));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_oldest_beyond_capacity() {
        let cache = DedupCache::new(2);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::now_v7()).collect();
        for id in &ids {
            cache.insert(*id);
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&ids[0]));
        assert!(cache.contains(&ids[1]));
        assert!(cache.contains(&ids[2]));
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = DedupCache::new(0);
        let id = Uuid::now_v7();
        cache.insert(id);
        assert!(!cache.contains(&id));
        assert!(cache.is_empty());
    }
}
