use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use uuid::Uuid;

/// Bounded per-user cache of unread notification counts.
///
/// Entries are evicted oldest-inserted first once `capacity` users are held.
/// Every invalidation bumps a generation counter; a count read from the
/// database is only cached if no invalidation happened while it was being
/// read, so a slow reader cannot reinstate a stale value.
pub struct UnreadCounts {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    counts: HashMap<Uuid, usize>,
    order: VecDeque<Uuid>,
    generation: u64,
}

impl UnreadCounts {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn get(&self, user_id: Uuid) -> Option<usize> {
        let inner = self.inner.lock().ok()?;
        inner.counts.get(&user_id).copied()
    }

    /// Generation to pass to `insert` after reading a fresh count.
    pub fn generation(&self) -> u64 {
        self.inner.lock().map(|inner| inner.generation).unwrap_or(u64::MAX)
    }

    pub fn insert(&self, user_id: Uuid, count: usize, read_at: u64) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.generation != read_at {
            return;
        }
        if inner.counts.insert(user_id, count).is_none() {
            inner.order.push_back(user_id);
        }
        while inner.counts.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.counts.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn invalidate(&self, user_id: Uuid) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.generation = inner.generation.wrapping_add(1);
            if inner.counts.remove(&user_id).is_some() {
                inner.order.retain(|id| *id != user_id);
            }
        }
    }

    pub fn invalidate_all<I>(&self, user_ids: I)
    where
        I: IntoIterator<Item = Uuid>,
    {
        for user_id in user_ids {
            self.invalidate(user_id);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.counts.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
