//! Per-queue token buckets gating job leases.

use crate::{QueueId, RateLimit};
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// Fixed-window bucket: `tokens` admissions, refilled in full every `duration`.
#[derive(Debug, Clone)]
struct Bucket {
    limit: RateLimit,
    remaining: u64,
    window_started: DateTime<Utc>,
}

impl Bucket {
    fn full(limit: RateLimit, now: DateTime<Utc>) -> Self {
        Bucket {
            limit,
            remaining: limit.tokens,
            window_started: now,
        }
    }

    fn acquire(&mut self, now: DateTime<Utc>) -> bool {
        if !self.limit.is_active() {
            return true;
        }

        let window = Duration::from_std(self.limit.duration).unwrap_or_else(|_| Duration::zero());
        if now >= self.window_started + window {
            self.remaining = self.limit.tokens;
            self.window_started = now;
        }

        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

/// Admission gate for leases, one bucket per queue.
///
/// Buckets live here, keyed by queue ID, rather than inside `Queue` so that
/// queue values stay immutable snapshots. A queue without a bucket is
/// unlimited. Acquisition never blocks.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: DashMap<QueueId, Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            buckets: DashMap::new(),
        }
    }

    /// Install or change the limit of a queue.
    ///
    /// Any change of the limit (including disabled to enabled) starts a new
    /// window with a full bucket; re-applying the same limit keeps the
    /// current window.
    pub fn configure(&self, queue_id: QueueId, limit: RateLimit) {
        self.configure_at(queue_id, limit, Utc::now())
    }

    pub fn configure_at(&self, queue_id: QueueId, limit: RateLimit, now: DateTime<Utc>) {
        match self.buckets.entry(queue_id) {
            Entry::Occupied(mut entry) => {
                if entry.get().limit != limit {
                    debug!("Rate limit of queue {} changed to {:?}", queue_id, limit);
                    entry.insert(Bucket::full(limit, now));
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Bucket::full(limit, now));
            }
        }
    }

    /// Forget the bucket of a deleted queue
    pub fn remove(&self, queue_id: &QueueId) {
        self.buckets.remove(queue_id);
    }

    /// Take one token for `queue_id`; `false` means try again later
    pub fn try_acquire(&self, queue_id: &QueueId) -> bool {
        self.try_acquire_at(queue_id, Utc::now())
    }

    pub fn try_acquire_at(&self, queue_id: &QueueId, now: DateTime<Utc>) -> bool {
        match self.buckets.get_mut(queue_id) {
            Some(mut bucket) => bucket.acquire(now),
            None => true,
        }
    }

    /// Tokens left in the current window, `None` when the queue is unlimited
    pub fn available(&self, queue_id: &QueueId) -> Option<u64> {
        self.buckets
            .get(queue_id)
            .filter(|bucket| bucket.limit.is_active())
            .map(|bucket| bucket.remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    fn secs(n: u64) -> std::time::Duration {
        std::time::Duration::from_secs(n)
    }

    #[test]
    fn test_window_exhausts_then_refills() {
        let limiter = RateLimiter::new();
        let queue = Uuid::new_v4();
        let start = Utc::now();
        limiter.configure_at(queue, RateLimit::new(2, secs(60)), start);

        assert!(limiter.try_acquire_at(&queue, start + Duration::seconds(1)));
        assert!(limiter.try_acquire_at(&queue, start + Duration::seconds(2)));
        assert!(!limiter.try_acquire_at(&queue, start + Duration::seconds(3)));
        assert!(limiter.try_acquire_at(&queue, start + Duration::seconds(61)));
    }

    #[test]
    fn test_disabled_or_empty_limit_always_admits() {
        let limiter = RateLimiter::new();
        let unconfigured = Uuid::new_v4();
        let disabled = Uuid::new_v4();
        let no_tokens = Uuid::new_v4();
        let no_window = Uuid::new_v4();
        limiter.configure(disabled, RateLimit::disabled());
        limiter.configure(no_tokens, RateLimit::new(0, secs(60)));
        limiter.configure(no_window, RateLimit::new(2, secs(0)));

        for _ in 0..100 {
            assert!(limiter.try_acquire(&unconfigured));
            assert!(limiter.try_acquire(&disabled));
            assert!(limiter.try_acquire(&no_tokens));
            assert!(limiter.try_acquire(&no_window));
        }
        assert_eq!(limiter.available(&disabled), None);
        assert_eq!(limiter.available(&no_window), None);
    }

    #[test]
    fn test_enabling_resets_to_full_capacity() {
        let limiter = RateLimiter::new();
        let queue = Uuid::new_v4();
        let start = Utc::now();
        let limit = RateLimit::new(1, secs(3600));

        limiter.configure_at(queue, limit, start);
        assert!(limiter.try_acquire_at(&queue, start));
        assert!(!limiter.try_acquire_at(&queue, start));

        limiter.configure_at(queue, RateLimit { enabled: false, ..limit }, start);
        limiter.configure_at(queue, limit, start);
        assert_eq!(limiter.available(&queue), Some(1));
        assert!(limiter.try_acquire_at(&queue, start));
    }

    #[test]
    fn test_same_limit_keeps_window() {
        let limiter = RateLimiter::new();
        let queue = Uuid::new_v4();
        let limit = RateLimit::new(1, secs(3600));

        limiter.configure(queue, limit);
        assert!(limiter.try_acquire(&queue));
        limiter.configure(queue, limit);
        assert!(!limiter.try_acquire(&queue));
    }

    #[test]
    fn test_buckets_are_independent() {
        let limiter = RateLimiter::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        limiter.configure(a, RateLimit::new(1, secs(60)));
        limiter.configure(b, RateLimit::new(1, secs(60)));

        assert!(limiter.try_acquire(&a));
        assert!(!limiter.try_acquire(&a));
        assert!(limiter.try_acquire(&b));
    }

    #[test]
    fn test_concurrent_acquire_never_over_admits() {
        let limiter = Arc::new(RateLimiter::new());
        let queue = Uuid::new_v4();
        limiter.configure(queue, RateLimit::new(50, secs(3600)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..20).filter(|_| limiter.try_acquire(&queue)).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }
}
