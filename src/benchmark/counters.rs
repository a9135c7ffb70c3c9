//! Global atomic counters for thread synchronization
//!
//! These are the ONLY synchronization points between job threads besides
//! the backend session. All other state is thread-local.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global counters shared between all job threads
pub struct GlobalCounters {
    /// Operations claimed by jobs
    pub ops_issued: AtomicU64,

    /// Operations harvested (successful or not)
    pub ops_finished: AtomicU64,

    /// Bytes moved by successful operations
    pub bytes_transferred: AtomicU64,

    /// Operations that completed with an error
    pub error_count: AtomicU64,

    /// Shutdown signal
    pub shutdown: AtomicBool,

    /// Benchmark start time (for duration-based runs)
    start_time: Option<Instant>,

    /// Duration limit (if set, ignores the operation count)
    duration_limit: Option<Duration>,

    /// Total operation limit across all jobs
    total_ops: u64,
}

impl GlobalCounters {
    fn base() -> Self {
        Self {
            ops_issued: AtomicU64::new(0),
            ops_finished: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            start_time: None,
            duration_limit: None,
            total_ops: u64::MAX,
        }
    }

    /// Create new counters initialized to zero (unlimited operations)
    pub fn new() -> Self {
        Self::base()
    }

    /// Create counters with an operation limit
    pub fn with_ops(total: u64) -> Self {
        Self {
            total_ops: total,
            ..Self::base()
        }
    }

    /// Create counters with a duration limit (time-based run)
    pub fn with_duration(duration: Duration) -> Self {
        Self {
            start_time: Some(Instant::now()),
            duration_limit: Some(duration),
            ..Self::base()
        }
    }

    #[inline]
    pub fn is_duration_exceeded(&self) -> bool {
        if let (Some(start), Some(limit)) = (self.start_time, self.duration_limit) {
            start.elapsed() >= limit
        } else {
            false
        }
    }

    #[inline]
    pub fn is_duration_mode(&self) -> bool {
        self.duration_limit.is_some()
    }

    /// Total operation limit, `None` in duration mode
    pub fn total_ops(&self) -> Option<u64> {
        (!self.is_duration_mode()).then_some(self.total_ops)
    }

    /// Claim a batch of operations.
    /// Returns the starting operation number, or None if the quota is
    /// exhausted, the duration has passed or shutdown was signaled.
    #[inline]
    pub fn claim_batch(&self, batch_size: u64) -> Option<u64> {
        if self.is_shutdown() || self.is_duration_exceeded() {
            return None;
        }

        if self.is_duration_mode() {
            return Some(self.ops_issued.fetch_add(batch_size, Ordering::Relaxed));
        }

        let issued = self.ops_issued.fetch_add(batch_size, Ordering::Relaxed);
        if issued >= self.total_ops {
            // Undo the claim
            self.ops_issued.fetch_sub(batch_size, Ordering::Relaxed);
            None
        } else {
            Some(issued)
        }
    }

    /// Record harvested operations
    #[inline]
    pub fn record_finished(&self, count: u64, bytes: u64) {
        self.ops_finished.fetch_add(count, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Check if all operations have been issued (count mode only)
    #[inline]
    pub fn is_complete(&self) -> bool {
        if self.is_duration_mode() {
            return false;
        }
        self.ops_issued.load(Ordering::Relaxed) >= self.total_ops
    }

    #[inline]
    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Signal shutdown to all jobs
    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Get current progress as (finished, issued)
    pub fn progress(&self) -> (u64, u64) {
        (
            self.ops_finished.load(Ordering::Relaxed),
            self.ops_issued.load(Ordering::Relaxed),
        )
    }

    pub fn errors(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }
}

impl Default for GlobalCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_claim_batch() {
        let counters = GlobalCounters::with_ops(30);

        assert_eq!(counters.claim_batch(10), Some(0));
        assert_eq!(counters.claim_batch(10), Some(10));
        assert_eq!(counters.claim_batch(10), Some(20));
        assert_eq!(counters.claim_batch(10), None);
        assert!(counters.is_complete());
        assert_eq!(counters.total_ops(), Some(30));
    }

    #[test]
    fn test_concurrent_claims() {
        let total = 1000u64;
        let counters = Arc::new(GlobalCounters::with_ops(total));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&counters);
                thread::spawn(move || {
                    let mut claimed = 0u64;
                    while c.claim_batch(1).is_some() {
                        claimed += 1;
                    }
                    claimed
                })
            })
            .collect();

        let total_claimed: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total_claimed, total);
    }

    #[test]
    fn test_shutdown_stops_claims() {
        let counters = GlobalCounters::new();

        assert!(counters.claim_batch(1).is_some());
        counters.signal_shutdown();
        assert!(counters.is_shutdown());
        assert!(counters.claim_batch(1).is_none());
    }

    #[test]
    fn test_duration_mode() {
        let counters = GlobalCounters::with_duration(Duration::from_millis(10));
        assert!(counters.is_duration_mode());
        assert_eq!(counters.total_ops(), None);
        assert!(counters.claim_batch(1_000_000).is_some());
        assert!(!counters.is_complete());

        thread::sleep(Duration::from_millis(20));
        assert!(counters.is_duration_exceeded());
        assert!(counters.claim_batch(1).is_none());
    }

    #[test]
    fn test_progress() {
        let counters = GlobalCounters::with_ops(100);

        counters.claim_batch(50);
        counters.record_finished(25, 25 * 4096);
        counters.record_error();

        assert_eq!(counters.progress(), (25, 50));
        assert_eq!(counters.bytes(), 25 * 4096);
        assert_eq!(counters.errors(), 1);
    }
}
