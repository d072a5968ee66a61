//! Per-host sliding-window admission counter.
//!
//! Buckets are keyed by host (port stripped), so reconnect storms from one
//! machine share a budget regardless of source port. Stale timestamps are
//! purged lazily on each admission check and eagerly by a minutely sweep
//! that also removes empty buckets to bound memory.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::debug;

use crate::client_ip::host_key;

/// Sweep cadence for purging idle buckets.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    admissions: Mutex<HashMap<String, Vec<Instant>>>,
    max_per_host: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_per_host: usize, window: Duration) -> Self {
        Self {
            admissions: Mutex::new(HashMap::new()),
            max_per_host,
            window,
        }
    }

    /// Admission decision for one upgrade attempt from `remote_addr`.
    ///
    /// Admits iff fewer than the limit of admissions fall inside the
    /// window; an admit records the current timestamp. Always returns a
    /// decision.
    pub fn allow(&self, remote_addr: &str) -> bool {
        let host = host_key(remote_addr).to_string();
        let now = Instant::now();
        let cutoff = now.checked_sub(self.window);

        let mut admissions = self.admissions.lock().expect("rate limiter lock poisoned");
        let timestamps = admissions.entry(host).or_default();
        if let Some(cutoff) = cutoff {
            timestamps.retain(|&t| t > cutoff);
        }

        if timestamps.len() >= self.max_per_host {
            return false;
        }
        timestamps.push(now);
        true
    }

    /// Purge expired timestamps and drop empty buckets. Exposed for tests;
    /// normally driven by [`run_sweeper`](Self::run_sweeper).
    pub fn sweep(&self) {
        let Some(cutoff) = Instant::now().checked_sub(self.window) else {
            return;
        };
        let mut admissions = self.admissions.lock().expect("rate limiter lock poisoned");
        admissions.retain(|_, timestamps| {
            timestamps.retain(|&t| t > cutoff);
            !timestamps.is_empty()
        });
        debug!(hosts = admissions.len(), "rate limiter sweep complete");
    }

    /// Number of hosts currently holding a bucket.
    pub fn tracked_hosts(&self) -> usize {
        self.admissions
            .lock()
            .expect("rate limiter lock poisoned")
            .len()
    }

    /// Minutely sweep until the shutdown channel fires.
    pub async fn run_sweeper(
        self: std::sync::Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => self.sweep(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.allow("10.0.0.5:1111"));
        assert!(limiter.allow("10.0.0.5:2222"));
        assert!(!limiter.allow("10.0.0.5:3333"));
    }

    #[test]
    fn hosts_are_limited_independently() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.allow("10.0.0.5:1111"));
        assert!(!limiter.allow("10.0.0.5:1112"));
        assert!(limiter.allow("10.0.0.6:1111"));
    }

    #[test]
    fn bare_origin_without_port_is_accepted() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.allow("10.0.0.7"));
        // Same host with a port shares the bucket.
        assert!(!limiter.allow("10.0.0.7:9000"));
    }

    #[test]
    fn window_expiry_restores_budget() {
        let limiter = RateLimiter::new(1, Duration::from_millis(30));
        assert!(limiter.allow("10.0.0.5:1111"));
        assert!(!limiter.allow("10.0.0.5:1111"));
        sleep(Duration::from_millis(50));
        assert!(limiter.allow("10.0.0.5:1111"));
    }

    #[test]
    fn sweep_drops_idle_hosts() {
        let limiter = RateLimiter::new(5, Duration::from_millis(20));
        limiter.allow("10.0.0.5:1111");
        limiter.allow("10.0.0.6:1111");
        assert_eq!(limiter.tracked_hosts(), 2);
        sleep(Duration::from_millis(40));
        limiter.sweep();
        assert_eq!(limiter.tracked_hosts(), 0);
    }
}
