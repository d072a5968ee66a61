//! Bounded in-memory buffer of recent snapshots.
//!
//! Time- and size-capped: at most `max_size` entries, none older than the
//! window once the next sweep completes. Serves late-joiner replay and the
//! observability read path. It has no external dependencies and cannot
//! fail; overflow is absorbed by evicting the oldest entries.

use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::debug;

struct Entry {
    payload: Bytes,
    at: Instant,
}

pub struct SlidingWindow {
    entries: RwLock<VecDeque<Entry>>,
    window: Duration,
    max_size: usize,
}

impl SlidingWindow {
    pub fn new(window: Duration, max_size: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(max_size)),
            window,
            max_size,
        }
    }

    /// Append a snapshot stamped with the current time, evicting the oldest
    /// entries past capacity.
    pub fn add(&self, payload: Bytes) {
        let mut entries = self.entries.write().expect("window lock poisoned");
        entries.push_back(Entry {
            payload,
            at: Instant::now(),
        });
        while entries.len() > self.max_size {
            entries.pop_front();
        }
    }

    /// Snapshots still inside the window, oldest first. Never mutates.
    pub fn recent(&self) -> Vec<Bytes> {
        let cutoff = Instant::now().checked_sub(self.window);
        let entries = self.entries.read().expect("window lock poisoned");
        entries
            .iter()
            .filter(|e| cutoff.map_or(true, |c| e.at > c))
            .map(|e| e.payload.clone())
            .collect()
    }

    /// The newest non-expired snapshot, if any. Feeds late-joiner replay.
    pub fn latest(&self) -> Option<Bytes> {
        let cutoff = Instant::now().checked_sub(self.window);
        let entries = self.entries.read().expect("window lock poisoned");
        entries
            .back()
            .filter(|e| cutoff.map_or(true, |c| e.at > c))
            .map(|e| e.payload.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("window lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries older than the window. Called by the sweeper; exposed
    /// so tests can trigger it directly.
    pub fn evict_expired(&self) {
        let Some(cutoff) = Instant::now().checked_sub(self.window) else {
            return;
        };
        let mut entries = self.entries.write().expect("window lock poisoned");
        let before = entries.len();
        while entries.front().is_some_and(|e| e.at <= cutoff) {
            entries.pop_front();
        }
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "window sweep evicted expired snapshots");
        }
    }

    /// Periodic sweep until the shutdown channel fires.
    pub async fn run_sweeper(
        self: std::sync::Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => self.evict_expired(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread::sleep;

    #[test]
    fn capacity_evicts_oldest_first() {
        let window = SlidingWindow::new(Duration::from_secs(60), 3);
        for i in 0..5u8 {
            window.add(Bytes::from(vec![i]));
        }
        let recent = window.recent();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].as_ref(), &[2]);
        assert_eq!(recent[2].as_ref(), &[4]);
    }

    #[test]
    fn duplicates_are_not_deduplicated() {
        let window = SlidingWindow::new(Duration::from_secs(60), 10);
        let payload = Bytes::from_static(b"same");
        window.add(payload.clone());
        window.add(payload);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn recent_skips_expired_entries() {
        let window = SlidingWindow::new(Duration::from_millis(30), 10);
        window.add(Bytes::from_static(b"old"));
        sleep(Duration::from_millis(50));
        window.add(Bytes::from_static(b"new"));
        let recent = window.recent();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].as_ref(), b"new");
    }

    #[test]
    fn sweep_empties_fully_expired_window() {
        let window = SlidingWindow::new(Duration::from_millis(20), 10);
        window.add(Bytes::from_static(b"a"));
        window.add(Bytes::from_static(b"a"));
        sleep(Duration::from_millis(40));
        window.evict_expired();
        assert!(window.is_empty());
        assert!(window.latest().is_none());
    }

    #[test]
    fn latest_returns_newest_entry() {
        let window = SlidingWindow::new(Duration::from_secs(60), 10);
        window.add(Bytes::from_static(b"first"));
        window.add(Bytes::from_static(b"second"));
        assert_eq!(window.latest().unwrap().as_ref(), b"second");
    }

    #[test]
    fn ordering_is_preserved_under_concurrent_reads() {
        let window = Arc::new(SlidingWindow::new(Duration::from_secs(60), 100));
        let reader = {
            let window = Arc::clone(&window);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let recent = window.recent();
                    // A reader observes a point-in-time prefix in order.
                    for pair in recent.windows(2) {
                        assert!(pair[0][0] <= pair[1][0]);
                    }
                }
            })
        };
        for i in 0..100u8 {
            window.add(Bytes::from(vec![i]));
        }
        reader.join().unwrap();
    }
}
