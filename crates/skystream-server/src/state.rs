//! Shared application state handed to every handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::hub::{Hub, HubHandle};
use crate::metrics::Metrics;
use crate::rate_limit::RateLimiter;
use crate::scaling::AutoScaler;
use crate::window::SlidingWindow;

/// How long a draining hub waits for outbound queues to empty before
/// forcing sessions closed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Readiness flags for the orchestration layer.
///
/// The node is ready once the listener is bound and the bus consumer is
/// up; a node running degraded (bus unreachable at startup) keeps
/// answering not-ready until the consumer recovers.
#[derive(Default)]
pub struct Readiness {
    listener_up: AtomicBool,
    consumer_up: AtomicBool,
}

impl Readiness {
    pub fn set_listener_up(&self) {
        self.listener_up.store(true, Ordering::Relaxed);
    }

    pub fn set_consumer_up(&self) {
        self.consumer_up.store(true, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.listener_up.load(Ordering::Relaxed) && self.consumer_up.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub window: Arc<SlidingWindow>,
    pub limiter: Arc<RateLimiter>,
    pub scaler: Arc<AutoScaler>,
    pub hub: HubHandle,
    pub readiness: Arc<Readiness>,
    pub started_at: Instant,
}

impl AppState {
    /// Assemble the fan-out core and spawn the hub serializer.
    ///
    /// Must run inside a tokio runtime.
    pub fn new(config: Config) -> prometheus::Result<Self> {
        let metrics = Arc::new(Metrics::new()?);
        let window = Arc::new(SlidingWindow::new(
            config.memory.window,
            config.memory.max_size,
        ));
        let limiter = Arc::new(RateLimiter::new(
            config.scaling.rate_limit_per_ip,
            config.scaling.rate_limit_window,
        ));
        let scaler = Arc::new(AutoScaler::new(
            config.websocket.max_connections,
            config.scaling.scale_up_threshold,
            config.scaling.scale_down_threshold,
            config.scaling.cooldown,
        ));
        let hub = Hub::spawn(
            config.websocket.max_connections,
            SHUTDOWN_GRACE,
            Arc::clone(&window),
            Arc::clone(&scaler),
            Arc::clone(&metrics),
        );

        Ok(Self {
            config: Arc::new(config),
            metrics,
            window,
            limiter,
            scaler,
            hub,
            readiness: Arc::new(Readiness::default()),
            started_at: Instant::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_requires_both_flags() {
        let readiness = Readiness::default();
        assert!(!readiness.is_ready());
        readiness.set_listener_up();
        assert!(!readiness.is_ready());
        readiness.set_consumer_up();
        assert!(readiness.is_ready());
    }
}
