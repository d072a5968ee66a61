//! Load-derived scaling advice for the orchestration layer.
//!
//! The hub feeds connection counts and queue depth in; `verdict` turns the
//! connection ratio into advice. Actual scaling is external: the monitor
//! task only logs actionable verdicts where an orchestrator (or a human
//! watching the logs) can react to them.

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info};

/// Advice for one load sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    ScaleUp,
    ScaleDown,
    Stable,
    /// A non-stable verdict was suppressed because a scale action was
    /// recorded within the cooldown interval.
    Cooldown,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::ScaleUp => "scale-up",
            Verdict::ScaleDown => "scale-down",
            Verdict::Stable => "stable",
            Verdict::Cooldown => "cooldown",
        };
        f.write_str(s)
    }
}

/// Point-in-time load sample.
#[derive(Debug, Clone, Copy)]
pub struct LoadMetrics {
    pub connections: usize,
    pub max_connections: usize,
    pub connection_ratio: f64,
    pub queue_depth: usize,
    pub last_updated: Option<Instant>,
}

struct State {
    connections: usize,
    connection_ratio: f64,
    queue_depth: usize,
    last_updated: Option<Instant>,
    last_action: Option<Instant>,
}

pub struct AutoScaler {
    max_connections: usize,
    scale_up_threshold: f64,
    scale_down_threshold: f64,
    cooldown: Duration,
    state: Mutex<State>,
}

impl AutoScaler {
    pub fn new(
        max_connections: usize,
        scale_up_threshold: f64,
        scale_down_threshold: f64,
        cooldown: Duration,
    ) -> Self {
        Self {
            max_connections,
            scale_up_threshold,
            scale_down_threshold,
            cooldown,
            state: Mutex::new(State {
                connections: 0,
                connection_ratio: 0.0,
                queue_depth: 0,
                last_updated: None,
                last_action: None,
            }),
        }
    }

    pub fn update_connections(&self, current: usize) {
        let mut state = self.state.lock().expect("scaler lock poisoned");
        state.connections = current;
        state.connection_ratio = if self.max_connections == 0 {
            0.0
        } else {
            current as f64 / self.max_connections as f64
        };
        state.last_updated = Some(Instant::now());
    }

    pub fn update_queue_depth(&self, depth: usize) {
        let mut state = self.state.lock().expect("scaler lock poisoned");
        state.queue_depth = depth;
    }

    /// Current advice. Non-stable verdicts are reported as `Cooldown` while
    /// a recorded action is within the cooldown interval.
    pub fn verdict(&self) -> Verdict {
        let state = self.state.lock().expect("scaler lock poisoned");

        let raw = if state.connection_ratio > self.scale_up_threshold {
            Verdict::ScaleUp
        } else if state.connection_ratio < self.scale_down_threshold {
            Verdict::ScaleDown
        } else {
            Verdict::Stable
        };

        if raw != Verdict::Stable
            && state
                .last_action
                .is_some_and(|at| at.elapsed() < self.cooldown)
        {
            return Verdict::Cooldown;
        }
        raw
    }

    /// Mark that the orchestrator acted on a non-stable verdict, starting
    /// the cooldown.
    pub fn record_action(&self) {
        let mut state = self.state.lock().expect("scaler lock poisoned");
        state.last_action = Some(Instant::now());
    }

    pub fn metrics(&self) -> LoadMetrics {
        let state = self.state.lock().expect("scaler lock poisoned");
        LoadMetrics {
            connections: state.connections,
            max_connections: self.max_connections,
            connection_ratio: state.connection_ratio,
            queue_depth: state.queue_depth,
            last_updated: state.last_updated,
        }
    }

    /// Periodic monitor: log actionable verdicts for the orchestration
    /// layer and start the cooldown once one is emitted.
    pub async fn run_monitor(
        self: std::sync::Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    let verdict = self.verdict();
                    match verdict {
                        Verdict::ScaleUp | Verdict::ScaleDown => {
                            let metrics = self.metrics();
                            info!(
                                verdict = %verdict,
                                ratio = metrics.connection_ratio,
                                connections = metrics.connections,
                                max_connections = metrics.max_connections,
                                "auto-scaling trigger"
                            );
                            self.record_action();
                        }
                        Verdict::Cooldown => {
                            debug!("scaling verdict suppressed by cooldown");
                        }
                        Verdict::Stable => {}
                    }
                }
            }
        }
    }
}
