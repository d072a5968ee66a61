//! Fan-out hub: sole owner of the session set.
//!
//! Every mutation funnels through one serializer task fed by an unbounded
//! command channel, so concurrent registers, unregisters, and broadcasts
//! cannot corrupt the set and the session count is exact. The hub owns each
//! session's outbound queue sender; dropping it is how a session is closed,
//! and it happens exactly once per session. The hub never touches a
//! transport directly: a session whose queue closes converts that into a
//! close frame on its own write loop.
//!
//! Broadcast is non-blocking end to end. Each snapshot is validated,
//! recorded in the sliding window, compressed once, and `try_send`-offered
//! to every session; a session whose queue is full is evicted on the spot.
//! That eviction is the only backpressure policy.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use skystream_streaming::{compression, schema};

use crate::metrics::Metrics;
use crate::scaling::AutoScaler;
use crate::window::SlidingWindow;

/// Outbound queue capacity per session.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Poll cadence while waiting for queues to empty during drain.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The hub-owned side of one session: identity, origin, and the single
/// producer end of its outbound queue.
pub struct SessionHandle {
    pub id: SessionId,
    pub origin: String,
    /// Admission token the subscriber presented, when auth is configured.
    pub token: Option<String>,
    pub queue: mpsc::Sender<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HubState {
    Starting,
    Running,
    Draining,
    Stopped,
}

enum Command {
    Register(SessionHandle),
    Unregister(SessionId),
    Broadcast(Bytes),
    Drain(oneshot::Sender<()>),
}

/// Cloneable handle for talking to the hub serializer.
///
/// Sessions hold one of these purely to send unregister notifications; the
/// hub owns the sessions, never the other way around.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<Command>,
    connections: Arc<AtomicUsize>,
}

impl HubHandle {
    pub fn register(&self, session: SessionHandle) {
        // A send after hub shutdown drops the session handle, which closes
        // its queue and lets the transport side wind down on its own.
        let _ = self.commands.send(Command::Register(session));
    }

    pub fn unregister(&self, id: SessionId) {
        let _ = self.commands.send(Command::Unregister(id));
    }

    pub fn broadcast(&self, payload: Bytes) {
        let _ = self.commands.send(Command::Broadcast(payload));
    }

    /// Ask the hub to drain and stop, waiting until it has.
    pub async fn drain(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::Drain(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Exact session count; only the serializer writes it.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

pub struct Hub {
    sessions: HashMap<SessionId, SessionHandle>,
    commands: mpsc::UnboundedReceiver<Command>,
    connections: Arc<AtomicUsize>,
    max_connections: usize,
    drain_grace: Duration,
    window: Arc<SlidingWindow>,
    scaler: Arc<AutoScaler>,
    metrics: Arc<Metrics>,
    state: HubState,
}

impl Hub {
    /// Spawn the serializer task and return its handle.
    pub fn spawn(
        max_connections: usize,
        drain_grace: Duration,
        window: Arc<SlidingWindow>,
        scaler: Arc<AutoScaler>,
        metrics: Arc<Metrics>,
    ) -> HubHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let hub = Hub {
            sessions: HashMap::new(),
            commands: command_rx,
            connections: Arc::clone(&connections),
            max_connections,
            drain_grace,
            window,
            scaler,
            metrics,
            state: HubState::Starting,
        };
        tokio::spawn(hub.run());
        HubHandle {
            commands: command_tx,
            connections,
        }
    }

    async fn run(mut self) {
        self.state = HubState::Running;
        info!(max_connections = self.max_connections, "hub running");

        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Register(session) => self.register(session),
                Command::Unregister(id) => self.unregister(id),
                Command::Broadcast(payload) => self.broadcast(payload),
                Command::Drain(done) => {
                    self.drain().await;
                    let _ = done.send(());
                    break;
                }
            }
        }

        // Reject anything still buffered; dropping a pending register
        // closes its queue and the transport follows.
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Register(session) = command {
                debug!(session = %session.id, "register after shutdown, rejecting");
            }
        }
        self.sessions.clear();
        self.connections.store(0, Ordering::Relaxed);
        self.state = HubState::Stopped;
        info!("hub stopped");
    }

    fn register(&mut self, session: SessionHandle) {
        if self.state != HubState::Running {
            warn!(session = %session.id, "hub not running, rejecting session");
            return;
        }
        if self.sessions.len() >= self.max_connections {
            warn!(
                origin = %session.origin,
                active = self.sessions.len(),
                max = self.max_connections,
                "connection pool full, rejecting session"
            );
            return;
        }

        // Late joiner replay: hand the newest snapshot over immediately so
        // the map paints without waiting for the next upstream tick.
        if let Some(snapshot) = self.window.latest() {
            match compression::compress_frame(&snapshot) {
                Ok(frame) => {
                    let _ = session.queue.try_send(frame);
                }
                Err(e) => warn!(error = %e, "replay frame compression failed"),
            }
        }

        debug!(
            session = %session.id,
            origin = %session.origin,
            active = self.sessions.len() + 1,
            max = self.max_connections,
            "session registered"
        );
        self.sessions.insert(session.id, session);
        self.publish_load();
    }

    fn unregister(&mut self, id: SessionId) {
        if self.sessions.remove(&id).is_some() {
            debug!(
                session = %id,
                active = self.sessions.len(),
                max = self.max_connections,
                "session unregistered"
            );
            self.publish_load();
        }
    }

    fn broadcast(&mut self, payload: Bytes) {
        if let Err(e) = schema::validate_snapshot(&payload) {
            error!(error = %e, "snapshot failed validation, dropping");
            return;
        }

        self.window.add(payload.clone());

        let frame = match compression::compress_frame(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "snapshot compression failed, dropping");
                return;
            }
        };
        debug!(
            raw_bytes = payload.len(),
            frame_bytes = frame.len(),
            sessions = self.sessions.len(),
            "broadcasting snapshot"
        );

        let mut evicted = Vec::new();
        for (id, session) in &self.sessions {
            match session.queue.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        session = %id,
                        origin = %session.origin,
                        "outbound queue full, evicting slow session"
                    );
                    evicted.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(session = %id, "outbound queue closed, removing session");
                    evicted.push(*id);
                }
            }
        }
        for id in evicted {
            self.sessions.remove(&id);
        }

        self.publish_load();
    }

    async fn drain(&mut self) {
        self.state = HubState::Draining;
        info!(
            sessions = self.sessions.len(),
            grace = ?self.drain_grace,
            "hub draining"
        );

        let deadline = Instant::now() + self.drain_grace;
        loop {
            let pending = self.queued_frames();
            if pending == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(pending, "drain deadline reached, forcing close");
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        let closed = self.sessions.len();
        self.sessions.clear();
        self.publish_load();
        info!(closed, "hub drained");
    }

    fn queued_frames(&self) -> usize {
        self.sessions
            .values()
            .map(|s| s.queue.max_capacity() - s.queue.capacity())
            .sum()
    }

    /// Push the authoritative load numbers out to the gauges and scaler.
    fn publish_load(&self) {
        let count = self.sessions.len();
        let depth = self.queued_frames();
        self.connections.store(count, Ordering::Relaxed);
        self.metrics.connected_clients.set(count as i64);
        self.metrics.message_queue_size.set(depth as i64);
        self.scaler.update_connections(count);
        self.scaler.update_queue_depth(depth);
    }
}
