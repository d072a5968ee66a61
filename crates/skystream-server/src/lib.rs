//! skystream fan-out node.
//!
//! One node consumes the shared snapshot topic and broadcasts every event
//! to its WebSocket subscriber population with independent per-session
//! backpressure. The library exposes the components; `main.rs` wires them
//! to the environment.
//!
//! Data path: upstream poller → bus → [`hub`] (validate, record, compress,
//! dispatch) → per-[`session`] queue → transport. Admission path: upgrade
//! request → [`rate_limit`] + token + origin checks → hub register.
//! [`scaling`] watches the hub's load signals and advises the orchestrator.

pub mod cache;
pub mod client_ip;
pub mod config;
pub mod fetcher;
pub mod handlers;
pub mod hub;
pub mod metrics;
pub mod rate_limit;
pub mod scaling;
pub mod session;
pub mod state;
pub mod window;

pub use config::Config;
pub use handlers::build_router;
pub use hub::{Hub, HubHandle, SessionHandle, SessionId, OUTBOUND_QUEUE_CAPACITY};
pub use metrics::Metrics;
pub use rate_limit::RateLimiter;
pub use scaling::{AutoScaler, Verdict};
pub use state::{AppState, Readiness, SHUTDOWN_GRACE};
pub use window::SlidingWindow;
