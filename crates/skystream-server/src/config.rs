//! Environment-driven configuration.
//!
//! Every knob can be overridden via environment variables; values that are
//! set but unparseable warn and fall back to the default instead of failing
//! silently or aborting startup. Configuration is loaded once and passed
//! into constructors; nothing reads the environment after startup.

use std::time::Duration;

use skystream_streaming::{BusConfig, NodeIdentity};
use tracing::warn;

/// Parse an env var, warning when a set value cannot be parsed.
pub fn parse_env_var_with_warning<T: std::str::FromStr>(var_name: &str, default: T) -> T {
    match std::env::var(var_name) {
        Ok(value) => match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(var = var_name, value = %value, "invalid env value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_string(var_name: &str, default: &str) -> String {
    std::env::var(var_name).unwrap_or_else(|_| default.to_string())
}

fn env_bool(var_name: &str, default: bool) -> bool {
    match std::env::var(var_name) {
        Ok(value) => matches!(value.to_lowercase().as_str(), "true" | "1"),
        Err(_) => default,
    }
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Hub capacity; the hub rejects registrations beyond this.
    pub max_connections: usize,
    /// Listener port.
    pub port: String,
    /// Shared admission token; empty disables auth.
    pub token: String,
    /// Origin allowlist; empty means permissive (warned at startup).
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScalingConfig {
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub cooldown: Duration,
    pub monitor_interval: Duration,
    pub rate_limit_per_ip: usize,
    pub rate_limit_window: Duration,
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub window: Duration,
    pub max_size: usize,
    pub cleanup_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Upstream state-vector endpoint.
    pub url: String,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub websocket: WebSocketConfig,
    pub kafka: BusConfig,
    pub redis: RedisConfig,
    pub scaling: ScalingConfig,
    pub memory: MemoryConfig,
    pub fetch: FetchConfig,
    pub identity: NodeIdentity,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            websocket: WebSocketConfig {
                max_connections: parse_env_var_with_warning("WEBSOCKET_MAX_CONNECTIONS", 1000),
                port: env_string("WEBSOCKET_PORT", "8080"),
                token: env_string("WEBSOCKET_TOKEN", ""),
                allowed_origins: split_origins(&env_string("ALLOWED_ORIGINS", "")),
            },
            kafka: BusConfig {
                broker_address: env_string("KAFKA_BROKER_ADDRESS", "localhost:9092"),
                topic: env_string("KAFKA_TOPIC", "flights"),
                group_id: env_string("KAFKA_GROUP_ID", "flight-websocket-group"),
                max_retries: parse_env_var_with_warning("KAFKA_MAX_RETRIES", 3),
                retry_interval: Duration::from_secs(parse_env_var_with_warning(
                    "KAFKA_RETRY_INTERVAL",
                    5,
                )),
                fail_fast: env_bool("KAFKA_FAIL_FAST", false),
            },
            redis: RedisConfig {
                url: env_string("REDIS_URL", "redis://localhost:6379"),
                cache_ttl: Duration::from_secs(parse_env_var_with_warning("CACHE_TTL_SECONDS", 60)),
            },
            scaling: ScalingConfig {
                scale_up_threshold: parse_env_var_with_warning("SCALE_UP_THRESHOLD", 0.8),
                scale_down_threshold: parse_env_var_with_warning("SCALE_DOWN_THRESHOLD", 0.3),
                cooldown: Duration::from_secs(
                    60 * parse_env_var_with_warning("SCALING_COOLDOWN_MINUTES", 5u64),
                ),
                monitor_interval: Duration::from_secs(parse_env_var_with_warning(
                    "SCALING_MONITOR_INTERVAL",
                    30,
                )),
                rate_limit_per_ip: parse_env_var_with_warning("RATE_LIMIT_PER_IP", 5),
                rate_limit_window: Duration::from_secs(
                    60 * parse_env_var_with_warning("RATE_LIMIT_WINDOW_MINUTES", 1u64),
                ),
            },
            memory: MemoryConfig {
                window: Duration::from_secs(
                    60 * parse_env_var_with_warning("MEMORY_WINDOW_MINUTES", 5u64),
                ),
                max_size: parse_env_var_with_warning("MEMORY_MAX_SIZE", 1000),
                cleanup_interval: Duration::from_secs(
                    60 * parse_env_var_with_warning("MEMORY_CLEANUP_INTERVAL", 1u64),
                ),
            },
            fetch: FetchConfig {
                url: env_string(
                    "OPEN_SKY_API_URL",
                    "https://opensky-network.org/api/states/all",
                ),
                interval: Duration::from_secs(parse_env_var_with_warning(
                    "FETCH_INTERVAL_SECONDS",
                    15,
                )),
            },
            identity: NodeIdentity {
                node_id: node_id(),
                deployment_id: env_string("DEPLOYMENT_ID", "default"),
            },
        }
    }
}

impl Default for Config {
    /// Built-in defaults without touching the environment; what `from_env`
    /// yields in an empty environment. Tests build on this.
    fn default() -> Self {
        Self {
            websocket: WebSocketConfig {
                max_connections: 1000,
                port: "8080".to_string(),
                token: String::new(),
                allowed_origins: Vec::new(),
            },
            kafka: BusConfig::default(),
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                cache_ttl: Duration::from_secs(60),
            },
            scaling: ScalingConfig {
                scale_up_threshold: 0.8,
                scale_down_threshold: 0.3,
                cooldown: Duration::from_secs(300),
                monitor_interval: Duration::from_secs(30),
                rate_limit_per_ip: 5,
                rate_limit_window: Duration::from_secs(60),
            },
            memory: MemoryConfig {
                window: Duration::from_secs(300),
                max_size: 1000,
                cleanup_interval: Duration::from_secs(60),
            },
            fetch: FetchConfig {
                url: "https://opensky-network.org/api/states/all".to_string(),
                interval: Duration::from_secs(15),
            },
            identity: NodeIdentity {
                node_id: "local".to_string(),
                deployment_id: "default".to_string(),
            },
        }
    }
}

/// NODE_ID wins; otherwise the container hostname; otherwise a fixed tag.
fn node_id() -> String {
    std::env::var("NODE_ID")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "local".to_string())
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
