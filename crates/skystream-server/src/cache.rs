//! Best-effort Redis cache of the latest snapshot.
//!
//! The poller writes each fetched snapshot here and reads it back when the
//! upstream feed is down, so subscribers keep getting a stale-but-recent
//! picture instead of nothing. Cache unavailability is never fatal: a node
//! without Redis just loses the fallback.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::config::RedisConfig;
use crate::metrics::Metrics;

/// Key holding the most recent snapshot payload.
pub const LATEST_SNAPSHOT_KEY: &str = "flights:latest";

pub struct SnapshotCache {
    connection: Option<ConnectionManager>,
    ttl: Duration,
    metrics: Arc<Metrics>,
}

impl SnapshotCache {
    /// Connect to Redis; on failure, log and run without a cache.
    pub async fn connect(config: &RedisConfig, metrics: Arc<Metrics>) -> Self {
        let connection = match redis::Client::open(config.url.as_str()) {
            Ok(client) => match client.get_connection_manager().await {
                Ok(connection) => {
                    info!(url = %config.url, "snapshot cache connected");
                    Some(connection)
                }
                Err(e) => {
                    warn!(error = %e, "snapshot cache unavailable, continuing without it");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "invalid redis url, continuing without cache");
                None
            }
        };

        Self {
            connection,
            ttl: config.cache_ttl,
            metrics,
        }
    }

    /// Cache a snapshot under the fixed key with the configured TTL.
    pub async fn store(&self, payload: &[u8]) {
        let Some(connection) = &self.connection else {
            return;
        };
        let mut connection = connection.clone();
        let result: redis::RedisResult<()> = connection
            .set_ex(LATEST_SNAPSHOT_KEY, payload, self.ttl.as_secs())
            .await;
        match result {
            Ok(()) => debug!(bytes = payload.len(), "snapshot cached"),
            Err(e) => warn!(error = %e, "snapshot cache write failed"),
        }
    }

    /// Read back the latest cached snapshot, counting hits and misses.
    pub async fn load_latest(&self) -> Option<Bytes> {
        let Some(connection) = &self.connection else {
            self.metrics.cache_misses.inc();
            return None;
        };
        let mut connection = connection.clone();
        match connection
            .get::<_, Option<Vec<u8>>>(LATEST_SNAPSHOT_KEY)
            .await
        {
            Ok(Some(payload)) => {
                self.metrics.cache_hits.inc();
                Some(Bytes::from(payload))
            }
            Ok(None) => {
                self.metrics.cache_misses.inc();
                None
            }
            Err(e) => {
                warn!(error = %e, "snapshot cache read failed");
                self.metrics.cache_misses.inc();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;

    #[tokio::test]
    async fn degrades_cleanly_without_redis() {
        // Nothing listens on this port: the cache must come up in
        // passthrough mode, count misses, and never error.
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            cache_ttl: Duration::from_secs(60),
        };
        let metrics = Arc::new(Metrics::new().unwrap());
        let cache = SnapshotCache::connect(&config, Arc::clone(&metrics)).await;

        cache.store(b"[]").await;
        assert!(cache.load_latest().await.is_none());
        assert_eq!(metrics.cache_misses.get(), 1);
        assert_eq!(metrics.cache_hits.get(), 0);
    }

    #[tokio::test]
    async fn invalid_url_is_not_fatal() {
        let config = RedisConfig {
            url: "not a url".to_string(),
            cache_ttl: Duration::from_secs(60),
        };
        let metrics = Arc::new(Metrics::new().unwrap());
        let cache = SnapshotCache::connect(&config, metrics).await;
        assert!(cache.load_latest().await.is_none());
    }
}
