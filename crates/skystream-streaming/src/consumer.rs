//! Bus consumer feeding the fan-out hub.
//!
//! One consumer task per node. Construction probes the broker and retries
//! with a configurable interval so a node racing its broker at deploy time
//! settles into either a live consumer or an explicit
//! [`Error::ConsumerUnavailable`] the caller can map to fail-fast or
//! degraded mode. In steady state, transient read errors are logged and the
//! loop continues after a short backoff; the only signal the hub ever sees
//! is the absence of events.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::errors::{Error, Result};
use crate::{BusConfig, NodeIdentity};

/// Bus fetch tuning: 10 KB minimum, 10 MB maximum, 1 s max wait.
const FETCH_MIN_BYTES: &str = "10000";
const FETCH_MAX_BYTES: &str = "10000000";
const FETCH_WAIT_MAX_MS: &str = "1000";

/// Broker probe timeout during construction.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep after a transient read error in the steady-state loop.
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// Most recently delivered offset per partition, shared with the lag
/// monitor. Only the consumer loop writes.
pub type PartitionOffsets = Arc<RwLock<HashMap<i32, i64>>>;

pub struct SnapshotConsumer {
    consumer: StreamConsumer,
    topic: String,
    group_id: String,
    offsets: PartitionOffsets,
}

impl std::fmt::Debug for SnapshotConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotConsumer")
            .field("topic", &self.topic)
            .field("group_id", &self.group_id)
            .field("offsets", &self.offsets)
            .finish_non_exhaustive()
    }
}

impl SnapshotConsumer {
    /// Connect to the bus, retrying up to `cfg.max_retries` times.
    ///
    /// A fresh node starts at the latest offset: live events only, with
    /// late-joiner replay served from the in-memory window rather than the
    /// bus.
    pub async fn connect(cfg: &BusConfig, identity: &NodeIdentity) -> Result<Self> {
        let group_id = identity.consumer_group(&cfg.group_id);
        let max_retries = cfg.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=max_retries {
            info!(
                attempt,
                max_retries,
                broker = %cfg.broker_address,
                group = %group_id,
                "connecting bus consumer"
            );

            match Self::try_connect(cfg, identity, &group_id) {
                Ok(consumer) => {
                    info!(topic = %cfg.topic, group = %group_id, "bus consumer connected");
                    return Ok(Self {
                        consumer,
                        topic: cfg.topic.clone(),
                        group_id,
                        offsets: Arc::new(RwLock::new(HashMap::new())),
                    });
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_retries,
                        error = %e,
                        "bus consumer connection failed"
                    );
                    last_error = Some(e);
                    if attempt < max_retries {
                        tokio::time::sleep(cfg.retry_interval).await;
                    }
                }
            }
        }

        Err(Error::ConsumerUnavailable {
            attempts: max_retries,
            source: last_error.expect("at least one attempt"),
        })
    }

    fn try_connect(
        cfg: &BusConfig,
        identity: &NodeIdentity,
        group_id: &str,
    ) -> std::result::Result<StreamConsumer, rdkafka::error::KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.broker_address)
            .set("group.id", group_id)
            .set("client.id", &identity.node_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .set("fetch.min.bytes", FETCH_MIN_BYTES)
            .set("fetch.max.bytes", FETCH_MAX_BYTES)
            .set("fetch.wait.max.ms", FETCH_WAIT_MAX_MS)
            .create()?;
        consumer.subscribe(&[&cfg.topic])?;

        // Metadata fetch doubles as a connectivity probe. It blocks, but
        // only during construction, never in the read loop.
        consumer.fetch_metadata(Some(&cfg.topic), PROBE_TIMEOUT)?;
        Ok(consumer)
    }

    /// Group identity actually used on the bus (`{base}-{deployment}`).
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Shared per-partition offset map for lag accounting.
    pub fn offsets(&self) -> PartitionOffsets {
        Arc::clone(&self.offsets)
    }

    /// Read loop: hand every delivered payload to `handler` until the
    /// shutdown channel fires.
    ///
    /// Offset commits ride on the group coordinator's auto-commit; the
    /// final commit on shutdown is best-effort.
    pub async fn run<F>(self, mut shutdown: broadcast::Receiver<()>, mut handler: F)
    where
        F: FnMut(Bytes) + Send,
    {
        info!(topic = %self.topic, group = %self.group_id, "bus consumer loop started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("bus consumer stopping");
                    if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Sync) {
                        warn!(error = %e, "final consumer commit failed");
                    }
                    break;
                }
                delivery = self.consumer.recv() => {
                    match delivery {
                        Ok(message) => {
                            let partition = message.partition();
                            let offset = message.offset();
                            let Some(payload) = message.payload() else {
                                warn!(partition, offset, "bus message without payload, skipping");
                                continue;
                            };
                            debug!(partition, offset, bytes = payload.len(), "bus message received");
                            if let Ok(mut offsets) = self.offsets.write() {
                                offsets.insert(partition, offset);
                            }
                            handler(Bytes::copy_from_slice(payload));
                        }
                        Err(e) => {
                            error!(error = %e, "bus read error, backing off");
                            tokio::time::sleep(READ_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }
}

/// Sum of `high watermark - next consumed offset` across partitions.
///
/// Blocking (librdkafka watermark fetches); intended for a dedicated
/// monitor thread, never the consumer loop.
pub fn fetch_total_lag(
    broker_address: &str,
    group_id: &str,
    topic: &str,
    consumed: &HashMap<i32, i64>,
    timeout: Duration,
) -> Result<i64> {
    let probe: BaseConsumer = ClientConfig::new()
        .set("bootstrap.servers", broker_address)
        .set("group.id", format!("{group_id}-lag-monitor"))
        .set("enable.auto.commit", "false")
        .create()?;

    let mut lag = 0i64;
    for (&partition, &offset) in consumed {
        let (_low, high) = probe.fetch_watermarks(topic, partition, timeout)?;
        lag += (high - (offset + 1)).max(0);
    }
    Ok(lag)
}
