//! Snapshot publisher for the upstream poller.
//!
//! Mirrors the consumer's construction discipline: probe the broker,
//! retry with the configured interval, and surface
//! [`Error::ProducerUnavailable`] when exhausted so the caller can apply
//! fail-fast or keep serving without publishing.

use std::time::Duration;

use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{info, warn};

use crate::errors::{Error, Result};
use crate::BusConfig;

/// Broker probe timeout during construction.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivery timeout for a published snapshot.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SnapshotProducer {
    producer: FutureProducer,
    topic: String,
}

impl std::fmt::Debug for SnapshotProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotProducer")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl SnapshotProducer {
    /// Connect to the bus, retrying up to `cfg.max_retries` times.
    pub async fn connect(cfg: &BusConfig) -> Result<Self> {
        let max_retries = cfg.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=max_retries {
            info!(
                attempt,
                max_retries,
                broker = %cfg.broker_address,
                "connecting bus producer"
            );

            match Self::try_connect(cfg) {
                Ok(producer) => {
                    info!(topic = %cfg.topic, "bus producer connected");
                    return Ok(Self {
                        producer,
                        topic: cfg.topic.clone(),
                    });
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_retries,
                        error = %e,
                        "bus producer connection failed"
                    );
                    last_error = Some(e);
                    if attempt < max_retries {
                        tokio::time::sleep(cfg.retry_interval).await;
                    }
                }
            }
        }

        Err(Error::ProducerUnavailable {
            attempts: max_retries,
            source: last_error.expect("at least one attempt"),
        })
    }

    fn try_connect(
        cfg: &BusConfig,
    ) -> std::result::Result<FutureProducer, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.broker_address)
            .set("message.timeout.ms", SEND_TIMEOUT.as_millis().to_string())
            .create()?;
        producer
            .client()
            .fetch_metadata(Some(&cfg.topic), PROBE_TIMEOUT)?;
        Ok(producer)
    }

    /// Publish one snapshot; the bus assigns partition and offset.
    ///
    /// Keys are unused by the consumer side, so none is set.
    pub async fn publish(&self, payload: Bytes) -> Result<(i32, i64)> {
        let record = FutureRecord::<(), [u8]>::to(&self.topic).payload(payload.as_ref());
        match self.producer.send(record, Timeout::After(SEND_TIMEOUT)).await {
            Ok(delivery) => Ok(delivery),
            Err((e, _unsent)) => Err(Error::Kafka(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeIdentity;

    #[tokio::test]
    async fn connect_gives_up_after_max_retries() {
        let cfg = BusConfig {
            broker_address: "127.0.0.1:1".to_string(),
            max_retries: 2,
            retry_interval: Duration::from_millis(10),
            ..BusConfig::default()
        };
        let err = SnapshotProducer::connect(&cfg).await.unwrap_err();
        assert!(matches!(err, Error::ProducerUnavailable { attempts: 2, .. }));

        // Same deployment naming applies to both ends of the bus.
        let identity = NodeIdentity {
            node_id: "n".into(),
            deployment_id: "default".into(),
        };
        assert!(identity.consumer_group(&cfg.group_id).ends_with("-default"));
    }
}
