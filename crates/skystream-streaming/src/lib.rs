//! Kafka plumbing for skystream.
//!
//! Everything a node needs to speak to the event bus lives here: the
//! snapshot consumer that feeds the fan-out hub, the producer used by the
//! upstream poller, structural validation of snapshot payloads, and the
//! gzip wire framing shared by every subscriber.
//!
//! The bus contract is deliberately thin: payloads are opaque snapshot
//! bytes, keys are unused, and offsets are handled by the consumer group
//! coordinator. Duplicates are harmless because every message is a full
//! snapshot.

use std::time::Duration;

pub mod compression;
pub mod consumer;
pub mod errors;
pub mod producer;
pub mod schema;

pub use consumer::{PartitionOffsets, SnapshotConsumer};
pub use errors::{Error, Result};
pub use producer::SnapshotProducer;
pub use schema::SchemaError;

/// Connection settings for the event bus, shared by consumer and producer.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Broker bootstrap address, `host:port`.
    pub broker_address: String,
    /// Topic carrying snapshot payloads.
    pub topic: String,
    /// Base consumer group name; the deployment id is appended so that all
    /// nodes of one deployment form a single group.
    pub group_id: String,
    /// Construction-time connection attempts before giving up.
    pub max_retries: u32,
    /// Sleep between construction attempts.
    pub retry_interval: Duration,
    /// Exit the process instead of running degraded when the broker is
    /// unreachable at startup.
    pub fail_fast: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            broker_address: "localhost:9092".to_string(),
            topic: "flights".to_string(),
            group_id: "flight-websocket-group".to_string(),
            max_retries: 3,
            retry_interval: Duration::from_secs(5),
            fail_fast: false,
        }
    }
}

/// Identity of this node within a horizontally scaled deployment.
///
/// The deployment id scopes the consumer group (one group per deployment,
/// partitions balanced across its nodes); the node id becomes the Kafka
/// client id for broker-side observability.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub node_id: String,
    pub deployment_id: String,
}

impl NodeIdentity {
    /// Group identity used on the bus: `{base}-{deployment}`.
    pub fn consumer_group(&self, base: &str) -> String {
        format!("{}-{}", base, self.deployment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_group_appends_deployment_id() {
        let identity = NodeIdentity {
            node_id: "node-1".to_string(),
            deployment_id: "prod-eu".to_string(),
        };
        assert_eq!(
            identity.consumer_group("flight-websocket-group"),
            "flight-websocket-group-prod-eu"
        );
    }
}
