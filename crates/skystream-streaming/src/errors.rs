//! Error types for skystream bus plumbing.

use thiserror::Error;

/// Error type for bus operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// The consumer could not reach the broker during construction.
    #[error("bus consumer unreachable after {attempts} attempts: {source}")]
    ConsumerUnavailable {
        attempts: u32,
        #[source]
        source: rdkafka::error::KafkaError,
    },

    /// The producer could not reach the broker during construction.
    #[error("bus producer unreachable after {attempts} attempts: {source}")]
    ProducerUnavailable {
        attempts: u32,
        #[source]
        source: rdkafka::error::KafkaError,
    },

    /// A bus client operation failed.
    #[error(transparent)]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// A snapshot payload failed structural validation.
    #[error(transparent)]
    Schema(#[from] crate::schema::SchemaError),

    /// Gzip framing failed.
    #[error("snapshot compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::error::KafkaError;
    use rdkafka::types::RDKafkaErrorCode;

    #[test]
    fn consumer_unavailable_names_attempt_count() {
        let err = Error::ConsumerUnavailable {
            attempts: 3,
            source: KafkaError::MetadataFetch(RDKafkaErrorCode::BrokerTransportFailure),
        };
        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[test]
    fn schema_errors_pass_through() {
        let err = Error::from(crate::schema::SchemaError::NotAnArray);
        assert!(matches!(err, Error::Schema(_)));
    }
}
