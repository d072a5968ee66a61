//! Prometheus collectors on an owned registry.
//!
//! Metric names are part of the external contract (dashboards and alerts
//! scrape them) and must not change.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    /// Number of active WebSocket clients.
    pub connected_clients: IntGauge,
    /// Latency of fetching flight data.
    pub fetch_latency: Histogram,
    /// Time taken to process flight data.
    pub processing_time: Histogram,
    /// Aggregate depth of per-session outbound queues.
    pub message_queue_size: IntGauge,
    /// Bus consumer lag in messages.
    pub consumer_lag: IntGauge,
    /// Snapshot cache hits.
    pub cache_hits: IntCounter,
    /// Snapshot cache misses.
    pub cache_misses: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let connected_clients = IntGauge::new(
            "websocket_connected_clients",
            "Number of active WebSocket clients",
        )?;
        let fetch_latency = Histogram::with_opts(HistogramOpts::new(
            "flight_fetch_latency_seconds",
            "Latency of fetching flight data",
        ))?;
        let processing_time = Histogram::with_opts(
            HistogramOpts::new(
                "flight_data_processing_seconds",
                "Time taken to process flight data",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        let message_queue_size = IntGauge::new(
            "websocket_message_queue_size",
            "Current size of WebSocket message queue",
        )?;
        let consumer_lag =
            IntGauge::new("kafka_consumer_lag", "Kafka consumer lag in messages")?;
        let cache_hits = IntCounter::new(
            "redis_cache_hits_total",
            "Total number of Redis cache hits",
        )?;
        let cache_misses = IntCounter::new(
            "redis_cache_misses_total",
            "Total number of Redis cache misses",
        )?;

        registry.register(Box::new(connected_clients.clone()))?;
        registry.register(Box::new(fetch_latency.clone()))?;
        registry.register(Box::new(processing_time.clone()))?;
        registry.register(Box::new(message_queue_size.clone()))?;
        registry.register(Box::new(consumer_lag.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;

        Ok(Self {
            registry,
            connected_clients,
            fetch_latency,
            processing_time,
            message_queue_size,
            consumer_lag,
            cache_hits,
            cache_misses,
        })
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn export(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_contains_compat_metric_names() {
        let metrics = Metrics::new().unwrap();
        metrics.connected_clients.set(3);
        metrics.cache_hits.inc();
        metrics.fetch_latency.observe(0.25);

        let text = metrics.export().unwrap();
        for name in [
            "websocket_connected_clients",
            "flight_fetch_latency_seconds",
            "flight_data_processing_seconds",
            "websocket_message_queue_size",
            "kafka_consumer_lag",
            "redis_cache_hits_total",
            "redis_cache_misses_total",
        ] {
            assert!(text.contains(name), "missing metric {name}");
        }
        assert!(text.contains("websocket_connected_clients 3"));
    }

    #[test]
    fn gauges_track_set_values() {
        let metrics = Metrics::new().unwrap();
        metrics.message_queue_size.set(17);
        metrics.consumer_lag.set(42);
        assert_eq!(metrics.message_queue_size.get(), 17);
        assert_eq!(metrics.consumer_lag.get(), 42);
    }
}
