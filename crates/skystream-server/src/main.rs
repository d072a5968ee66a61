//! skystream-server: Kafka → WebSocket fan-out node for live flight maps.
//!
//! The process runs the fan-out core (hub, sessions, admission, window,
//! scaling signal) plus the upstream poll → validate → cache → publish loop
//! that feeds the bus. Losing the bus at startup is survivable unless
//! `KAFKA_FAIL_FAST` is set: the node then runs degraded, serving
//! subscribers whatever the window still holds and answering not-ready
//! until the consumer recovers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use prometheus::IntGauge;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use skystream_server::cache::SnapshotCache;
use skystream_server::fetcher::FlightFetcher;
use skystream_server::{build_router, AppState, Config};
use skystream_streaming::consumer::{fetch_total_lag, PartitionOffsets};
use skystream_streaming::{schema, BusConfig, SnapshotConsumer, SnapshotProducer};

/// Watermark fetch timeout inside the lag monitor.
const WATERMARK_TIMEOUT: Duration = Duration::from_secs(5);

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = async {
        std::future::pending::<()>().await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    info!(
        max_connections = config.websocket.max_connections,
        port = %config.websocket.port,
        node = %config.identity.node_id,
        deployment = %config.identity.deployment_id,
        "configuration loaded"
    );
    if config.websocket.token.is_empty() {
        warn!("WEBSOCKET_TOKEN not set, subscriber auth disabled");
    }
    if config.websocket.allowed_origins.is_empty() {
        warn!("ALLOWED_ORIGINS not set, allowing all origins");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let lag_monitor_stop = Arc::new(AtomicBool::new(false));
    {
        let shutdown_tx = shutdown_tx.clone();
        let lag_monitor_stop = Arc::clone(&lag_monitor_stop);
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            lag_monitor_stop.store(true, Ordering::SeqCst);
            let _ = shutdown_tx.send(());
        });
    }

    let state = AppState::new(config.clone()).context("failed to build fan-out core")?;

    // Drain on shutdown signal so outbound queues close and sessions wind
    // down while the listener stops accepting; without this, graceful
    // shutdown could wait on long-lived sockets that never end on their own.
    {
        let hub = state.hub.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let _ = shutdown_rx.recv().await;
            hub.drain().await;
        });
    }

    tokio::spawn(
        Arc::clone(&state.window)
            .run_sweeper(config.memory.cleanup_interval, shutdown_tx.subscribe()),
    );
    tokio::spawn(Arc::clone(&state.limiter).run_sweeper(shutdown_tx.subscribe()));
    tokio::spawn(
        Arc::clone(&state.scaler)
            .run_monitor(config.scaling.monitor_interval, shutdown_tx.subscribe()),
    );

    let cache = Arc::new(SnapshotCache::connect(&config.redis, Arc::clone(&state.metrics)).await);

    let producer = match SnapshotProducer::connect(&config.kafka).await {
        Ok(producer) => Some(Arc::new(producer)),
        Err(e) if config.kafka.fail_fast => {
            error!(error = %e, "bus producer unavailable and fail-fast is set, exiting");
            return Err(e.into());
        }
        Err(e) => {
            warn!(error = %e, "bus producer unavailable, publishing disabled");
            None
        }
    };

    let mut lag_monitor = None;
    match SnapshotConsumer::connect(&config.kafka, &config.identity).await {
        Ok(consumer) => {
            state.readiness.set_consumer_up();
            lag_monitor = Some(spawn_lag_monitor(
                config.kafka.clone(),
                consumer.group_id().to_string(),
                consumer.offsets(),
                state.metrics.consumer_lag.clone(),
                Arc::clone(&lag_monitor_stop),
                config.scaling.monitor_interval,
            ));
            let hub = state.hub.clone();
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                consumer
                    .run(shutdown_rx, move |payload| hub.broadcast(payload))
                    .await;
            });
        }
        Err(e) if config.kafka.fail_fast => {
            error!(error = %e, "bus consumer unavailable and fail-fast is set, exiting");
            return Err(e.into());
        }
        Err(e) => {
            warn!(
                error = %e,
                "bus consumer unavailable, running degraded: subscribers connect but receive no events until the bus recovers"
            );
        }
    }

    spawn_feeder(
        config.clone(),
        state.clone(),
        Arc::clone(&cache),
        producer.clone(),
        shutdown_tx.subscribe(),
    );

    let router = build_router(state.clone());
    let addr = format!("0.0.0.0:{}", config.websocket.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    state.readiness.set_listener_up();
    info!(%addr, "listening");

    let mut shutdown_rx_server = shutdown_tx.subscribe();
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx_server.recv().await;
        info!("server closing connections");
    })
    .await
    .context("server error")?;

    // The listener is down; give outbound queues their grace, then force.
    state.hub.drain().await;

    if let Some(handle) = lag_monitor {
        if tokio::task::spawn_blocking(move || handle.join())
            .await
            .map(|r| r.is_err())
            .unwrap_or(true)
        {
            warn!("lag monitor thread did not join cleanly");
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Upstream poll → validate → cache → publish loop.
///
/// A failed poll falls back to the cached snapshot so the bus keeps
/// carrying a recent picture while the upstream feed flaps.
fn spawn_feeder(
    config: Config,
    state: AppState,
    cache: Arc<SnapshotCache>,
    producer: Option<Arc<SnapshotProducer>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let fetcher = match FlightFetcher::new(&config.fetch) {
            Ok(fetcher) => fetcher,
            Err(e) => {
                error!(error = %e, "fetcher construction failed, upstream polling disabled");
                return;
            }
        };
        info!(
            url = %config.fetch.url,
            interval = ?config.fetch.interval,
            "upstream poller started"
        );

        let mut ticker = tokio::time::interval(config.fetch.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("upstream poller stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let fetch_started = Instant::now();
                    let fetched = fetcher.fetch().await;
                    state
                        .metrics
                        .fetch_latency
                        .observe(fetch_started.elapsed().as_secs_f64());

                    let payload: Bytes = match fetched {
                        Ok(vectors) => {
                            let processing_started = Instant::now();
                            let payload = match serde_json::to_vec(&vectors) {
                                Ok(bytes) => Bytes::from(bytes),
                                Err(e) => {
                                    error!(error = %e, "snapshot serialization failed");
                                    continue;
                                }
                            };
                            if let Err(e) = schema::validate_snapshot(&payload) {
                                error!(error = %e, "fetched snapshot failed validation, dropping");
                                continue;
                            }
                            state
                                .metrics
                                .processing_time
                                .observe(processing_started.elapsed().as_secs_f64());
                            cache.store(&payload).await;
                            debug!(records = vectors.len(), "upstream snapshot processed");
                            payload
                        }
                        Err(e) => {
                            error!(error = %e, "upstream fetch failed");
                            match cache.load_latest().await {
                                Some(stale) => {
                                    info!("republishing cached snapshot while upstream is down");
                                    stale
                                }
                                None => continue,
                            }
                        }
                    };

                    if let Some(producer) = &producer {
                        match producer.publish(payload).await {
                            Ok((partition, offset)) => {
                                debug!(partition, offset, "snapshot published");
                            }
                            Err(e) => error!(error = %e, "snapshot publish failed"),
                        }
                    }
                }
            }
        }
    });
}

/// Watermark-diff lag monitor on a dedicated thread.
///
/// `fetch_watermarks` blocks, so this stays off the runtime entirely; the
/// stop flag is checked every second so shutdown does not wait out a full
/// interval.
fn spawn_lag_monitor(
    bus: BusConfig,
    group_id: String,
    offsets: PartitionOffsets,
    gauge: IntGauge,
    stop: Arc<AtomicBool>,
    interval: Duration,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let tick = Duration::from_secs(1);
        let mut since_last_check = interval;
        while !stop.load(Ordering::SeqCst) {
            if since_last_check >= interval {
                since_last_check = Duration::ZERO;
                let consumed: HashMap<i32, i64> = offsets
                    .read()
                    .map(|m| m.clone())
                    .unwrap_or_default();
                if !consumed.is_empty() {
                    match fetch_total_lag(
                        &bus.broker_address,
                        &group_id,
                        &bus.topic,
                        &consumed,
                        WATERMARK_TIMEOUT,
                    ) {
                        Ok(lag) => {
                            gauge.set(lag);
                            debug!(lag, "consumer lag updated");
                        }
                        Err(e) => warn!(error = %e, "watermark fetch failed"),
                    }
                }
            }
            std::thread::sleep(tick);
            since_last_check += tick;
        }
    })
}
