//! Prometheus metrics for dispatch and snapshot assembly

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, TextEncoder};
use std::sync::OnceLock;
use tracing::warn;

static METRICS: OnceLock<FeedMetrics> = OnceLock::new();

/// Process-wide feed counters, registered once in the default registry
pub struct FeedMetrics {
    pub dispatched_events: IntCounter,
    pub listener_failures: IntCounter,
    pub backpressure_waits: IntCounter,
    pub snapshot_requests: IntCounterVec,
}

impl FeedMetrics {
    pub fn global() -> &'static FeedMetrics {
        METRICS.get_or_init(FeedMetrics::register)
    }

    fn register() -> Self {
        let metrics = Self {
            dispatched_events: IntCounter::new(
                "dispatched_events_total",
                "Events fanned out by event buses",
            )
            .expect("valid metric"),
            listener_failures: IntCounter::new(
                "listener_failures_total",
                "Listener invocations that panicked",
            )
            .expect("valid metric"),
            backpressure_waits: IntCounter::new(
                "backpressure_waits_total",
                "Dispatches that waited for the oldest outstanding dispatch",
            )
            .expect("valid metric"),
            snapshot_requests: IntCounterVec::new(
                Opts::new("snapshot_requests_total", "Time-series snapshot requests by outcome"),
                &["outcome"],
            )
            .expect("valid metric"),
        };

        let registry = prometheus::default_registry();
        let collectors: [Box<dyn prometheus::core::Collector>; 4] = [
            Box::new(metrics.dispatched_events.clone()),
            Box::new(metrics.listener_failures.clone()),
            Box::new(metrics.backpressure_waits.clone()),
            Box::new(metrics.snapshot_requests.clone()),
        ];
        for collector in collectors {
            if let Err(e) = registry.register(collector) {
                warn!(error = %e, "Failed to register feed metric");
            }
        }

        metrics
    }
}

/// Render the default registry in the text exposition format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
