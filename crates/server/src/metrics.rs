//! Prometheus metrics for the Hopper server.
//!
//! Metrics carry only aggregate counts and durations; no session keys,
//! file names, or paths. When the `/metrics` endpoint is enabled it must be
//! network-restricted to authorized scraper IPs at the infrastructure level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static SESSIONS_STARTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_upload_sessions_started_total",
        "Total number of chunked upload sessions started",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_FINALIZED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_upload_sessions_finalized_total",
        "Total number of sessions whose artifact reached the declared size",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_upload_sessions_expired_total",
        "Total number of abandoned sessions removed by the sweep",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_OVERSHOT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_upload_sessions_overshot_total",
        "Total number of sessions failed because the artifact exceeded the declared size",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_APPENDED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_chunks_appended_total",
        "Total number of chunks appended to session artifacts",
    )
    .expect("metric creation failed")
});

pub static BYTES_APPENDED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_bytes_appended_total",
        "Total bytes appended to session artifacts",
    )
    .expect("metric creation failed")
});

pub static FILES_PERSISTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_files_persisted_total",
        "Total number of completed files handed to persistence",
    )
    .expect("metric creation failed")
});

pub static BUSY_REJECTIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_busy_rejections_total",
        "Total number of overlapping same-session requests rejected",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hopper_upload_errors_total",
            "Total upload request errors by code",
        ),
        &["code"],
    )
    .expect("metric creation failed")
});

pub static CHUNK_APPEND_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "hopper_chunk_append_duration_seconds",
            "Time taken to append one chunk",
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

/// Record an upload error occurrence by error code.
pub fn record_upload_error(code: &str) {
    UPLOAD_ERRORS.with_label_values(&[code]).inc();
}

static REGISTER: Once = Once::new();

/// Register all metrics with the global registry. Idempotent.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(SESSIONS_STARTED.clone()),
            Box::new(SESSIONS_FINALIZED.clone()),
            Box::new(SESSIONS_EXPIRED.clone()),
            Box::new(SESSIONS_OVERSHOT.clone()),
            Box::new(CHUNKS_APPENDED.clone()),
            Box::new(BYTES_APPENDED.clone()),
            Box::new(FILES_PERSISTED.clone()),
            Box::new(BUSY_REJECTIONS.clone()),
            Box::new(UPLOAD_ERRORS.clone()),
            Box::new(CHUNK_APPEND_DURATION.clone()),
        ];
        for metric in metrics {
            if let Err(e) = REGISTRY.register(metric) {
                tracing::warn!(error = %e, "failed to register metric");
            }
        }
    });
}

/// GET /metrics - Prometheus text exposition.
pub async fn metrics_handler() -> axum::response::Response {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new()).into_response();
    }
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}
