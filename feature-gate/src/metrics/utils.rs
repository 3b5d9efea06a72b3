use std::sync::OnceLock;
use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// Latency samples are in milliseconds, so the buckets straddle the default thresholds
const SAMPLE_BUCKETS: &[f64] = &[
    50.0, 100.0, 150.0, 200.0, 300.0, 400.0, 500.0, 600.0, 750.0, 900.0, 1200.0,
];

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global prometheus recorder once and hands out the render handle.
/// Test servers call this repeatedly in the same process, so a second install is a no-op.
pub fn setup_metrics_recorder() -> PrometheusHandle {
    RECORDER
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let builder = match builder.set_buckets(SAMPLE_BUCKETS) {
                Ok(builder) => builder,
                Err(e) => {
                    tracing::warn!("invalid histogram buckets, using defaults: {}", e);
                    PrometheusBuilder::new()
                }
            };
            match builder.install_recorder() {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!("metrics recorder already installed: {}", e);
                    PrometheusBuilder::new().build_recorder().handle()
                }
            }
        })
        .clone()
}

/// Add the prometheus endpoint and middleware to a router, should be called last.
pub fn setup_metrics_routes(router: Router) -> Router {
    let recorder_handle = setup_metrics_recorder();

    router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics))
}

pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    ::metrics::counter!("http_requests_total", &labels).increment(1);
    ::metrics::histogram!("http_requests_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}

pub fn inc(name: &'static str, labels: &[(String, String)], value: u64) {
    ::metrics::counter!(name, labels).increment(value);
}

pub fn gauge(name: &'static str, labels: &[(String, String)], value: f64) {
    ::metrics::gauge!(name, labels).set(value);
}

pub fn histogram(name: &'static str, labels: &[(String, String)], value: f64) {
    ::metrics::histogram!(name, labels).record(value);
}

pub fn label(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}
