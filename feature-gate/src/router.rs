use std::future::ready;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::api::endpoint;
use crate::config::Config;
use crate::flags::flag_source::InMemoryFlagSource;
use crate::gate::service::GateService;
use crate::health::HealthRegistry;
use crate::metrics::utils::setup_metrics_routes;
use crate::performance::hysteresis::Thresholds;
use crate::performance::monitor::SampleWindow;
use crate::performance::state::PerformanceCell;

#[derive(Clone)]
pub struct State {
    pub gate: Arc<GateService>,
    pub performance: Arc<PerformanceCell>,
    // Concrete type: the flag endpoint edits definitions, which the trait doesn't expose
    pub flag_source: Arc<InMemoryFlagSource>,
    pub window: SampleWindow,
    pub thresholds: Thresholds,
    pub config: Config,
}

pub fn router(
    gate: Arc<GateService>,
    performance: Arc<PerformanceCell>,
    flag_source: Arc<InMemoryFlagSource>,
    window: SampleWindow,
    thresholds: Thresholds,
    liveness: HealthRegistry,
    config: Config,
) -> Router {
    let state = State {
        gate,
        performance,
        flag_source,
        window: window.clone(),
        thresholds,
        config: config.clone(),
    };

    // liveness/readiness checks
    let status_router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(move || readiness(window.clone())))
        .route("/_liveness", get(move || ready(liveness.get_status())));

    let gate_router = Router::new()
        .route("/subjects", post(endpoint::identify))
        .route("/subjects/:subject_key", delete(endpoint::end_session))
        .route(
            "/subjects/:subject_key/overrides",
            delete(endpoint::clear_overrides),
        )
        .route(
            "/subjects/:subject_key/overrides/:flag_key",
            put(endpoint::set_override),
        )
        .route("/gates/:flag_key/:subject_key", get(endpoint::evaluate_gate))
        .route("/flags/:flag_key", put(endpoint::upsert_flag))
        .route("/performance", get(endpoint::performance))
        .route("/performance/mode", post(endpoint::set_simulation_mode))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrency));

    let router = Router::new()
        .merge(status_router)
        .merge(gate_router)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Don't install metrics unless asked to
    // Global metrics recorders can play poorly with e.g. tests
    if config.enable_metrics {
        setup_metrics_routes(router)
    } else {
        router
    }
}

/// Ready once the monitor has taken its first sample, so the kill switch reflects a real
/// measurement instead of the startup record.
pub async fn readiness(window: SampleWindow) -> Result<&'static str, (StatusCode, String)> {
    if window.snapshot().is_empty() {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "performance monitor has not sampled yet".to_string(),
        ));
    }
    Ok("ready")
}

pub async fn index() -> &'static str {
    "feature gate"
}
