use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{debug_handler, Json};
use tracing::{info, instrument};

use crate::api::errors::GateError;
use crate::api::types::{
    ClearOverridesResponse, IdentifyResponse, OverrideRequest, OverrideResponse,
    PerformanceResponse, SimulationModeRequest,
};
use crate::flags::flag_models::FlagDefinition;
use crate::gate::resolver::EffectiveDecision;
use crate::performance::state::PerformanceState;
use crate::router;
use crate::subject::SubjectContext;

fn decode<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, GateError> {
    if body.is_empty() {
        return Err(GateError::RequestDecodingError(
            "empty request body".to_string(),
        ));
    }
    Ok(serde_json::from_slice(body)?)
}

/// Starts a subject session and returns the remote decision for every known flag.
#[debug_handler]
pub async fn identify(
    State(state): State<router::State>,
    body: Bytes,
) -> Result<Json<IdentifyResponse>, GateError> {
    let subject: SubjectContext = decode(&body)?;
    let subject_key = subject.key.clone();
    let decisions = state.gate.identify(subject).await?;
    info!(%subject_key, flags = decisions.len(), "subject identified");

    Ok(Json(IdentifyResponse {
        subject_key,
        decisions,
    }))
}

pub async fn end_session(
    State(state): State<router::State>,
    Path(subject_key): Path<String>,
) -> Result<StatusCode, GateError> {
    if !state.gate.end_session(&subject_key) {
        return Err(GateError::UnknownSubject(subject_key));
    }
    info!(%subject_key, "session ended");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn evaluate_gate(
    State(state): State<router::State>,
    Path((flag_key, subject_key)): Path<(String, String)>,
) -> Json<EffectiveDecision> {
    Json(state.gate.evaluate(&flag_key, &subject_key))
}

pub async fn performance(State(state): State<router::State>) -> Json<PerformanceResponse> {
    Json(PerformanceResponse {
        gated_flag_key: state.config.gated_flag_key.clone(),
        state: state.performance.snapshot(),
        thresholds: state.thresholds,
        window: state.window.snapshot(),
    })
}

/// Operator command switching the sampler between normal and high load conditions.
#[instrument(skip_all)]
pub async fn set_simulation_mode(
    State(state): State<router::State>,
    body: Bytes,
) -> Result<Json<PerformanceState>, GateError> {
    let request: SimulationModeRequest = decode(&body)?;
    let mode = request.mode()?;
    Ok(Json(state.performance.set_simulation_mode(mode)))
}

pub async fn set_override(
    State(state): State<router::State>,
    Path((subject_key, flag_key)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<OverrideResponse>, GateError> {
    let request: OverrideRequest = decode(&body)?;
    let value = request.value()?;
    state.gate.set_override(&subject_key, &flag_key, value)?;

    Ok(Json(OverrideResponse {
        overrides: state.gate.overrides(&subject_key),
        decision: state.gate.evaluate(&flag_key, &subject_key),
        subject_key,
    }))
}

pub async fn clear_overrides(
    State(state): State<router::State>,
    Path(subject_key): Path<String>,
) -> Result<Json<ClearOverridesResponse>, GateError> {
    let cleared = state.gate.clear_all_overrides(&subject_key)?;
    Ok(Json(ClearOverridesResponse {
        subject_key,
        cleared,
    }))
}

/// Replaces a flag's targeting. Active sessions pick the change up through the flag
/// source's change notifications.
pub async fn upsert_flag(
    State(state): State<router::State>,
    Path(flag_key): Path<String>,
    body: Bytes,
) -> Result<Json<FlagDefinition>, GateError> {
    let definition: FlagDefinition = decode(&body)?;
    if definition.key != flag_key {
        return Err(GateError::FlagKeyMismatch {
            path: flag_key,
            body: definition.key,
        });
    }
    state.flag_source.upsert(definition.clone());
    info!(%flag_key, "flag definition updated");
    Ok(Json(definition))
}
