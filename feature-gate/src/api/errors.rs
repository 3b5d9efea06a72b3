use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors raised at the command boundary. Anything rejected here leaves the performance
/// record, the overrides and the flag definitions unchanged.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("failed to decode request: {0}")]
    RequestDecodingError(String),
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),
    #[error("unknown simulation mode '{0}', expected normal or high_load")]
    InvalidSimulationMode(String),
    #[error("invalid override value {0}, expected true, false or null")]
    InvalidOverrideValue(String),
    #[error("no active session for subject '{0}'")]
    UnknownSubject(String),
    #[error("unknown flag '{0}'")]
    UnknownFlag(String),
    #[error("subject key must not be empty")]
    MissingSubjectKey,
    #[error("flag key in path '{path}' does not match definition key '{body}'")]
    FlagKeyMismatch { path: String, body: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub code: &'static str,
    pub detail: String,
}

impl GateError {
    fn error_metadata(&self) -> (&'static str, StatusCode) {
        match self {
            GateError::RequestDecodingError(_) => {
                ("request_decoding_error", StatusCode::BAD_REQUEST)
            }
            GateError::RequestParsingError(_) => ("request_parsing_error", StatusCode::BAD_REQUEST),
            GateError::InvalidSimulationMode(_) => {
                ("invalid_simulation_mode", StatusCode::BAD_REQUEST)
            }
            GateError::InvalidOverrideValue(_) => {
                ("invalid_override_value", StatusCode::BAD_REQUEST)
            }
            GateError::UnknownSubject(_) => ("unknown_subject", StatusCode::NOT_FOUND),
            GateError::UnknownFlag(_) => ("unknown_flag", StatusCode::NOT_FOUND),
            GateError::MissingSubjectKey => ("missing_subject_key", StatusCode::BAD_REQUEST),
            GateError::FlagKeyMismatch { .. } => ("flag_key_mismatch", StatusCode::BAD_REQUEST),
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let (code, status) = self.error_metadata();
        tracing::warn!(code, error = %self, "rejected command");
        let body = ErrorResponse {
            error_type: if status == StatusCode::NOT_FOUND {
                "not_found"
            } else {
                "validation_error"
            },
            code,
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
