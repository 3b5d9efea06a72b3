use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::errors::GateError;
use crate::flags::flag_models::FlagDecision;
use crate::gate::overrides::Override;
use crate::gate::resolver::EffectiveDecision;
use crate::performance::hysteresis::Thresholds;
use crate::performance::monitor::RecordedSample;
use crate::performance::state::{PerformanceState, SimulationMode};

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct IdentifyResponse {
    pub subject_key: String,
    pub decisions: Vec<FlagDecision>,
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct SimulationModeRequest {
    pub mode: String,
}

impl SimulationModeRequest {
    pub fn mode(&self) -> Result<SimulationMode, GateError> {
        self.mode
            .trim()
            .parse::<SimulationMode>()
            .map_err(|_| GateError::InvalidSimulationMode(self.mode.clone()))
    }
}

/// Body of an override command. `value` is kept raw so anything that isn't a boolean or
/// null can be rejected with a precise error instead of a generic parse failure.
#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct OverrideRequest {
    #[serde(default)]
    pub value: Value,
}

impl OverrideRequest {
    pub fn value(&self) -> Result<Option<bool>, GateError> {
        match &self.value {
            Value::Bool(value) => Ok(Some(*value)),
            Value::Null => Ok(None),
            other => Err(GateError::InvalidOverrideValue(other.to_string())),
        }
    }
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct OverrideResponse {
    pub subject_key: String,
    pub overrides: Vec<Override>,
    pub decision: EffectiveDecision,
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct ClearOverridesResponse {
    pub subject_key: String,
    pub cleared: usize,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct PerformanceResponse {
    pub gated_flag_key: String,
    pub state: PerformanceState,
    pub thresholds: Thresholds,
    pub window: Vec<RecordedSample>,
}
