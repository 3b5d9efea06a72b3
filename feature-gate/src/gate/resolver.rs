use serde::{Deserialize, Serialize};
use strum::Display;

use crate::flags::flag_models::{DecisionReason, FlagDecision};
use crate::performance::state::PerformanceState;

/// The authority layer that produced an effective value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DecisionLayer {
    Remote,
    KillSwitch,
    Override,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DecisionSources {
    pub remote: bool,
    #[serde(rename = "override")]
    pub override_value: Option<bool>,
    pub kill_switch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EffectiveDecision {
    pub flag_key: String,
    pub subject_key: String,
    pub value: bool,
    pub decided_by: DecisionLayer,
    pub remote_reason: DecisionReason,
    pub sources: DecisionSources,
}

type Suppression = fn(&DecisionSources) -> bool;

// Layers that may switch a remote `true` off, checked in order. Nothing in here can turn a
// remote `false` on.
const SUPPRESSIONS: &[(DecisionLayer, Suppression)] = &[
    (DecisionLayer::KillSwitch, |s: &DecisionSources| {
        s.remote && s.kill_switch
    }),
    (DecisionLayer::Override, |s: &DecisionSources| {
        s.remote && s.override_value == Some(false)
    }),
];

/// Combines the remote targeting decision, the subject's manual override and the global
/// kill switch into the value a caller should act on. Pure: the same inputs always give
/// the same decision.
pub fn resolve(
    remote: &FlagDecision,
    override_value: Option<bool>,
    performance: &PerformanceState,
) -> EffectiveDecision {
    let sources = DecisionSources {
        remote: remote.value,
        override_value,
        kill_switch: performance.kill_switch_armed,
    };

    let (value, decided_by) = match SUPPRESSIONS.iter().find(|(_, applies)| applies(&sources)) {
        Some((layer, _)) => (false, *layer),
        None => (remote.value, DecisionLayer::Remote),
    };

    EffectiveDecision {
        flag_key: remote.flag_key.clone(),
        subject_key: remote.subject_key.clone(),
        value,
        decided_by,
        remote_reason: remote.reason,
        sources,
    }
}
