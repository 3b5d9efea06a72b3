use serde::Serialize;
use strum::Display;

use crate::config::ConfigError;

/// Arm and disarm cutoffs for the kill switch. The disarm cutoff is strictly lower than the
/// arm cutoff; samples between the two keep whatever state the switch is already in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    arm: f64,
    disarm: f64,
}

impl Thresholds {
    pub fn new(arm: f64, disarm: f64) -> Result<Self, ConfigError> {
        if !arm.is_finite() || !disarm.is_finite() || disarm >= arm {
            return Err(ConfigError::InvalidThresholds { arm, disarm });
        }
        Ok(Self { arm, disarm })
    }

    pub fn arm(&self) -> f64 {
        self.arm
    }

    pub fn disarm(&self) -> f64 {
        self.disarm
    }

    /// Decides what one sample does to the kill switch.
    ///
    /// Arming needs the gated feature to be on remotely for at least one active subject,
    /// since there is nothing to protect otherwise. Disarming only looks at the signal.
    pub fn transition(&self, armed: bool, sample: f64, remote_active: bool) -> Transition {
        match armed {
            false if sample > self.arm && remote_active => Transition::Arm,
            true if sample < self.disarm => Transition::Disarm,
            _ => Transition::Hold,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            arm: 500.0,
            disarm: 300.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Transition {
    Arm,
    Disarm,
    Hold,
}

impl Transition {
    pub fn armed_after(self, armed: bool) -> bool {
        match self {
            Transition::Arm => true,
            Transition::Disarm => false,
            Transition::Hold => armed,
        }
    }
}
