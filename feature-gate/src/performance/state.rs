use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::watch;

use crate::metrics::consts::SIMULATION_MODE_CHANGES_COUNTER;
use crate::metrics::utils::{inc, label};

/// Input condition for the sampler, set by operators.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    EnumString,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SimulationMode {
    #[default]
    Normal,
    #[serde(alias = "high-latency", alias = "high-load")]
    #[strum(to_string = "high_load", serialize = "high-load", serialize = "high-latency")]
    HighLoad,
}

/// Process-wide performance record. Only ever replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct PerformanceState {
    pub current_signal: f64,
    pub kill_switch_armed: bool,
    pub simulation_mode: SimulationMode,
}

impl Default for PerformanceState {
    fn default() -> Self {
        Self {
            current_signal: 0.0,
            kill_switch_armed: false,
            simulation_mode: SimulationMode::Normal,
        }
    }
}

/// Owner of the process-wide [`PerformanceState`].
///
/// Writes go through two entry points only: [`PerformanceCell::set_simulation_mode`] for
/// operators, and `record_sample` for the monitor, which is the only path that can change
/// `kill_switch_armed`. Each write swaps in a complete new record, so a reader holding a
/// [`PerformanceReader`] sees either the previous record or the next one, never a mix.
#[derive(Debug)]
pub struct PerformanceCell {
    sender: watch::Sender<PerformanceState>,
}

impl PerformanceCell {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(PerformanceState::default());
        Self { sender }
    }

    pub fn reader(&self) -> PerformanceReader {
        PerformanceReader {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn snapshot(&self) -> PerformanceState {
        *self.sender.borrow()
    }

    /// Operator command. Leaves the signal and the kill switch untouched, the next monitor
    /// tick picks the new mode up.
    pub fn set_simulation_mode(&self, mode: SimulationMode) -> PerformanceState {
        let mut next = PerformanceState::default();
        self.sender.send_modify(|state| {
            next = PerformanceState {
                simulation_mode: mode,
                ..*state
            };
            *state = next;
        });
        tracing::info!(mode = %mode, "simulation mode set");
        inc(
            SIMULATION_MODE_CHANGES_COUNTER,
            &[label("mode", mode)],
            1,
        );
        next
    }

    /// Stores one monitor sample together with the arm status derived from it. The mode is
    /// carried over from the current record, so a concurrent mode change is never lost.
    pub(crate) fn record_sample(&self, signal: f64, kill_switch_armed: bool) -> PerformanceState {
        let mut next = PerformanceState::default();
        self.sender.send_modify(|state| {
            next = PerformanceState {
                current_signal: signal,
                kill_switch_armed,
                ..*state
            };
            *state = next;
        });
        next
    }
}

impl Default for PerformanceCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the performance record.
#[derive(Debug, Clone)]
pub struct PerformanceReader {
    receiver: watch::Receiver<PerformanceState>,
}

impl PerformanceReader {
    pub fn snapshot(&self) -> PerformanceState {
        *self.receiver.borrow()
    }

    /// Waits for the next replacement of the record and returns it. Returns `None` once the
    /// owning cell is gone.
    pub async fn changed(&mut self) -> Option<PerformanceState> {
        self.receiver.changed().await.ok()?;
        Some(*self.receiver.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let cell = PerformanceCell::new();
        assert_eq!(
            cell.snapshot(),
            PerformanceState {
                current_signal: 0.0,
                kill_switch_armed: false,
                simulation_mode: SimulationMode::Normal,
            }
        );
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(
            "normal".parse::<SimulationMode>().unwrap(),
            SimulationMode::Normal
        );
        assert_eq!(
            "HIGH_LOAD".parse::<SimulationMode>().unwrap(),
            SimulationMode::HighLoad
        );
        assert_eq!(
            "high-latency".parse::<SimulationMode>().unwrap(),
            SimulationMode::HighLoad
        );
        assert!("turbo".parse::<SimulationMode>().is_err());
        assert_eq!(SimulationMode::HighLoad.to_string(), "high_load");
    }

    #[test]
    fn test_mode_override_keeps_signal_and_arm_status() {
        let cell = PerformanceCell::new();
        cell.record_sample(720.0, true);

        let state = cell.set_simulation_mode(SimulationMode::HighLoad);

        assert_eq!(state.current_signal, 720.0);
        assert!(state.kill_switch_armed);
        assert_eq!(state.simulation_mode, SimulationMode::HighLoad);
        assert_eq!(cell.snapshot(), state);
    }

    #[test]
    fn test_sample_keeps_mode() {
        let cell = PerformanceCell::new();
        cell.set_simulation_mode(SimulationMode::HighLoad);

        let state = cell.record_sample(640.0, false);

        assert_eq!(state.simulation_mode, SimulationMode::HighLoad);
        assert_eq!(state.current_signal, 640.0);
    }

    #[tokio::test]
    async fn test_readers_observe_replacements() {
        let cell = PerformanceCell::new();
        let mut reader = cell.reader();

        cell.record_sample(450.0, false);
        let state = reader.changed().await.unwrap();

        assert_eq!(state.current_signal, 450.0);
        assert_eq!(reader.snapshot(), cell.snapshot());
    }

    #[tokio::test]
    async fn test_reader_stops_when_cell_dropped() {
        let cell = PerformanceCell::new();
        let mut reader = cell.reader();
        drop(cell);

        assert_eq!(reader.changed().await, None);
        assert_eq!(reader.snapshot(), PerformanceState::default());
    }
}
