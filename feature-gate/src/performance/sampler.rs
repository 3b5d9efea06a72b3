use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SignalRange;
use crate::performance::state::SimulationMode;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRanges {
    pub high_load: SignalRange,
    pub enabled: SignalRange,
    pub baseline: SignalRange,
}

impl Default for SampleRanges {
    fn default() -> Self {
        Self {
            high_load: SignalRange::new(600.0, 900.0),
            enabled: SignalRange::new(400.0, 500.0),
            baseline: SignalRange::new(80.0, 150.0),
        }
    }
}

impl SampleRanges {
    pub fn range_for(&self, mode: SimulationMode, feature_enabled: bool) -> SignalRange {
        match (mode, feature_enabled) {
            (SimulationMode::HighLoad, _) => self.high_load,
            (SimulationMode::Normal, true) => self.enabled,
            (SimulationMode::Normal, false) => self.baseline,
        }
    }
}

/// Produces one performance signal value per monitor tick. Must not block.
pub trait SignalSampler: Send {
    fn sample(&mut self, mode: SimulationMode, feature_enabled: bool) -> f64;
}

/// Draws latency-like values from the range matching the current conditions, in whole
/// milliseconds.
pub struct SimulatedSignal {
    ranges: SampleRanges,
    rng: StdRng,
}

impl SimulatedSignal {
    pub fn new(ranges: SampleRanges) -> Self {
        Self {
            ranges,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(ranges: SampleRanges, seed: u64) -> Self {
        Self {
            ranges,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl SignalSampler for SimulatedSignal {
    fn sample(&mut self, mode: SimulationMode, feature_enabled: bool) -> f64 {
        let range = self.ranges.range_for(mode, feature_enabled);
        self.rng.gen_range(range.as_range()).round()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_all_within(
        sampler: &mut SimulatedSignal,
        mode: SimulationMode,
        on: bool,
        low: f64,
        high: f64,
    ) {
        for _ in 0..500 {
            let sample = sampler.sample(mode, on);
            assert!(
                (low..=high).contains(&sample),
                "{sample} outside {low}..={high} for {mode} (feature on: {on})"
            );
            assert_eq!(sample, sample.round());
        }
    }

    #[test]
    fn test_high_load_ignores_flag_state() {
        let mut sampler = SimulatedSignal::seeded(SampleRanges::default(), 7);
        assert_all_within(&mut sampler, SimulationMode::HighLoad, true, 600.0, 900.0);
        assert_all_within(&mut sampler, SimulationMode::HighLoad, false, 600.0, 900.0);
    }

    #[test]
    fn test_normal_mode_follows_feature_state() {
        let mut sampler = SimulatedSignal::seeded(SampleRanges::default(), 11);
        assert_all_within(&mut sampler, SimulationMode::Normal, true, 400.0, 500.0);
        assert_all_within(&mut sampler, SimulationMode::Normal, false, 80.0, 150.0);
    }

    #[test]
    fn test_degenerate_range_is_a_constant() {
        let ranges = SampleRanges {
            high_load: SignalRange::new(700.0, 700.0),
            ..SampleRanges::default()
        };
        let mut sampler = SimulatedSignal::seeded(ranges, 3);
        assert_eq!(sampler.sample(SimulationMode::HighLoad, false), 700.0);
    }

    #[test]
    fn test_seeded_samplers_are_reproducible() {
        let mut a = SimulatedSignal::seeded(SampleRanges::default(), 42);
        let mut b = SimulatedSignal::seeded(SampleRanges::default(), 42);
        for _ in 0..20 {
            assert_eq!(
                a.sample(SimulationMode::Normal, true),
                b.sample(SimulationMode::Normal, true)
            );
        }
    }
}
