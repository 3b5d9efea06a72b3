use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::health::HealthHandle;
use crate::metrics::consts::{
    KILL_SWITCH_ARMED_GAUGE, KILL_SWITCH_TRANSITIONS_COUNTER, PERFORMANCE_SIGNAL_GAUGE,
};
use crate::metrics::utils::{gauge, inc, label};
use crate::performance::hysteresis::{Thresholds, Transition};
use crate::performance::sampler::SignalSampler;
use crate::performance::state::{PerformanceCell, PerformanceState, SimulationMode};
use crate::subject::SubjectContext;
use crate::telemetry::emitter::TelemetryEmitter;
use crate::telemetry::sink::MetricEvent;

/// Subject attached to samples taken while nobody is using the service.
pub const MONITOR_SUBJECT_KEY: &str = "monitor";

/// What the monitor needs to know about the gated feature's current audience.
pub trait FeatureActivity: Send + Sync {
    /// Whether the flag source serves the flag to at least one active subject.
    fn remote_enabled_for_any(&self, flag_key: &str) -> bool;

    /// Whether at least one active subject ends up with the feature on after every layer.
    fn effectively_enabled_for_any(&self, flag_key: &str) -> bool;

    fn active_subjects(&self) -> Vec<SubjectContext>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RecordedSample {
    pub value: f64,
    pub kill_switch_armed: bool,
    pub simulation_mode: SimulationMode,
    pub recorded_at: DateTime<Utc>,
}

/// The most recent samples, oldest first. Bounded, in memory only.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: Arc<Mutex<VecDeque<RecordedSample>>>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, sample: RecordedSample) {
        let Ok(mut samples) = self.samples.lock() else {
            warn!("poisoned sample window lock, dropping sample");
            return;
        };
        while samples.len() >= self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    pub fn snapshot(&self) -> Vec<RecordedSample> {
        match self.samples.lock() {
            Ok(samples) => samples.iter().copied().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub sample: f64,
    pub transition: Transition,
    pub state: PerformanceState,
    pub emitted: usize,
}

/// The control loop behind the kill switch.
///
/// Every tick samples the performance signal, runs it through the hysteresis rule, stores
/// the resulting record, and only then queues the telemetry. The monitor is the only writer
/// of the signal and of the arm status.
pub struct PerformanceMonitor {
    flag_key: String,
    thresholds: Thresholds,
    cell: Arc<PerformanceCell>,
    activity: Arc<dyn FeatureActivity>,
    sampler: Box<dyn SignalSampler>,
    emitter: TelemetryEmitter,
    window: SampleWindow,
    health: Option<HealthHandle>,
}

impl PerformanceMonitor {
    pub fn new(
        flag_key: &str,
        thresholds: Thresholds,
        cell: Arc<PerformanceCell>,
        activity: Arc<dyn FeatureActivity>,
        sampler: Box<dyn SignalSampler>,
        emitter: TelemetryEmitter,
        window: SampleWindow,
    ) -> Self {
        Self {
            flag_key: flag_key.to_string(),
            thresholds,
            cell,
            activity,
            sampler,
            emitter,
            window,
            health: None,
        }
    }

    pub fn with_health(mut self, health: HealthHandle) -> Self {
        self.health = Some(health);
        self
    }

    pub fn tick(&mut self) -> TickOutcome {
        let current = self.cell.snapshot();
        let enabled = self.activity.effectively_enabled_for_any(&self.flag_key);
        let sample = self.sampler.sample(current.simulation_mode, enabled);

        let remote_active = self.activity.remote_enabled_for_any(&self.flag_key);
        let transition =
            self.thresholds
                .transition(current.kill_switch_armed, sample, remote_active);
        let armed = transition.armed_after(current.kill_switch_armed);

        let state = self.cell.record_sample(sample, armed);

        gauge(PERFORMANCE_SIGNAL_GAUGE, &[], sample);
        gauge(KILL_SWITCH_ARMED_GAUGE, &[], if armed { 1.0 } else { 0.0 });
        match transition {
            Transition::Arm => {
                warn!(
                    sample,
                    threshold = self.thresholds.arm(),
                    flag_key = %self.flag_key,
                    "kill switch armed"
                );
                inc(KILL_SWITCH_TRANSITIONS_COUNTER, &[label("to", "armed")], 1);
            }
            Transition::Disarm => {
                info!(
                    sample,
                    threshold = self.thresholds.disarm(),
                    flag_key = %self.flag_key,
                    "kill switch disarmed"
                );
                inc(KILL_SWITCH_TRANSITIONS_COUNTER, &[label("to", "disarmed")], 1);
            }
            Transition::Hold => debug!(sample, armed, "performance sample"),
        }

        self.window.push(RecordedSample {
            value: sample,
            kill_switch_armed: state.kill_switch_armed,
            simulation_mode: state.simulation_mode,
            recorded_at: Utc::now(),
        });

        let emitted = self.emit(&state);

        TickOutcome {
            sample,
            transition,
            state,
            emitted,
        }
    }

    fn emit(&self, state: &PerformanceState) -> usize {
        let mut subjects = self.activity.active_subjects();
        if subjects.is_empty() {
            subjects.push(SubjectContext::new(MONITOR_SUBJECT_KEY));
        }

        let mut emitted = 0;
        for subject in subjects {
            let event = MetricEvent::latency(subject, state.current_signal)
                .with_attribute("simulation_mode", state.simulation_mode.to_string())
                .with_attribute("kill_switch_armed", state.kill_switch_armed);
            if self.emitter.emit(event) {
                emitted += 1;
            }
        }
        emitted
    }

    /// Ticks every `period` until `shutdown` fires or its sender is dropped.
    pub async fn run(mut self, period: Duration, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            period_ms = period.as_millis() as u64,
            flag_key = %self.flag_key,
            "starting performance monitor"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.tick();
                    if let Some(health) = &self.health {
                        health.report_healthy();
                    }
                }
            }
        }
        info!("performance monitor stopped");
    }

    pub fn spawn(self, period: Duration) -> MonitorHandle {
        let (shutdown, receiver) = oneshot::channel();
        let task = tokio::spawn(self.run(period, receiver));
        MonitorHandle {
            shutdown: Some(shutdown),
            task,
        }
    }
}

/// Stops the monitor loop when asked to, or when dropped.
pub struct MonitorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            if shutdown.send(()).is_err() {
                debug!("performance monitor already stopped");
            }
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "performance monitor task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::flag_models::{demo_definitions, AI_CHATBOT_FLAG};
    use crate::flags::flag_source::InMemoryFlagSource;
    use crate::gate::resolver::DecisionLayer;
    use crate::gate::service::GateService;
    use crate::health::HealthRegistry;
    use crate::test_utils::{demo_subject, ScriptedSignal, StaticActivity};
    use tokio::sync::mpsc;

    fn build_monitor(
        activity: Arc<dyn FeatureActivity>,
        samples: Vec<f64>,
        queue: usize,
    ) -> (
        PerformanceMonitor,
        Arc<PerformanceCell>,
        mpsc::Receiver<MetricEvent>,
        SampleWindow,
    ) {
        let cell = Arc::new(PerformanceCell::new());
        let (emitter, receiver) = TelemetryEmitter::channel(queue);
        let window = SampleWindow::new(3);
        let monitor = PerformanceMonitor::new(
            AI_CHATBOT_FLAG,
            Thresholds::default(),
            cell.clone(),
            activity,
            Box::new(ScriptedSignal::new(samples)),
            emitter,
            window.clone(),
        );
        (monitor, cell, receiver, window)
    }

    #[test]
    fn test_hysteresis_through_ticks() {
        let activity = Arc::new(StaticActivity::new(true, true, vec![]));
        let (mut monitor, cell, _receiver, _) =
            build_monitor(activity, vec![550.0, 450.0, 250.0], 8);

        let armed: Vec<bool> = (0..3).map(|_| monitor.tick().state.kill_switch_armed).collect();

        assert_eq!(armed, vec![true, true, false]);
        assert_eq!(cell.snapshot().current_signal, 250.0);
    }

    #[test]
    fn test_does_not_arm_without_remote_audience() {
        let activity = Arc::new(StaticActivity::new(false, false, vec![]));
        let (mut monitor, cell, _receiver, _) = build_monitor(activity, vec![800.0], 8);

        let outcome = monitor.tick();

        assert_eq!(outcome.transition, Transition::Hold);
        assert!(!cell.snapshot().kill_switch_armed);
        assert_eq!(cell.snapshot().current_signal, 800.0);
    }

    #[test]
    fn test_sampler_follows_mode_and_feature_state() {
        let activity = Arc::new(StaticActivity::new(true, false, vec![]));
        let sampler = ScriptedSignal::new(vec![100.0, 700.0]);
        let seen = sampler.seen();
        let cell = Arc::new(PerformanceCell::new());
        let (emitter, _receiver) = TelemetryEmitter::channel(8);
        let mut monitor = PerformanceMonitor::new(
            AI_CHATBOT_FLAG,
            Thresholds::default(),
            cell.clone(),
            activity,
            Box::new(sampler),
            emitter,
            SampleWindow::new(3),
        );

        monitor.tick();
        cell.set_simulation_mode(SimulationMode::HighLoad);
        monitor.tick();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (SimulationMode::Normal, false),
                (SimulationMode::HighLoad, false)
            ]
        );
    }

    #[tokio::test]
    async fn test_one_event_per_active_subject() {
        let subjects = vec![
            demo_subject("user1", "lab-owner"),
            demo_subject("user2", "beta-user"),
        ];
        let activity = Arc::new(StaticActivity::new(true, true, subjects));
        let (mut monitor, _, mut receiver, _) = build_monitor(activity, vec![640.0], 8);

        let outcome = monitor.tick();
        assert_eq!(outcome.emitted, 2);

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!(first.subject.key, "user1");
        assert_eq!(second.subject.key, "user2");
        assert_eq!(first.metric, "latency");
        assert_eq!(first.value, 640.0);
        assert_eq!(first.attributes["kill_switch_armed"], true);
        assert_eq!(first.attributes["simulation_mode"], "normal");
    }

    #[tokio::test]
    async fn test_idle_samples_use_the_monitor_subject() {
        let activity = Arc::new(StaticActivity::new(false, false, vec![]));
        let (mut monitor, _, mut receiver, _) = build_monitor(activity, vec![120.0], 8);

        monitor.tick();

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.subject.key, MONITOR_SUBJECT_KEY);
        assert_eq!(event.attributes["kill_switch_armed"], false);
    }

    #[test]
    fn test_full_queue_does_not_block_the_tick() {
        let activity = Arc::new(StaticActivity::new(true, true, vec![]));
        let (mut monitor, cell, _receiver, _) = build_monitor(activity, vec![450.0, 460.0], 1);

        assert_eq!(monitor.tick().emitted, 1);
        let outcome = monitor.tick();

        assert_eq!(outcome.emitted, 0);
        assert_eq!(cell.snapshot().current_signal, 460.0);
    }

    #[test]
    fn test_state_is_stored_before_emission() {
        let activity = Arc::new(StaticActivity::new(true, true, vec![]));
        let (mut monitor, cell, mut receiver, _) = build_monitor(activity, vec![700.0], 8);

        monitor.tick();

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.value, cell.snapshot().current_signal);
        assert_eq!(event.attributes["kill_switch_armed"], true);
    }

    #[test]
    fn test_window_keeps_latest_samples() {
        let activity = Arc::new(StaticActivity::new(true, true, vec![]));
        let (mut monitor, _, _receiver, window) =
            build_monitor(activity, vec![100.0, 200.0, 550.0, 450.0], 8);

        for _ in 0..4 {
            monitor.tick();
        }

        let values: Vec<f64> = window.snapshot().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![200.0, 550.0, 450.0]);
        assert!(window.snapshot()[1].kill_switch_armed);
        assert_eq!(window.capacity(), 3);
    }

    #[tokio::test]
    async fn test_kill_switch_scenario() {
        let source = Arc::new(InMemoryFlagSource::new(demo_definitions()));
        let cell = Arc::new(PerformanceCell::new());
        let gate = Arc::new(GateService::new(source, cell.reader()));
        gate.identify(demo_subject("user2", "beta-user"))
            .await
            .unwrap();

        let before = gate.evaluate(AI_CHATBOT_FLAG, "user2");
        assert!(before.value);

        let (emitter, _receiver) = TelemetryEmitter::channel(8);
        let mut monitor = PerformanceMonitor::new(
            AI_CHATBOT_FLAG,
            Thresholds::default(),
            cell.clone(),
            gate.clone(),
            Box::new(ScriptedSignal::new(vec![700.0])),
            emitter,
            SampleWindow::new(10),
        );
        let outcome = monitor.tick();
        assert_eq!(outcome.transition, Transition::Arm);

        let after = gate.evaluate(AI_CHATBOT_FLAG, "user2");
        assert!(!after.value);
        assert_eq!(after.decided_by, DecisionLayer::KillSwitch);
        assert!(after.sources.remote);
        assert!(after.sources.kill_switch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ticks_on_period_and_stops() {
        let activity = Arc::new(StaticActivity::new(true, true, vec![]));
        let (monitor, cell, mut receiver, window) =
            build_monitor(activity, vec![410.0, 420.0, 430.0], 16);
        let registry = HealthRegistry::new("liveness");
        let health = registry.register("performance_monitor", Duration::from_secs(9));

        let handle = monitor
            .with_health(health)
            .spawn(Duration::from_secs(3));

        // First tick fires immediately
        let first = receiver.recv().await.unwrap();
        assert_eq!(first.value, 410.0);
        assert!(registry.get_status().healthy);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(receiver.recv().await.unwrap().value, 420.0);
        assert_eq!(cell.snapshot().current_signal, 420.0);

        handle.stop().await;
        assert_eq!(window.snapshot().len(), 2);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropping_the_handle_stops_the_loop() {
        let activity = Arc::new(StaticActivity::new(false, false, vec![]));
        let (monitor, _, _receiver, _) = build_monitor(activity, vec![100.0], 4);

        let handle = monitor.spawn(Duration::from_millis(10));
        let MonitorHandle { shutdown, task } = handle;
        drop(shutdown);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
