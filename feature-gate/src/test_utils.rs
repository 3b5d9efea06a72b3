use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::flags::flag_models::FlagDecision;
use crate::flags::flag_source::{FlagChange, FlagSource, FlagSourceError};
use crate::performance::monitor::FeatureActivity;
use crate::performance::sampler::SignalSampler;
use crate::performance::state::SimulationMode;
use crate::subject::SubjectContext;
use crate::telemetry::sink::{MetricEvent, MetricsSink, SinkError};

pub fn demo_subject(key: &str, role: &str) -> SubjectContext {
    SubjectContext::new(key).with_attribute("role", role)
}

/// Polls `condition` until it holds, panicking after a couple of seconds.
pub async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// Keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn values(&self) -> Vec<f64> {
        self.events().iter().map(|e| e.value).collect()
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn emit(&self, event: &MetricEvent) -> Result<(), SinkError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Rejects every event.
#[derive(Debug, Default)]
pub struct FailingSink;

#[async_trait]
impl MetricsSink for FailingSink {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn emit(&self, _event: &MetricEvent) -> Result<(), SinkError> {
        Err(SinkError::Rejected(503))
    }
}

/// Knows about some flags but can't evaluate any of them.
pub struct FailingFlagSource {
    flag_keys: Vec<String>,
    changes: broadcast::Sender<FlagChange>,
}

impl FailingFlagSource {
    pub fn new(flag_keys: Vec<&str>) -> Self {
        let (changes, _) = broadcast::channel(4);
        Self {
            flag_keys: flag_keys.into_iter().map(String::from).collect(),
            changes,
        }
    }
}

#[async_trait]
impl FlagSource for FailingFlagSource {
    async fn evaluate(
        &self,
        _flag_key: &str,
        _subject: &SubjectContext,
    ) -> Result<FlagDecision, FlagSourceError> {
        Err(FlagSourceError::Unavailable("connection refused".to_string()))
    }

    fn flag_keys(&self) -> Vec<String> {
        self.flag_keys.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<FlagChange> {
        self.changes.subscribe()
    }
}

/// Answers like the wrapped source, but only after a delay on every evaluation.
pub struct SlowFlagSource<S> {
    inner: S,
    delay: Duration,
}

impl<S: FlagSource> SlowFlagSource<S> {
    pub fn new(inner: S, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<S: FlagSource> FlagSource for SlowFlagSource<S> {
    async fn evaluate(
        &self,
        flag_key: &str,
        subject: &SubjectContext,
    ) -> Result<FlagDecision, FlagSourceError> {
        tokio::time::sleep(self.delay).await;
        self.inner.evaluate(flag_key, subject).await
    }

    fn flag_keys(&self) -> Vec<String> {
        self.inner.flag_keys()
    }

    fn subscribe(&self) -> broadcast::Receiver<FlagChange> {
        self.inner.subscribe()
    }
}

/// Plays back fixed samples, repeating the last one once exhausted, and remembers the
/// conditions it was sampled under.
pub struct ScriptedSignal {
    samples: VecDeque<f64>,
    last: f64,
    seen: Arc<Mutex<Vec<(SimulationMode, bool)>>>,
}

impl ScriptedSignal {
    pub fn new(samples: Vec<f64>) -> Self {
        Self {
            samples: samples.into(),
            last: 0.0,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn seen(&self) -> Arc<Mutex<Vec<(SimulationMode, bool)>>> {
        self.seen.clone()
    }
}

impl SignalSampler for ScriptedSignal {
    fn sample(&mut self, mode: SimulationMode, feature_enabled: bool) -> f64 {
        self.seen.lock().unwrap().push((mode, feature_enabled));
        if let Some(next) = self.samples.pop_front() {
            self.last = next;
        }
        self.last
    }
}

/// Fixed answers for the monitor, independent of any flag source.
pub struct StaticActivity {
    remote: bool,
    effective: bool,
    subjects: Vec<SubjectContext>,
}

impl StaticActivity {
    pub fn new(remote: bool, effective: bool, subjects: Vec<SubjectContext>) -> Self {
        Self {
            remote,
            effective,
            subjects,
        }
    }
}

impl FeatureActivity for StaticActivity {
    fn remote_enabled_for_any(&self, _flag_key: &str) -> bool {
        self.remote
    }

    fn effectively_enabled_for_any(&self, _flag_key: &str) -> bool {
        self.effective
    }

    fn active_subjects(&self) -> Vec<SubjectContext> {
        self.subjects.clone()
    }
}
