use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::api::errors::GateError;
use crate::flags::flag_models::FlagDecision;
use crate::flags::flag_source::{FlagChange, FlagChangeKind, FlagSource};
use crate::gate::overrides::{Override, OverrideStore};
use crate::gate::resolver::{resolve, EffectiveDecision};
use crate::metrics::consts::{
    DECISION_REFRESH_TIME, FLAG_CHANGE_NOTIFICATIONS_COUNTER, FLAG_SOURCE_ERRORS_COUNTER,
    GATE_EVALUATIONS_COUNTER,
};
use crate::metrics::utils::{histogram, inc, label};
use crate::performance::monitor::FeatureActivity;
use crate::performance::state::PerformanceReader;
use crate::subject::SubjectContext;

/// Ties the flag source, the manual overrides and the performance record together.
///
/// Remote decisions are fetched when a subject session starts and whenever the source
/// reports a targeting change, and cached per subject and flag. Evaluating a gate only reads
/// that cache plus the current performance snapshot, so it never waits on the source.
pub struct GateService {
    source: Arc<dyn FlagSource>,
    performance: PerformanceReader,
    overrides: OverrideStore,
    sessions: DashMap<String, SubjectContext>,
    decisions: DashMap<(String, String), FlagDecision>,
}

impl GateService {
    pub fn new(source: Arc<dyn FlagSource>, performance: PerformanceReader) -> Self {
        Self {
            source,
            performance,
            overrides: OverrideStore::new(),
            sessions: DashMap::new(),
            decisions: DashMap::new(),
        }
    }

    /// Starts or replaces the session of a subject and fetches its decision for every known
    /// flag. A changed context means a different user took over the session, so the
    /// previous overrides are dropped.
    #[instrument(skip_all, fields(subject_key = %subject.key))]
    pub async fn identify(&self, subject: SubjectContext) -> Result<Vec<FlagDecision>, GateError> {
        if subject.key.trim().is_empty() {
            return Err(GateError::MissingSubjectKey);
        }

        let previous = self.sessions.insert(subject.key.clone(), subject.clone());
        if previous.is_some_and(|previous| previous != subject) {
            let cleared = self.overrides.clear_all(&subject.key);
            info!(cleared, "subject context changed, overrides cleared");
        }

        let start = Instant::now();
        let decisions = self.fetch_all(&subject).await;
        histogram(
            DECISION_REFRESH_TIME,
            &[label("trigger", "identify")],
            start.elapsed().as_millis() as f64,
        );
        Ok(decisions)
    }

    /// Ends a session, dropping its cached decisions and overrides.
    pub fn end_session(&self, subject_key: &str) -> bool {
        let removed = self.sessions.remove(subject_key).is_some();
        self.decisions
            .retain(|(cached_subject, _), _| cached_subject != subject_key);
        self.overrides.clear_all(subject_key);
        removed
    }

    /// Resolves the effective value of a gate for a subject. A subject without a cached
    /// decision (no session, or the source failed) is treated as off.
    pub fn evaluate(&self, flag_key: &str, subject_key: &str) -> EffectiveDecision {
        let remote = self.remote_decision(flag_key, subject_key);
        let override_value = self.overrides.get(subject_key, flag_key);
        let performance = self.performance.snapshot();

        let decision = resolve(&remote, override_value, &performance);
        inc(
            GATE_EVALUATIONS_COUNTER,
            &[
                label("flag", flag_key),
                label("value", decision.value),
                label("layer", decision.decided_by),
            ],
            1,
        );
        decision
    }

    pub fn remote_decision(&self, flag_key: &str, subject_key: &str) -> FlagDecision {
        self.decisions
            .get(&(subject_key.to_string(), flag_key.to_string()))
            .map(|d| d.value().clone())
            .unwrap_or_else(|| FlagDecision::off(flag_key, subject_key))
    }

    /// Sets or clears (`None`) a manual override for an active session and a flag the source
    /// knows about.
    pub fn set_override(
        &self,
        subject_key: &str,
        flag_key: &str,
        value: Option<bool>,
    ) -> Result<(), GateError> {
        if !self.sessions.contains_key(subject_key) {
            return Err(GateError::UnknownSubject(subject_key.to_string()));
        }
        if !self.source.flag_keys().iter().any(|known| known == flag_key) {
            return Err(GateError::UnknownFlag(flag_key.to_string()));
        }
        self.overrides.set(subject_key, flag_key, value);
        info!(subject_key, flag_key, ?value, "override set");
        Ok(())
    }

    pub fn clear_all_overrides(&self, subject_key: &str) -> Result<usize, GateError> {
        if !self.sessions.contains_key(subject_key) {
            return Err(GateError::UnknownSubject(subject_key.to_string()));
        }
        let cleared = self.overrides.clear_all(subject_key);
        info!(subject_key, cleared, "overrides cleared");
        Ok(cleared)
    }

    pub fn overrides(&self, subject_key: &str) -> Vec<Override> {
        self.overrides.list(subject_key)
    }

    /// Re-fetches one flag for every active session.
    #[instrument(skip(self))]
    pub async fn refresh_flag(&self, flag_key: &str) {
        let start = Instant::now();
        for subject in self.active_subjects() {
            let decision = self.fetch(flag_key, &subject).await;
            self.store_decision(&subject, flag_key, decision);
        }
        histogram(
            DECISION_REFRESH_TIME,
            &[label("trigger", "flag_change")],
            start.elapsed().as_millis() as f64,
        );
    }

    /// Re-fetches every flag for every active session. Sessions ended meanwhile stay ended.
    pub async fn refresh_all(&self) {
        for subject in self.active_subjects() {
            self.fetch_all(&subject).await;
        }
    }

    async fn apply_change(&self, change: FlagChange) {
        inc(
            FLAG_CHANGE_NOTIFICATIONS_COUNTER,
            &[label("kind", format!("{:?}", change.kind).to_lowercase())],
            1,
        );
        match change.kind {
            FlagChangeKind::Updated => self.refresh_flag(&change.flag_key).await,
            FlagChangeKind::Removed => {
                self.decisions
                    .retain(|(_, flag_key), _| flag_key != &change.flag_key);
            }
        }
    }

    /// Listens for targeting changes until the source goes away.
    pub fn spawn_change_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let service = self.clone();
        let mut changes = self.source.subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        debug!(flag_key = %change.flag_key, kind = ?change.kind, "flag changed");
                        service.apply_change(change).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "missed flag change notifications, refreshing everything");
                        service.refresh_all().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("flag change listener stopped");
        })
    }

    async fn fetch_all(&self, subject: &SubjectContext) -> Vec<FlagDecision> {
        let mut decisions = Vec::new();
        for flag_key in self.source.flag_keys() {
            let decision = self.fetch(&flag_key, subject).await;
            self.store_decision(subject, &flag_key, decision.clone());
            decisions.push(decision);
        }

        // Forget decisions for flags the source no longer knows about
        let fresh: HashSet<&str> = decisions.iter().map(|d| d.flag_key.as_str()).collect();
        self.decisions.retain(|(subject_key, flag_key), _| {
            subject_key != &subject.key || fresh.contains(flag_key.as_str())
        });
        decisions
    }

    // Only caches for the session the fetch was made for. The session guard is held across
    // the insert so a concurrent end_session either sees the entry or prevents it.
    fn store_decision(&self, subject: &SubjectContext, flag_key: &str, decision: FlagDecision) {
        let Some(session) = self.sessions.get(&subject.key) else {
            debug!(
                subject_key = %subject.key,
                flag_key,
                "session ended during fetch, dropping decision"
            );
            return;
        };
        if session.value() != subject {
            debug!(
                subject_key = %subject.key,
                flag_key,
                "session changed during fetch, dropping decision"
            );
            return;
        }
        self.decisions
            .insert((subject.key.clone(), flag_key.to_string()), decision);
    }

    // Fail closed: a broken source must never switch a feature on
    async fn fetch(&self, flag_key: &str, subject: &SubjectContext) -> FlagDecision {
        match self.source.evaluate(flag_key, subject).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    flag_key,
                    subject_key = %subject.key,
                    error = %e,
                    "flag evaluation failed, serving off"
                );
                inc(FLAG_SOURCE_ERRORS_COUNTER, &[label("flag", flag_key)], 1);
                FlagDecision::off(flag_key, &subject.key)
            }
        }
    }
}

// Decisions are only cached for live sessions, so these scan the cache directly. Linear in
// the number of cached decisions, without allocating.
impl FeatureActivity for GateService {
    fn remote_enabled_for_any(&self, flag_key: &str) -> bool {
        self.decisions
            .iter()
            .any(|entry| entry.key().1 == flag_key && entry.value().value)
    }

    fn effectively_enabled_for_any(&self, flag_key: &str) -> bool {
        let performance = self.performance.snapshot();
        self.decisions.iter().any(|entry| {
            let (subject_key, cached_flag) = entry.key();
            cached_flag == flag_key
                && resolve(
                    entry.value(),
                    self.overrides.get(subject_key, flag_key),
                    &performance,
                )
                .value
        })
    }

    fn active_subjects(&self) -> Vec<SubjectContext> {
        let mut subjects: Vec<SubjectContext> =
            self.sessions.iter().map(|s| s.value().clone()).collect();
        subjects.sort_by(|a, b| a.key.cmp(&b.key));
        subjects
    }
}
