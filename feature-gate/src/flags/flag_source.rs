use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::instrument;

use crate::flags::flag_models::{FlagDecision, FlagDefinition};
use crate::flags::targeting::evaluate_definition;
use crate::subject::SubjectContext;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum FlagSourceError {
    #[error("flag source unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read flag definitions: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse flag definitions: {0}")]
    InvalidDefinitions(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagChangeKind {
    Updated,
    Removed,
}

/// Pushed to subscribers whenever a flag's targeting changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagChange {
    pub flag_key: String,
    pub kind: FlagChangeKind,
}

/// Remote authority for targeting decisions. The gate consumes it and never owns it.
#[async_trait]
pub trait FlagSource: Send + Sync {
    /// Evaluates one flag for one subject. Unknown flags evaluate to an `OFF` decision.
    async fn evaluate(
        &self,
        flag_key: &str,
        subject: &SubjectContext,
    ) -> Result<FlagDecision, FlagSourceError>;

    /// Keys of every flag the source currently knows about.
    fn flag_keys(&self) -> Vec<String>;

    /// Stream of targeting changes.
    fn subscribe(&self) -> broadcast::Receiver<FlagChange>;
}

/// Flag source backed by definitions held in memory, standing in for a remote
/// flag delivery service.
pub struct InMemoryFlagSource {
    definitions: DashMap<String, FlagDefinition>,
    changes: broadcast::Sender<FlagChange>,
}

impl InMemoryFlagSource {
    pub fn new(definitions: Vec<FlagDefinition>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let map = DashMap::new();
        for definition in definitions {
            map.insert(definition.key.clone(), definition);
        }
        Self {
            definitions: map,
            changes,
        }
    }

    /// Loads a JSON array of flag definitions.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, FlagSourceError> {
        let contents = std::fs::read_to_string(path)?;
        let definitions: Vec<FlagDefinition> = serde_json::from_str(&contents)?;
        Ok(Self::new(definitions))
    }

    pub fn definition(&self, flag_key: &str) -> Option<FlagDefinition> {
        self.definitions.get(flag_key).map(|d| d.value().clone())
    }

    /// Replaces a flag's definition and notifies subscribers.
    pub fn upsert(&self, definition: FlagDefinition) {
        let flag_key = definition.key.clone();
        self.definitions.insert(flag_key.clone(), definition);
        self.notify(flag_key, FlagChangeKind::Updated);
    }

    pub fn remove(&self, flag_key: &str) -> Option<FlagDefinition> {
        let removed = self.definitions.remove(flag_key).map(|(_, d)| d);
        if removed.is_some() {
            self.notify(flag_key.to_string(), FlagChangeKind::Removed);
        }
        removed
    }

    fn notify(&self, flag_key: String, kind: FlagChangeKind) {
        // No receivers is fine, nobody is listening yet
        if self.changes.send(FlagChange { flag_key, kind }).is_err() {
            tracing::debug!("no subscribers for flag change notification");
        }
    }
}

#[async_trait]
impl FlagSource for InMemoryFlagSource {
    #[instrument(skip_all, fields(flag_key = flag_key, subject_key = %subject.key))]
    async fn evaluate(
        &self,
        flag_key: &str,
        subject: &SubjectContext,
    ) -> Result<FlagDecision, FlagSourceError> {
        let definition = self.definitions.get(flag_key);
        Ok(evaluate_definition(
            flag_key,
            definition.as_deref(),
            subject,
        ))
    }

    fn flag_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.definitions.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    fn subscribe(&self) -> broadcast::Receiver<FlagChange> {
        self.changes.subscribe()
    }
}
