use std::collections::HashMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A manual forcing of one flag for one subject session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Override {
    pub flag_key: String,
    pub value: Option<bool>,
}

/// Per-session manual overrides, keyed by subject then flag. Lives in memory only.
#[derive(Debug, Default)]
pub struct OverrideStore {
    by_subject: DashMap<String, HashMap<String, bool>>,
}

impl OverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the override, or clears it when `value` is `None`.
    pub fn set(&self, subject_key: &str, flag_key: &str, value: Option<bool>) {
        match value {
            Some(value) => {
                self.by_subject
                    .entry(subject_key.to_string())
                    .or_default()
                    .insert(flag_key.to_string(), value);
            }
            None => {
                let now_empty = match self.by_subject.get_mut(subject_key) {
                    Some(mut overrides) => {
                        overrides.remove(flag_key);
                        overrides.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.by_subject
                        .remove_if(subject_key, |_, overrides| overrides.is_empty());
                }
            }
        }
    }

    pub fn get(&self, subject_key: &str, flag_key: &str) -> Option<bool> {
        self.by_subject
            .get(subject_key)
            .and_then(|overrides| overrides.get(flag_key).copied())
    }

    /// Drops every override of the subject, returning how many there were.
    pub fn clear_all(&self, subject_key: &str) -> usize {
        self.by_subject
            .remove(subject_key)
            .map(|(_, overrides)| overrides.len())
            .unwrap_or(0)
    }

    pub fn list(&self, subject_key: &str) -> Vec<Override> {
        let mut overrides: Vec<Override> = self
            .by_subject
            .get(subject_key)
            .map(|overrides| {
                overrides
                    .iter()
                    .map(|(flag_key, value)| Override {
                        flag_key: flag_key.clone(),
                        value: Some(*value),
                    })
                    .collect()
            })
            .unwrap_or_default();
        overrides.sort_by(|a, b| a.flag_key.cmp(&b.flag_key));
        overrides
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let store = OverrideStore::new();
        store.set("user1", "ai-chatbot", Some(false));

        assert_eq!(store.get("user1", "ai-chatbot"), Some(false));
        assert_eq!(store.get("user1", "advanced-analytics"), None);
        assert_eq!(store.get("user2", "ai-chatbot"), None);
    }

    #[test]
    fn test_absent_value_clears_one_flag() {
        let store = OverrideStore::new();
        store.set("user1", "ai-chatbot", Some(false));
        store.set("user1", "advanced-analytics", Some(true));

        store.set("user1", "ai-chatbot", None);

        assert_eq!(store.get("user1", "ai-chatbot"), None);
        assert_eq!(
            store.list("user1"),
            vec![Override {
                flag_key: "advanced-analytics".to_string(),
                value: Some(true)
            }]
        );
    }

    #[test]
    fn test_clearing_unknown_override_is_a_noop() {
        let store = OverrideStore::new();
        store.set("user1", "ai-chatbot", None);
        assert!(store.list("user1").is_empty());
    }

    #[test]
    fn test_clear_all_is_scoped_to_the_subject() {
        let store = OverrideStore::new();
        store.set("user1", "ai-chatbot", Some(false));
        store.set("user1", "advanced-analytics", Some(false));
        store.set("user2", "ai-chatbot", Some(false));

        assert_eq!(store.clear_all("user1"), 2);
        assert_eq!(store.clear_all("user1"), 0);
        assert!(store.list("user1").is_empty());
        assert_eq!(store.get("user2", "ai-chatbot"), Some(false));
    }
}
