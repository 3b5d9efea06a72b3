use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The subject a flag is evaluated for: an identity key plus an opaque bag of
/// targeting attributes. Only the flag source looks inside the attributes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SubjectContext {
    pub key: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl SubjectContext {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}
