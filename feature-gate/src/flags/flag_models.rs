use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

/// Why the flag source produced a given value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, EnumString, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    /// The subject was matched by an individual target or a targeting rule
    Targeted,
    /// No target or rule matched; the flag's fallthrough value was served
    Default,
    /// The flag is switched off, unknown, or could not be evaluated
    Off,
}

/// The result of evaluating one flag for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FlagDecision {
    pub flag_key: String,
    pub subject_key: String,
    pub value: bool,
    pub reason: DecisionReason,
}

impl FlagDecision {
    /// The fail-closed decision, served whenever the source has nothing better.
    pub fn off(flag_key: &str, subject_key: &str) -> Self {
        Self {
            flag_key: flag_key.to_string(),
            subject_key: subject_key.to_string(),
            value: false,
            reason: DecisionReason::Off,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TargetingRule {
    pub attribute: String,
    pub values: Vec<Value>,
    #[serde(default = "default_serve")]
    pub serve: bool,
}

fn default_serve() -> bool {
    true
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FlagDefinition {
    pub key: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Subject keys that always receive `true`
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub rules: Vec<TargetingRule>,
    #[serde(default)]
    pub fallthrough: bool,
}

impl FlagDefinition {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            active: true,
            targets: vec![],
            rules: vec![],
            fallthrough: false,
        }
    }

    pub fn with_target(mut self, subject_key: &str) -> Self {
        self.targets.push(subject_key.to_string());
        self
    }

    pub fn with_rule(mut self, attribute: &str, values: Vec<Value>, serve: bool) -> Self {
        self.rules.push(TargetingRule {
            attribute: attribute.to_string(),
            values,
            serve,
        });
        self
    }

    pub fn with_fallthrough(mut self, fallthrough: bool) -> Self {
        self.fallthrough = fallthrough;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

pub const AI_CHATBOT_FLAG: &str = "ai-chatbot";
pub const ADVANCED_ANALYTICS_FLAG: &str = "advanced-analytics";

/// Flags served when no definitions file is configured. The chat feature is rolled out to
/// lab owners and beta users only, analytics to lab owners only.
pub fn demo_definitions() -> Vec<FlagDefinition> {
    vec![
        FlagDefinition::new(AI_CHATBOT_FLAG).with_rule(
            "role",
            vec![Value::from("lab-owner"), Value::from("beta-user")],
            true,
        ),
        FlagDefinition::new(ADVANCED_ANALYTICS_FLAG).with_rule(
            "role",
            vec![Value::from("lab-owner")],
            true,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_defaults_when_deserializing() {
        let definition: FlagDefinition = serde_json::from_value(json!({
            "key": "ai-chatbot",
            "rules": [{"attribute": "role", "values": ["beta-user"]}]
        }))
        .unwrap();

        assert!(definition.active);
        assert!(definition.targets.is_empty());
        assert!(!definition.fallthrough);
        assert!(definition.rules[0].serve);
    }

    #[test]
    fn test_reason_wire_format() {
        assert_eq!(
            serde_json::to_value(DecisionReason::Targeted).unwrap(),
            json!("TARGETED")
        );
        assert_eq!(DecisionReason::Off.to_string(), "OFF");
        assert_eq!(
            "DEFAULT".parse::<DecisionReason>().unwrap(),
            DecisionReason::Default
        );
    }

    #[test]
    fn test_off_decision_is_false() {
        let decision = FlagDecision::off("ai-chatbot", "user1");
        assert!(!decision.value);
        assert_eq!(decision.reason, DecisionReason::Off);
    }
}
