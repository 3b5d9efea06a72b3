use serde_json::Value;

use crate::flags::flag_models::{DecisionReason, FlagDecision, FlagDefinition, TargetingRule};
use crate::subject::SubjectContext;

/// Evaluates a definition for a subject. Precedence: an inactive or missing flag is off,
/// then individual targets, then rules in declaration order, then the fallthrough value.
pub fn evaluate_definition(
    flag_key: &str,
    definition: Option<&FlagDefinition>,
    subject: &SubjectContext,
) -> FlagDecision {
    let definition = match definition {
        Some(definition) if definition.active => definition,
        _ => return FlagDecision::off(flag_key, &subject.key),
    };

    let decision = |value: bool, reason: DecisionReason| FlagDecision {
        flag_key: flag_key.to_string(),
        subject_key: subject.key.clone(),
        value,
        reason,
    };

    if definition.targets.iter().any(|t| t == &subject.key) {
        return decision(true, DecisionReason::Targeted);
    }

    if let Some(rule) = definition.rules.iter().find(|r| rule_matches(r, subject)) {
        return decision(rule.serve, DecisionReason::Targeted);
    }

    decision(definition.fallthrough, DecisionReason::Default)
}

fn rule_matches(rule: &TargetingRule, subject: &SubjectContext) -> bool {
    match subject.attribute(&rule.attribute) {
        Some(Value::Array(items)) => items.iter().any(|item| value_in(item, &rule.values)),
        Some(value) => value_in(value, &rule.values),
        None => false,
    }
}

fn value_in(value: &Value, candidates: &[Value]) -> bool {
    candidates.iter().any(|candidate| values_equal(value, candidate))
}

// Numbers compare by value so that 1 and 1.0 match
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64() == r.as_f64(),
        _ => left == right,
    }
}
