//! Condition trees and the flat evaluation context they run against.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Comparison operator on one context field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Equal (deep JSON equality).
    Eq,
    /// Not equal.
    Neq,
    /// Numeric greater-than.
    Gt,
    /// Numeric greater-or-equal.
    Gte,
    /// Numeric less-than.
    Lt,
    /// Numeric less-or-equal.
    Lte,
    /// Field value is one of the listed values.
    In,
    /// Field value is none of the listed values.
    NotIn,
    /// String contains substring, or array contains value.
    Contains,
    /// String starts with the given prefix.
    Prefix,
    /// String matches the given regex.
    Regex,
}

/// Boolean composition of child rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Composition {
    /// All children must match; short-circuits on the first miss.
    And,
    /// Any child may match; short-circuits on the first hit.
    Or,
    /// Inverts the single child (extra children are ignored).
    Not,
}

/// A composable rule: leaf condition or boolean composite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rule {
    /// Boolean composition over children.
    Composite {
        /// AND / OR / NOT.
        composition: Composition,
        /// Child rules.
        children: Vec<Rule>,
    },
    /// Leaf condition on one context field.
    Leaf {
        /// Flattened context field, e.g. `parameters.campaignId`.
        field: String,
        /// Comparison operator.
        operator: Operator,
        /// Operand.
        value: JsonValue,
    },
}

/// Flat evaluation context: `action_type`, `parameters.*`, `metadata.*`,
/// `identity.*`, `context.*`.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    fields: BTreeMap<String, JsonValue>,
}

/// Flatten a JSON value into dotted keys under `prefix`.
pub fn flatten_value(prefix: &str, value: &JsonValue, out: &mut BTreeMap<String, JsonValue>) {
    match value {
        JsonValue::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() { k.clone() } else { format!("{}.{}", prefix, k) };
                flatten_value(&key, v, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

impl EvalContext {
    /// Build the context for one candidate action.
    pub fn build(
        action_type: &str,
        parameters: &JsonValue,
        metadata: &serde_json::Map<String, JsonValue>,
        identity_fields: &[(&str, JsonValue)],
        context_fields: &[(&str, JsonValue)],
    ) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("action_type".to_string(), JsonValue::String(action_type.to_string()));
        flatten_value("parameters", parameters, &mut fields);
        for (k, v) in metadata {
            flatten_value(&format!("metadata.{}", k), v, &mut fields);
        }
        for (k, v) in identity_fields {
            fields.insert(format!("identity.{}", k), v.clone());
        }
        for (k, v) in context_fields {
            fields.insert(format!("context.{}", k), v.clone());
        }
        Self { fields }
    }

    /// Field lookup.
    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    /// All string-typed values (used by the protected-entity check).
    pub fn string_values(&self) -> impl Iterator<Item = &str> {
        self.fields.values().filter_map(JsonValue::as_str)
    }
}

impl Rule {
    /// Evaluate against a context. Missing fields never match.
    pub fn matches(&self, ctx: &EvalContext) -> bool {
        match self {
            Rule::Composite { composition, children } => match composition {
                Composition::And => children.iter().all(|c| c.matches(ctx)),
                Composition::Or => children.iter().any(|c| c.matches(ctx)),
                Composition::Not => children.first().map_or(true, |c| !c.matches(ctx)),
            },
            Rule::Leaf { field, operator, value } => {
                let Some(actual) = ctx.get(field) else {
                    return false;
                };
                eval_leaf(actual, *operator, value)
            }
        }
    }
}

fn eval_leaf(actual: &JsonValue, operator: Operator, operand: &JsonValue) -> bool {
    match operator {
        Operator::Eq => json_eq(actual, operand),
        Operator::Neq => !json_eq(actual, operand),
        Operator::Gt => num_cmp(actual, operand).map_or(false, |o| o == std::cmp::Ordering::Greater),
        Operator::Gte => num_cmp(actual, operand).map_or(false, |o| o != std::cmp::Ordering::Less),
        Operator::Lt => num_cmp(actual, operand).map_or(false, |o| o == std::cmp::Ordering::Less),
        Operator::Lte => {
            num_cmp(actual, operand).map_or(false, |o| o != std::cmp::Ordering::Greater)
        }
        Operator::In => operand.as_array().map_or(false, |arr| arr.iter().any(|v| json_eq(actual, v))),
        Operator::NotIn => {
            operand.as_array().map_or(false, |arr| !arr.iter().any(|v| json_eq(actual, v)))
        }
        Operator::Contains => match (actual, operand) {
            (JsonValue::String(s), JsonValue::String(needle)) => s.contains(needle.as_str()),
            (JsonValue::Array(items), v) => items.iter().any(|i| json_eq(i, v)),
            _ => false,
        },
        Operator::Prefix => match (actual, operand) {
            (JsonValue::String(s), JsonValue::String(p)) => s.starts_with(p.as_str()),
            _ => false,
        },
        Operator::Regex => match (actual, operand) {
            (JsonValue::String(s), JsonValue::String(pattern)) => {
                regex::Regex::new(pattern).map_or(false, |re| re.is_match(s))
            }
            _ => false,
        },
    }
}

/// JSON equality with numeric coercion (1 == 1.0).
fn json_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn num_cmp(a: &JsonValue, b: &JsonValue) -> Option<std::cmp::Ordering> {
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> EvalContext {
        EvalContext::build(
            "ads.campaign.pause",
            &json!({"campaignId": "camp_123", "budget": {"daily": 250}}),
            &serde_json::Map::new(),
            &[("principal_id", json!("agent-1"))],
            &[("cartridge_id", json!("ads-spend"))],
        )
    }

    fn leaf(field: &str, operator: Operator, value: JsonValue) -> Rule {
        Rule::Leaf { field: field.into(), operator, value }
    }

    #[test]
    fn nested_parameters_flatten() {
        let c = ctx();
        assert_eq!(c.get("parameters.budget.daily"), Some(&json!(250)));
        assert_eq!(c.get("identity.principal_id"), Some(&json!("agent-1")));
    }

    #[test]
    fn comparison_operators() {
        let c = ctx();
        assert!(leaf("parameters.budget.daily", Operator::Gt, json!(100)).matches(&c));
        assert!(leaf("parameters.budget.daily", Operator::Lte, json!(250)).matches(&c));
        assert!(!leaf("parameters.budget.daily", Operator::Lt, json!(250)).matches(&c));
        assert!(leaf("parameters.budget.daily", Operator::Eq, json!(250.0)).matches(&c));
    }

    #[test]
    fn string_operators() {
        let c = ctx();
        assert!(leaf("action_type", Operator::Prefix, json!("ads.")).matches(&c));
        assert!(leaf("action_type", Operator::Contains, json!("campaign")).matches(&c));
        assert!(leaf("action_type", Operator::Regex, json!(r"^ads\.\w+\.pause$")).matches(&c));
        assert!(!leaf("action_type", Operator::Regex, json!(r"^payments\.")).matches(&c));
    }

    #[test]
    fn membership_operators() {
        let c = ctx();
        assert!(leaf(
            "parameters.campaignId",
            Operator::In,
            json!(["camp_123", "camp_456"])
        )
        .matches(&c));
        assert!(leaf("parameters.campaignId", Operator::NotIn, json!(["camp_999"])).matches(&c));
    }

    #[test]
    fn missing_field_never_matches() {
        let c = ctx();
        assert!(!leaf("parameters.nope", Operator::Eq, json!(1)).matches(&c));
        // ...even through NOT-IN, which would otherwise be vacuously true.
        assert!(!leaf("parameters.nope", Operator::NotIn, json!(["x"])).matches(&c));
    }

    #[test]
    fn composites_short_circuit() {
        let c = ctx();
        let tree = Rule::Composite {
            composition: Composition::And,
            children: vec![
                leaf("action_type", Operator::Prefix, json!("ads.")),
                Rule::Composite {
                    composition: Composition::Or,
                    children: vec![
                        leaf("parameters.budget.daily", Operator::Gt, json!(1_000)),
                        leaf("parameters.campaignId", Operator::Eq, json!("camp_123")),
                    ],
                },
                Rule::Composite {
                    composition: Composition::Not,
                    children: vec![leaf("identity.principal_id", Operator::Eq, json!("root"))],
                },
            ],
        };
        assert!(tree.matches(&c));
    }

    #[test]
    fn rule_tree_deserializes_from_json() {
        let raw = json!({
            "composition": "AND",
            "children": [
                {"field": "action_type", "operator": "prefix", "value": "ads."},
                {"field": "parameters.budget.daily", "operator": "gte", "value": 100}
            ]
        });
        let rule: Rule = serde_json::from_value(raw).unwrap();
        assert!(rule.matches(&ctx()));
    }
}
