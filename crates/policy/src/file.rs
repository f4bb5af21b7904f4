//! YAML policy-seed loading with validation.

use crate::condition::{Operator, Rule};
use crate::types::{Policy, PolicyEffect};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct PolicyFile {
    policies: Vec<Policy>,
}

/// Load seed policies from a YAML file at `path`.
///
/// Validates ids, effects, and regex operands; returns an error string
/// describing the first validation failure encountered.
pub fn load_policy_file<P: AsRef<Path>>(path: P) -> Result<Vec<Policy>, String> {
    let f = File::open(&path)
        .map_err(|e| format!("failed to open policy file {:?}: {}", path.as_ref(), e))?;
    let rdr = BufReader::new(f);
    let pf: PolicyFile = serde_yaml::from_reader(rdr)
        .map_err(|e| format!("malformed YAML in policy file {:?}: {}", path.as_ref(), e))?;

    let mut seen = HashSet::new();
    for (i, p) in pf.policies.iter().enumerate() {
        if p.id.trim().is_empty() {
            return Err(format!("policies[{}].id must be non-empty", i));
        }
        if !seen.insert(p.id.clone()) {
            return Err(format!("policies contains duplicate id '{}'", p.id));
        }
        if p.effect == PolicyEffect::Transform {
            match &p.transform {
                Some(JsonValue::Object(_)) => {}
                _ => {
                    return Err(format!(
                        "policies[{}] has effect transform but no object transform",
                        i
                    ))
                }
            }
        }
        validate_rule(&p.rule).map_err(|e| format!("policies[{}].rule: {}", i, e))?;
    }
    Ok(pf.policies)
}

fn validate_rule(rule: &Rule) -> Result<(), String> {
    match rule {
        Rule::Composite { children, .. } => {
            if children.is_empty() {
                return Err("composite rule must have children".into());
            }
            for c in children {
                validate_rule(c)?;
            }
            Ok(())
        }
        Rule::Leaf { field, operator, value } => {
            if field.trim().is_empty() {
                return Err("leaf field must be non-empty".into());
            }
            if *operator == Operator::Regex {
                let pattern = value
                    .as_str()
                    .ok_or_else(|| "regex operand must be a string".to_string())?;
                regex::Regex::new(pattern).map_err(|e| format!("regex invalid: {}", e))?;
            }
            if matches!(*operator, Operator::In | Operator::NotIn) && !value.is_array() {
                return Err("in/not_in operand must be an array".into());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_temp_yaml(name: &str, content: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("arbiter_policy_{}_{}_{}.yaml", name, std::process::id(), nanos()));
        std::fs::write(&p, content).expect("write temp yaml");
        p
    }

    fn nanos() -> u128 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos()
    }

    #[test]
    fn loads_a_valid_file() {
        let yaml = r#"
policies:
  - id: allow-ads-pause
    priority: 10
    active: true
    cartridge_id: ads-spend
    organization_id: null
    rule:
      field: action_type
      operator: eq
      value: ads.campaign.pause
    effect: allow
    approval_requirement: null
    transform: null
    description: pausing is always safe
  - id: gate-big-budgets
    priority: 20
    active: true
    cartridge_id: null
    organization_id: null
    rule:
      composition: AND
      children:
        - field: action_type
          operator: prefix
          value: "ads."
        - field: parameters.budget
          operator: gt
          value: 1000
    effect: require_approval
    approval_requirement: elevated
    transform: null
    description: null
"#;
        let path = write_temp_yaml("valid", yaml);
        let policies = load_policy_file(&path).unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0].id, "allow-ads-pause");
        assert_eq!(policies[1].effect, PolicyEffect::RequireApproval);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let yaml = r#"
policies:
  - id: dup
    priority: 1
    active: true
    cartridge_id: null
    organization_id: null
    rule: {field: action_type, operator: eq, value: x}
    effect: allow
    approval_requirement: null
    transform: null
    description: null
  - id: dup
    priority: 2
    active: true
    cartridge_id: null
    organization_id: null
    rule: {field: action_type, operator: eq, value: y}
    effect: deny
    approval_requirement: null
    transform: null
    description: null
"#;
        let path = write_temp_yaml("dup", yaml);
        let err = load_policy_file(&path).unwrap_err();
        assert!(err.contains("duplicate id"));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let yaml = r#"
policies:
  - id: bad-regex
    priority: 1
    active: true
    cartridge_id: null
    organization_id: null
    rule: {field: action_type, operator: regex, value: "(unclosed"}
    effect: deny
    approval_requirement: null
    transform: null
    description: null
"#;
        let path = write_temp_yaml("regex", yaml);
        let err = load_policy_file(&path).unwrap_err();
        assert!(err.contains("regex invalid"));
    }

    #[test]
    fn transform_effect_requires_an_object() {
        let yaml = r#"
policies:
  - id: bad-transform
    priority: 1
    active: true
    cartridge_id: null
    organization_id: null
    rule: {field: action_type, operator: eq, value: x}
    effect: transform
    approval_requirement: null
    transform: null
    description: null
"#;
        let path = write_temp_yaml("transform", yaml);
        let err = load_policy_file(&path).unwrap_err();
        assert!(err.contains("transform"));
    }
}
