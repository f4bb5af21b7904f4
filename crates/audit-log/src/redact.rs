//! Snapshot redaction: regex scrubbing plus sensitive-field masking.

use regex::Regex;
use serde_json::Value as JsonValue;

const MASK: &str = "[REDACTED]";

/// Field names whose values are masked wholesale wherever they appear.
const SENSITIVE_FIELDS: &[&str] =
    &["credentials", "password", "api_key", "apiKey", "secret", "token", "authorization"];

/// Scrubs snapshots before they enter the hash chain.
#[derive(Debug, Clone)]
pub struct Redactor {
    patterns: Vec<Regex>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Redactor {
    /// Built-in patterns: emails, phone numbers, credit cards, token prefixes.
    pub fn builtin() -> Self {
        let sources = [
            r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
            r"\+?\d[\d\s().-]{8,}\d",
            r"\b(?:\d[ -]?){13,16}\b",
            r"\b(?:sk|pk|tok|key)_[A-Za-z0-9]{8,}\b",
        ];
        let patterns = sources
            .iter()
            .map(|s| Regex::new(s).expect("builtin redaction pattern must compile"))
            .collect();
        Self { patterns }
    }

    /// Extend the built-ins with operator-supplied patterns. Invalid patterns
    /// are reported, not silently dropped.
    pub fn with_extra_patterns(extra: &[String]) -> Result<Self, String> {
        let mut r = Self::builtin();
        for (i, src) in extra.iter().enumerate() {
            let re = Regex::new(src)
                .map_err(|e| format!("redaction pattern [{}] invalid: {}", i, e))?;
            r.patterns.push(re);
        }
        Ok(r)
    }

    /// Redact a snapshot in place; returns the touched field paths.
    pub fn redact(&self, snapshot: &mut JsonValue) -> Vec<String> {
        let mut touched = Vec::new();
        self.walk(snapshot, "", &mut touched);
        touched
    }

    fn walk(&self, value: &mut JsonValue, path: &str, touched: &mut Vec<String>) {
        match value {
            JsonValue::Object(map) => {
                for (key, child) in map.iter_mut() {
                    let child_path =
                        if path.is_empty() { key.clone() } else { format!("{}.{}", path, key) };
                    if SENSITIVE_FIELDS.contains(&key.as_str()) {
                        *child = JsonValue::String(MASK.into());
                        touched.push(child_path);
                    } else {
                        self.walk(child, &child_path, touched);
                    }
                }
            }
            JsonValue::Array(items) => {
                for (i, child) in items.iter_mut().enumerate() {
                    let child_path = format!("{}[{}]", path, i);
                    self.walk(child, &child_path, touched);
                }
            }
            JsonValue::String(s) => {
                let mut changed = false;
                let mut current = s.clone();
                for re in &self.patterns {
                    if re.is_match(&current) {
                        current = re.replace_all(&current, MASK).into_owned();
                        changed = true;
                    }
                }
                if changed {
                    *s = current;
                    touched.push(path.to_string());
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_sensitive_fields() {
        let mut snap = json!({"config": {"apiKey": "abc123", "name": "ads"}});
        let touched = Redactor::builtin().redact(&mut snap);
        assert_eq!(snap["config"]["apiKey"], "[REDACTED]");
        assert_eq!(snap["config"]["name"], "ads");
        assert_eq!(touched, vec!["config.apiKey".to_string()]);
    }

    #[test]
    fn scrubs_emails_in_strings() {
        let mut snap = json!({"note": "contact ops@example.com for access"});
        let touched = Redactor::builtin().redact(&mut snap);
        assert_eq!(snap["note"], "contact [REDACTED] for access");
        assert_eq!(touched, vec!["note".to_string()]);
    }

    #[test]
    fn scrubs_token_prefixes() {
        let mut snap = json!({"log": "used sk_live4eC39HqLyjWDarj for the call"});
        Redactor::builtin().redact(&mut snap);
        assert!(!snap["log"].as_str().unwrap().contains("sk_live4eC39HqLyjWDarj"));
    }

    #[test]
    fn untouched_snapshot_reports_nothing() {
        let mut snap = json!({"campaignId": "camp_123", "budget": 250});
        let touched = Redactor::builtin().redact(&mut snap);
        assert!(touched.is_empty());
        assert_eq!(snap, json!({"campaignId": "camp_123", "budget": 250}));
    }

    #[test]
    fn invalid_extra_pattern_is_reported() {
        let err = Redactor::with_extra_patterns(&["(unclosed".to_string()]).unwrap_err();
        assert!(err.contains("[0]"));
    }
}
