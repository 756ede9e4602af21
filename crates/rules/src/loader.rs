//! One-shot rules file loading with per-rule validation.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::error::RulesError;
use crate::schema::{Rule, RulesFile};

/// Load and validate a rules file.
///
/// The whole file must parse; individual rules must pass [`validate_rule`].
/// Disabled rules are kept in the returned list (the engine skips them at
/// match time) so their patterns stay visible in logs and status output.
pub fn load_rules(path: &Path) -> Result<Vec<Rule>, RulesError> {
    let text = fs::read_to_string(path).map_err(|source| RulesError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let file: RulesFile = serde_yaml::from_str(&text).map_err(|source| RulesError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    for rule in &file.rules {
        validate_rule(rule)?;
        if rule.enabled {
            info!(
                rule = %rule.name,
                pattern = %rule.topic_pattern,
                actions = rule.actions.len(),
                "loaded rule"
            );
        } else {
            warn!(rule = %rule.name, "rule is disabled, skipping at match time");
        }
    }

    Ok(file.rules)
}

/// Structural checks that serde cannot express.
fn validate_rule(rule: &Rule) -> Result<(), RulesError> {
    let invalid = |reason: &str| RulesError::InvalidRule {
        rule: rule.name.clone(),
        reason: reason.to_string(),
    };

    if rule.name.trim().is_empty() {
        return Err(RulesError::InvalidRule {
            rule: "<unnamed>".to_string(),
            reason: "rule name must not be empty".to_string(),
        });
    }
    if rule.topic_pattern.is_empty() {
        return Err(invalid("topic_pattern must not be empty"));
    }
    if rule.actions.is_empty() {
        return Err(invalid("at least one action is required"));
    }
    validate_pattern(rule).map_err(|reason| invalid(&reason))
}

/// `+` must occupy a whole segment; `#` may only be the last segment.
fn validate_pattern(rule: &Rule) -> Result<(), String> {
    let pattern = rule.topic_pattern.as_str();
    let segments: Vec<&str> = pattern.split('/').collect();
    let last = segments.len() - 1;

    for (i, segment) in segments.iter().enumerate() {
        if segment.contains('#') {
            if *segment != "#" {
                return Err(format!("'#' must be a whole segment in '{pattern}'"));
            }
            if i != last {
                return Err(format!("'#' is only allowed as the final segment in '{pattern}'"));
            }
        }
        if segment.contains('+') && *segment != "+" {
            return Err(format!("'+' must be a whole segment in '{pattern}'"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_rules(yaml: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_valid_rules_file() {
        let file = write_rules(
            r#"
rules:
  - name: heartbeats
    topic_pattern: gateway/+/heartbeat
    actions:
      - type: http
        url: http://localhost:8080/api/gateways/events
"#,
        );
        let rules = load_rules(file.path()).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "heartbeats");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_rules(Path::new("/nonexistent/rules.yaml")).unwrap_err();
        assert!(matches!(err, RulesError::Io { .. }));
    }

    #[test]
    fn rule_without_actions_is_rejected() {
        let file = write_rules(
            r#"
rules:
  - name: empty
    topic_pattern: "gateway/#"
    actions: []
"#,
        );
        let err = load_rules(file.path()).unwrap_err();
        assert!(matches!(err, RulesError::InvalidRule { .. }), "got {err:?}");
    }

    #[test]
    fn interior_hash_is_rejected() {
        let file = write_rules(
            r#"
rules:
  - name: bad
    topic_pattern: "gateway/#/heartbeat"
    actions:
      - type: lambda
        function_name: f
"#,
        );
        assert!(load_rules(file.path()).is_err());
    }

    #[test]
    fn partial_segment_plus_is_rejected() {
        let file = write_rules(
            r#"
rules:
  - name: bad
    topic_pattern: "gateway/g+/heartbeat"
    actions:
      - type: lambda
        function_name: f
"#,
        );
        assert!(load_rules(file.path()).is_err());
    }

    #[test]
    fn disabled_rules_survive_loading() {
        let file = write_rules(
            r#"
rules:
  - name: off
    topic_pattern: "control/g1"
    enabled: false
    actions:
      - type: lambda
        function_name: f
"#,
        );
        let rules = load_rules(file.path()).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(!rules[0].enabled);
    }
}
