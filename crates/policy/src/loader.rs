use crate::model::{ComplianceLevel, NotificationConfig, Policy, TagCriteria, TagValidation};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const EMAIL_PATTERN: &str = r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$";
const EMAIL_FREQUENCIES: [&str; 3] = ["daily", "hourly", "weekly"];

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("read policy {}: {source}", path.display())]
    Read { path: PathBuf, #[source] source: std::io::Error },
    #[error("parse policy {source_name}: {source}")]
    Parse { source_name: String, #[source] source: serde_yaml::Error },
    #[error("invalid policy {source_name}: {reason}")]
    Invalid { source_name: String, reason: String },
    #[error("serialize policy: {0}")]
    Serialize(#[source] serde_yaml::Error),
}

impl Policy {
    /// Reads and validates a policy file.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let bytes = std::fs::read(path).map_err(|source| PolicyError::Read { path: path.to_path_buf(), source })?;
        Self::from_slice(&bytes, &path.display().to_string())
    }

    pub fn from_yaml_str(src: &str, source_name: &str) -> Result<Self, PolicyError> {
        Self::from_slice(src.as_bytes(), source_name)
    }

    /// Parses, normalises and validates. Patterns are compiled during parsing,
    /// so an invalid regex anywhere rejects the whole document.
    pub fn from_slice(bytes: &[u8], source_name: &str) -> Result<Self, PolicyError> {
        let mut policy: Policy = serde_yaml::from_slice(bytes)
            .map_err(|source| PolicyError::Parse { source_name: source_name.to_string(), source })?;
        policy.normalize();
        policy
            .validate()
            .map_err(|reason| PolicyError::Invalid { source_name: source_name.to_string(), reason })?;
        debug!(source = source_name, resources = policy.resources.len(), levels = policy.compliance_levels.len(), "policy loaded");
        Ok(policy)
    }

    pub fn to_yaml(&self) -> Result<String, PolicyError> {
        serde_yaml::to_string(self).map_err(PolicyError::Serialize)
    }

    // An empty `compliance_level: ""` means "not set".
    fn normalize(&mut self) {
        let clear = |c: &mut TagCriteria| {
            if c.compliance_level.as_deref().is_some_and(str::is_empty) {
                c.compliance_level = None;
            }
        };
        clear(&mut self.global.tag_criteria);
        for r in self.resources.values_mut() {
            clear(&mut r.tag_criteria);
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.version.trim().is_empty() {
            return Err("version is required".into());
        }
        if self.global.batch_size.is_some_and(|b| b <= 0) {
            return Err("global batch_size must be greater than zero".into());
        }
        validate_criteria(&self.global.tag_criteria).map_err(|e| format!("global tag_criteria: {e}"))?;
        for (resource_type, settings) in &self.resources {
            if resource_type.trim().is_empty() {
                return Err("resource type key cannot be empty".into());
            }
            if settings.batch_size.is_some_and(|b| b <= 0) {
                return Err(format!("invalid batch_size for resource type {resource_type}: must be greater than zero"));
            }
            validate_criteria(&settings.tag_criteria)
                .map_err(|e| format!("invalid tag_criteria for resource type {resource_type}: {e}"))?;
            if let Some(ex) = settings.excluded_resources.iter().find(|ex| ex.pattern.as_str().is_empty()) {
                return Err(format!("empty exclusion pattern for resource type {resource_type} (reason: {})", ex.reason));
            }
        }
        validate_levels(&self.compliance_levels)?;
        validate_tag_validation(&self.tag_validation)?;
        validate_notifications(&self.notifications)
    }
}

fn validate_criteria(criteria: &TagCriteria) -> Result<(), String> {
    if criteria.required_tags.iter().any(String::is_empty) {
        return Err("empty required tag found".into());
    }
    if criteria.forbidden_tags.iter().any(String::is_empty) {
        return Err("empty forbidden tag found".into());
    }
    for (k, v) in &criteria.specific_tags {
        if k.is_empty() {
            return Err("empty specific tag key found".into());
        }
        if v.is_empty() {
            return Err(format!("empty specific tag value found for key: {k}"));
        }
    }
    if let Some(tag) = criteria.required_tags.iter().find(|t| criteria.forbidden_tags.contains(t)) {
        return Err(format!("tag {tag} is both required and forbidden"));
    }
    Ok(())
}

fn validate_levels(levels: &BTreeMap<String, ComplianceLevel>) -> Result<(), String> {
    for (name, level) in levels {
        if name.is_empty() {
            return Err("compliance level name cannot be empty".into());
        }
        if level.required_tags.iter().any(String::is_empty) {
            return Err(format!("empty required tag in compliance level '{name}'"));
        }
        if level.specific_tags.iter().any(|(k, v)| k.is_empty() || v.is_empty()) {
            return Err(format!("empty key or value in specific tags of compliance level '{name}'"));
        }
    }
    Ok(())
}

fn validate_tag_validation(rules: &TagValidation) -> Result<(), String> {
    for (tag, values) in &rules.allowed_values {
        if values.is_empty() {
            return Err(format!("no allowed values specified for tag {tag}"));
        }
        if values.iter().any(String::is_empty) {
            return Err(format!("empty value found in allowed values for tag {tag}"));
        }
    }
    if let Some(tag) = rules.pattern_rules.iter().find(|(_, p)| p.as_str().is_empty()).map(|(t, _)| t) {
        return Err(format!("empty pattern rule for tag {tag}"));
    }
    Ok(())
}

fn validate_notifications(n: &NotificationConfig) -> Result<(), String> {
    if n.slack.enabled {
        if n.slack.channels.is_empty() {
            return Err("slack notifications enabled but no channels specified".into());
        }
        if n.slack.channels.values().any(String::is_empty) {
            return Err("empty slack channel name found".into());
        }
    }
    if n.email.enabled {
        if n.email.recipients.is_empty() {
            return Err("email notifications enabled but no recipients specified".into());
        }
        let email = Regex::new(EMAIL_PATTERN).map_err(|e| e.to_string())?;
        if let Some(bad) = n.email.recipients.iter().find(|r| !email.is_match(r)) {
            return Err(format!("invalid email format: {bad}"));
        }
        if let Some(freq) = n.email.frequency.as_deref().filter(|f| !f.is_empty()) {
            if !EMAIL_FREQUENCIES.contains(&freq) {
                return Err(format!("invalid email notification frequency: {freq}"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r##"
version: "1.0"
global:
  enabled: true
  batch_size: 5
  tag_criteria:
    required_tags: [Environment, Owner]
    compliance_level: high
resources:
  s3:
    enabled: true
    batch_size: 2
    tag_criteria:
      forbidden_tags: [Temporary]
      specific_tags:
        ManagedBy: terraform
    excluded_resources:
      - pattern: "^sandbox-.*$"
        reason: ephemeral
compliance_levels:
  high:
    required_tags: [CostCenter]
tag_validation:
  allowed_values:
    Environment: [dev, staging, prod]
  pattern_rules:
    CostCenter: "^[0-9]{4}$"
notifications:
  slack:
    enabled: true
    channels:
      alerts: "#tag-alerts"
  email:
    enabled: true
    recipients: [ops@example.com]
    frequency: daily
"##;

    fn invalid(src: &str) -> String {
        match Policy::from_yaml_str(src, "test.yaml") {
            Err(PolicyError::Invalid { reason, .. }) => reason,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn loads_full_policy() {
        let policy = Policy::from_yaml_str(POLICY, "policy.yaml").unwrap();
        assert_eq!(policy.version, "1.0");
        assert_eq!(policy.global.batch_size, Some(5));
        let s3 = &policy.resources["s3"];
        assert!(s3.enabled);
        assert_eq!(s3.excluded_resources[0].pattern.as_str(), "^sandbox-.*$");
        assert!(policy.tag_validation.pattern_rules["CostCenter"].is_match("1234"));
        assert_eq!(policy.compliance_level("high").unwrap().required_tags, vec!["CostCenter"]);
        assert_eq!(policy.enabled_services().map(|(k, _)| k).collect::<Vec<_>>(), vec!["s3"]);
        assert_eq!(policy.notifications.slack.channels["alerts"], "#tag-alerts");
    }

    #[test]
    fn loading_is_idempotent_and_round_trips() {
        let a = Policy::from_yaml_str(POLICY, "a").unwrap();
        let b = Policy::from_yaml_str(POLICY, "b").unwrap();
        assert_eq!(a, b);
        let yaml = a.to_yaml().unwrap();
        assert_eq!(Policy::from_yaml_str(&yaml, "round-trip").unwrap(), a);
    }

    #[test]
    fn numeric_version_is_accepted() {
        let policy = Policy::from_yaml_str("version: 2\n", "v").unwrap();
        assert_eq!(policy.version, "2");
        assert!(policy.global.enabled);
    }

    #[test]
    fn empty_compliance_level_means_unset() {
        let policy = Policy::from_yaml_str("version: '1'\nglobal:\n  tag_criteria:\n    compliance_level: ''\n", "v").unwrap();
        assert_eq!(policy.global.tag_criteria.compliance_level, None);
    }

    #[test]
    fn rejects_missing_version() {
        assert_eq!(invalid("global:\n  enabled: true\n"), "version is required");
    }

    #[test]
    fn rejects_non_positive_batch_sizes() {
        assert!(invalid("version: '1'\nresources:\n  s3:\n    batch_size: 0\n").contains("batch_size for resource type s3"));
        assert!(invalid("version: '1'\nresources:\n  s3:\n    batch_size: -3\n").contains("s3"));
        assert!(invalid("version: '1'\nglobal:\n  batch_size: 0\n").contains("global batch_size"));
    }

    #[test]
    fn rejects_invalid_exclusion_pattern() {
        let src = "version: '1'\nresources:\n  s3:\n    excluded_resources:\n      - pattern: '(unclosed'\n        reason: x\n";
        assert!(matches!(Policy::from_yaml_str(src, "bad.yaml"), Err(PolicyError::Parse { .. })));
    }

    #[test]
    fn rejects_invalid_pattern_rule() {
        let src = "version: '1'\ntag_validation:\n  pattern_rules:\n    Owner: '[a-z'\n";
        let err = Policy::from_yaml_str(src, "bad.yaml").unwrap_err();
        assert!(err.to_string().contains("bad.yaml"));
        assert!(matches!(err, PolicyError::Parse { .. }));
    }

    #[test]
    fn rejects_required_and_forbidden_overlap() {
        let src = "version: '1'\nresources:\n  s3:\n    tag_criteria:\n      required_tags: [Owner]\n      forbidden_tags: [Owner]\n";
        assert!(invalid(src).contains("Owner is both required and forbidden"));
    }

    #[test]
    fn rejects_empty_tag_names_and_values() {
        assert!(invalid("version: '1'\nglobal:\n  tag_criteria:\n    required_tags: ['']\n").contains("empty required tag"));
        assert!(invalid("version: '1'\nglobal:\n  tag_criteria:\n    forbidden_tags: ['']\n").contains("empty forbidden tag"));
        assert!(invalid("version: '1'\nglobal:\n  tag_criteria:\n    specific_tags:\n      Team: ''\n").contains("key: Team"));
    }

    #[test]
    fn rejects_malformed_compliance_levels() {
        assert!(invalid("version: '1'\ncompliance_levels:\n  high:\n    required_tags: ['']\n").contains("'high'"));
        assert!(invalid("version: '1'\ncompliance_levels:\n  high:\n    specific_tags:\n      '': x\n").contains("'high'"));
    }

    #[test]
    fn rejects_bad_tag_validation() {
        assert!(invalid("version: '1'\ntag_validation:\n  allowed_values:\n    Environment: []\n").contains("no allowed values"));
        assert!(invalid("version: '1'\ntag_validation:\n  pattern_rules:\n    Owner: ''\n").contains("empty pattern rule for tag Owner"));
    }

    #[test]
    fn rejects_bad_notifications() {
        assert!(invalid("version: '1'\nnotifications:\n  slack:\n    enabled: true\n").contains("no channels"));
        assert!(invalid("version: '1'\nnotifications:\n  email:\n    enabled: true\n    recipients: [not-an-email]\n")
            .contains("invalid email format: not-an-email"));
        assert!(invalid("version: '1'\nnotifications:\n  email:\n    enabled: true\n    recipients: [a@b.io]\n    frequency: monthly\n")
            .contains("monthly"));
        // disabled channels are not checked
        assert!(Policy::from_yaml_str("version: '1'\nnotifications:\n  slack:\n    enabled: false\n", "ok").is_ok());
    }

    #[test]
    fn parse_errors_name_the_source() {
        let err = Policy::from_yaml_str("version: [", "broken.yaml").unwrap_err();
        assert!(matches!(err, PolicyError::Parse { ref source_name, .. } if source_name == "broken.yaml"));
    }
}
