use crate::model::{ComplianceLevel, TagCriteria, TagValidation};
use std::collections::BTreeMap;

pub const NO_RULES: &str = "Invalid criteria: no validation rules specified";
pub const NO_TAGS: &str = "Resource has no tags";

/// Checks a resource's tags against criteria and returns the issues found, in
/// a fixed order: required, minimum count, forbidden, specific values,
/// allowed values, patterns. An empty result means the resource is compliant.
///
/// `criteria.compliance_level`, when it names one of `levels`, adds that
/// level's required and specific tags; the criteria's own specific tags win
/// on key conflicts.
pub fn evaluate(
    tags: &BTreeMap<String, String>,
    criteria: &TagCriteria,
    levels: &BTreeMap<String, ComplianceLevel>,
    validation: &TagValidation,
) -> Vec<String> {
    let level = criteria.compliance_level.as_deref().and_then(|name| levels.get(name));
    if !criteria.has_rules() && level.is_none() && validation.is_empty() {
        return vec![NO_RULES.to_string()];
    }
    if tags.is_empty() {
        return vec![NO_TAGS.to_string()];
    }

    let mut required: Vec<&str> = Vec::new();
    let level_required = level.map(|l| l.required_tags.as_slice()).unwrap_or_default();
    for tag in criteria.required_tags.iter().chain(level_required) {
        if !tag.is_empty() && !required.contains(&tag.as_str()) {
            required.push(tag);
        }
    }

    let mut specific: BTreeMap<&str, &str> = BTreeMap::new();
    if let Some(level) = level {
        specific.extend(level.specific_tags.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    specific.extend(criteria.specific_tags.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let mut issues = Vec::new();
    for tag in required {
        if !tags.contains_key(tag) {
            issues.push(format!("Missing required tag: {tag}"));
        }
    }

    if criteria.minimum_required_tags > 0 && tags.len() < criteria.minimum_required_tags {
        issues.push(format!("Fewer than {} tags present", criteria.minimum_required_tags));
    }

    let mut forbidden: Vec<&str> = Vec::new();
    for tag in &criteria.forbidden_tags {
        if !tag.is_empty() && !forbidden.contains(&tag.as_str()) {
            forbidden.push(tag);
        }
    }
    for tag in forbidden {
        if tags.contains_key(tag) {
            issues.push(format!("Contains forbidden tag: {tag}"));
        }
    }

    for (key, expected) in specific {
        if key.is_empty() {
            continue;
        }
        if tags.get(key).map(String::as_str) != Some(expected) {
            issues.push(format!("Tag mismatch: {key} should be {expected}"));
        }
    }

    for (key, value) in tags {
        if let Some(allowed) = validation.allowed_values.get(key) {
            if !allowed.contains(value) {
                issues.push(format!("Tag {key} has disallowed value {value}"));
            }
        }
    }
    for (key, value) in tags {
        if let Some(pattern) = validation.pattern_rules.get(key) {
            if !pattern.is_match(value) {
                issues.push(format!("Tag {key} value {value} does not match required pattern"));
            }
        }
    }

    issues
}
