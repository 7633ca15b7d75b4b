use crate::result::ScanResult;
use serde_json::Value as Json;
use std::borrow::Cow;
use std::collections::BTreeMap;
use tagwarden_policy::{evaluate, Policy, TagCriteria};

/// Tag carried by a resource to pick its own compliance level.
pub const COMPLIANCE_LEVEL_TAG: &str = "ComplianceLevel";

/// A listed resource that has not had its tags fetched yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceRef {
    pub id: String,
    pub arn: String,
    pub region: Option<String>,
    pub metadata: BTreeMap<String, Json>,
}

impl ResourceRef {
    pub fn new(id: impl Into<String>, arn: impl Into<String>) -> Self {
        Self { id: id.into(), arn: arn.into(), ..Default::default() }
    }
}

/// Identity plus tags of one cloud resource, as fetched by a scanner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaggedResource {
    pub resource_type: String,
    pub resource_id: String,
    pub arn: String,
    pub region: String,
    pub tags: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, Json>,
}

impl TaggedResource {
    pub fn tags(&self) -> &BTreeMap<String, String> { &self.tags }
    pub fn has_tags(&self) -> bool { !self.tags.is_empty() }
    pub fn has_tag(&self, key: &str) -> bool { self.tags.contains_key(key) }
    pub fn tag_value(&self, key: &str) -> Option<&str> { self.tags.get(key).map(String::as_str) }

    /// The criteria this resource is judged by. A `ComplianceLevel` tag on
    /// the resource replaces the policy's level for this resource only.
    pub fn criteria_for<'c>(&self, criteria: &'c TagCriteria) -> Cow<'c, TagCriteria> {
        match self.tag_value(COMPLIANCE_LEVEL_TAG).filter(|l| !l.is_empty()) {
            Some(level) if criteria.compliance_level.as_deref() != Some(level) => {
                let mut own = criteria.clone();
                own.compliance_level = Some(level.to_string());
                Cow::Owned(own)
            }
            _ => Cow::Borrowed(criteria),
        }
    }

    pub fn evaluate(&self, criteria: &TagCriteria, policy: &Policy) -> Vec<String> {
        evaluate(&self.tags, &self.criteria_for(criteria), &policy.compliance_levels, &policy.tag_validation)
    }

    pub fn validate_compliance(&self, criteria: &TagCriteria, policy: &Policy) -> bool {
        self.evaluate(criteria, policy).is_empty()
    }

    pub fn scan(self, criteria: &TagCriteria, policy: &Policy) -> ScanResult {
        let issues = self.evaluate(criteria, policy);
        ScanResult::new(self, issues)
    }
}
