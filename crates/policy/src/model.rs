use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Batch size used when neither the resource nor the global section sets one.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// A regular expression compiled once, when the policy is parsed.
#[derive(Clone)]
pub struct Pattern { source: String, regex: Regex }

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(Self { source: source.to_string(), regex: Regex::new(source)? })
    }
    pub fn as_str(&self) -> &str { &self.source }
    pub fn is_match(&self, haystack: &str) -> bool { self.regex.is_match(haystack) }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool { self.source == other.source }
}
impl Eq for Pattern {}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> { s.serialize_str(&self.source) }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let source = String::deserialize(d)?;
        Pattern::new(&source).map_err(|err| D::Error::custom(format!("invalid pattern '{source}': {err}")))
    }
}

/// The declarative tag policy. Build it through [`Policy::from_yaml_str`] or
/// [`Policy::load`]; both validate before handing the value out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: String,
    #[serde(default)]
    pub global: GlobalSettings,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, ResourceSettings>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub compliance_levels: BTreeMap<String, ComplianceLevel>,
    #[serde(default)]
    pub tag_validation: TagValidation,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i64>,
    #[serde(default)]
    pub tag_criteria: TagCriteria,
}

impl Default for GlobalSettings {
    fn default() -> Self { Self { enabled: true, batch_size: None, tag_criteria: TagCriteria::default() } }
}

fn enabled_by_default() -> bool { true }

/// Per resource type override, keyed in the policy by service (`s3`, `ec2`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i64>,
    #[serde(default)]
    pub tag_criteria: TagCriteria,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_resources: Vec<ExcludedResource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedResource {
    pub pattern: Pattern,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagCriteria {
    pub minimum_required_tags: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub forbidden_tags: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub specific_tags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_level: Option<String>,
}

impl TagCriteria {
    /// Rules written directly in this criteria block. A compliance level
    /// only counts once it resolves, which `evaluate` checks.
    pub fn has_rules(&self) -> bool {
        self.minimum_required_tags > 0
            || !self.required_tags.is_empty()
            || !self.forbidden_tags.is_empty()
            || !self.specific_tags.is_empty()
    }
}

/// Named bundle of extra tags a resource opts into via `compliance_level`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceLevel {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_tags: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub specific_tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagValidation {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub allowed_values: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub pattern_rules: BTreeMap<String, Pattern>,
}

impl TagValidation {
    pub fn is_empty(&self) -> bool { self.allowed_values.is_empty() && self.pattern_rules.is_empty() }
}

/// Parsed and validated, never delivered by the scanner itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub slack: SlackNotifications,
    pub email: EmailNotifications,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackNotifications {
    pub enabled: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub channels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailNotifications {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
}

impl Policy {
    /// Global criteria with the resource type's overrides applied on top.
    ///
    /// Required and forbidden tags are concatenated (evaluation deduplicates),
    /// specific tags are merged with the resource entry winning, and the
    /// resource's compliance level replaces the global one when set.
    pub fn effective_criteria(&self, resource_type: &str) -> TagCriteria {
        let mut criteria = self.global.tag_criteria.clone();
        let Some(resource) = self.resources.get(resource_type) else { return criteria };
        let own = &resource.tag_criteria;
        criteria.required_tags.extend(own.required_tags.iter().cloned());
        criteria.forbidden_tags.extend(own.forbidden_tags.iter().cloned());
        for (k, v) in &own.specific_tags {
            criteria.specific_tags.insert(k.clone(), v.clone());
        }
        if own.minimum_required_tags > 0 {
            criteria.minimum_required_tags = own.minimum_required_tags;
        }
        if own.compliance_level.is_some() {
            criteria.compliance_level = own.compliance_level.clone();
        }
        criteria
    }

    /// First exclusion entry whose pattern matches `resource_id`, if any.
    pub fn is_excluded(&self, resource_type: &str, resource_id: &str) -> Option<&ExcludedResource> {
        self.resources
            .get(resource_type)?
            .excluded_resources
            .iter()
            .find(|ex| ex.pattern.is_match(resource_id))
    }

    /// Worker pool width for a resource type: resource override, then global,
    /// then the scanner's own default.
    pub fn batch_size(&self, resource_type: &str, scanner_default: usize) -> usize {
        let positive = |b: Option<i64>| b.filter(|b| *b > 0).and_then(|b| usize::try_from(b).ok());
        self.resources
            .get(resource_type)
            .and_then(|r| positive(r.batch_size))
            .or_else(|| positive(self.global.batch_size))
            .unwrap_or(scanner_default.max(1))
    }

    pub fn enabled_services(&self) -> impl Iterator<Item = (&str, &ResourceSettings)> {
        self.resources.iter().filter(|(_, r)| r.enabled).map(|(k, r)| (k.as_str(), r))
    }

    pub fn compliance_level(&self, name: &str) -> Option<&ComplianceLevel> { self.compliance_levels.get(name) }
}

fn scalar_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_yaml::Value::deserialize(d)? {
        serde_yaml::Value::Null => Ok(String::new()),
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!("version must be a string, found {other:?}"))),
    }
}
