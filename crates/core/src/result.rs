use crate::resource::TaggedResource;
use serde::Serialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComplianceTag { Compliant, NonCompliant }

/// Outcome for one resource. Compliant exactly when `issues` is empty; the
/// fields are read-only so that cannot drift after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    resource_type: String,
    resource_id: String,
    arn: String,
    region: String,
    tags: BTreeMap<String, String>,
    issues: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, Json>,
    compliance_tag: ComplianceTag,
}

impl ScanResult {
    pub fn new(resource: TaggedResource, issues: Vec<String>) -> Self {
        let compliance_tag = if issues.is_empty() { ComplianceTag::Compliant } else { ComplianceTag::NonCompliant };
        Self {
            resource_type: resource.resource_type,
            resource_id: resource.resource_id,
            arn: resource.arn,
            region: resource.region,
            tags: resource.tags,
            issues,
            metadata: resource.metadata,
            compliance_tag,
        }
    }

    pub fn resource_type(&self) -> &str { &self.resource_type }
    pub fn resource_id(&self) -> &str { &self.resource_id }
    pub fn arn(&self) -> &str { &self.arn }
    pub fn region(&self) -> &str { &self.region }
    pub fn tags(&self) -> &BTreeMap<String, String> { &self.tags }
    pub fn issues(&self) -> &[String] { &self.issues }
    pub fn metadata(&self) -> &BTreeMap<String, Json> { &self.metadata }
    pub fn compliance_tag(&self) -> ComplianceTag { self.compliance_tag }
    pub fn is_compliant(&self) -> bool { self.compliance_tag == ComplianceTag::Compliant }
}

/// A resource whose tags could not be fetched. Never aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceError {
    pub resource_type: String,
    pub resource_id: String,
    pub cause: String,
}

/// A service that could not be scanned at all (listing or client setup failed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceFailure {
    pub service: String,
    pub cause: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub results: Vec<ScanResult>,
    pub errors: Vec<ResourceError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ServiceFailure>,
    /// Candidates per resource type left after exclusion.
    pub discovered: BTreeMap<String, usize>,
    pub excluded: BTreeMap<String, usize>,
    pub cancelled: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub total: usize,
    pub compliant: usize,
    pub non_compliant: usize,
}

impl Counts {
    fn add(&mut self, result: &ScanResult) {
        self.total += 1;
        if result.is_compliant() { self.compliant += 1 } else { self.non_compliant += 1 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_resources: usize,
    pub compliant: usize,
    pub non_compliant: usize,
    pub by_resource_type: BTreeMap<String, Counts>,
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    summary: Summary,
    #[serde(flatten)]
    report: &'a Report,
}

impl Report {
    pub fn summary(&self) -> Summary {
        let mut all = Counts::default();
        let mut by_resource_type: BTreeMap<String, Counts> = BTreeMap::new();
        for r in &self.results {
            all.add(r);
            by_resource_type.entry(r.resource_type.clone()).or_default().add(r);
        }
        Summary { total_resources: all.total, compliant: all.compliant, non_compliant: all.non_compliant, by_resource_type }
    }

    pub fn result(&self, resource_id: &str) -> Option<&ScanResult> {
        self.results.iter().find(|r| r.resource_id == resource_id)
    }

    pub fn has_failures(&self) -> bool { !self.failures.is_empty() }

    /// Groups results by resource type, then id.
    pub(crate) fn sort(&mut self) {
        self.results.sort_by(|a, b| (&a.resource_type, &a.resource_id).cmp(&(&b.resource_type, &b.resource_id)));
        self.errors.sort_by(|a, b| (&a.resource_type, &a.resource_id).cmp(&(&b.resource_type, &b.resource_id)));
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&ReportDocument { summary: self.summary(), report: self })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(kind: &str, id: &str, issues: &[&str]) -> ScanResult {
        let resource = TaggedResource {
            resource_type: kind.into(),
            resource_id: id.into(),
            arn: format!("arn:{id}"),
            region: "us-east-1".into(),
            ..Default::default()
        };
        ScanResult::new(resource, issues.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn summary_counts_by_type() {
        let report = Report {
            results: vec![
                result("s3:bucket", "a", &[]),
                result("s3:bucket", "b", &["Resource has no tags"]),
                result("ec2:instance", "i-1", &[]),
            ],
            ..Default::default()
        };
        let summary = report.summary();
        assert_eq!((summary.total_resources, summary.compliant, summary.non_compliant), (3, 2, 1));
        assert_eq!(summary.by_resource_type["s3:bucket"], Counts { total: 2, compliant: 1, non_compliant: 1 });
    }

    #[test]
    fn json_document_uses_wire_names() {
        let mut report = Report { results: vec![result("s3:bucket", "b", &["Resource has no tags"])], ..Default::default() };
        report.errors.push(ResourceError { resource_type: "s3:bucket".into(), resource_id: "c".into(), cause: "denied".into() });
        let doc: Json = serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        let first = &doc["results"][0];
        assert_eq!(first["compliance_tag"], "non-compliant");
        assert_eq!(first["resource_id"], "b");
        assert!(first.get("metadata").is_none());
        assert_eq!(doc["errors"][0]["cause"], "denied");
        assert_eq!(doc["summary"]["non_compliant"], 1);
        assert!(doc.get("failures").is_none());
    }
}
