use crate::config::{ProviderConfig, DEFAULT_REGION};
use crate::error::ProviderError;
use crate::registry::{ServiceClient, ServiceDescriptor, ServiceKind};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::DateTimeFormat;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tagwarden_core::{ResourceRef, ServiceScanner, TaggedResource};
use tracing::debug;

pub const RESOURCE_TYPE: &str = "s3:bucket";
const NO_TAG_SET: &str = "NoSuchTagSet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSummary {
    pub name: String,
    /// RFC 3339.
    pub creation_date: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum TagFetchError {
    /// The bucket has never been tagged. Not a failure.
    #[error("bucket has no tag set")]
    NoTagSet,
    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

/// The bucket calls a scan needs.
#[async_trait]
pub trait BucketApi: Send + Sync {
    async fn list_buckets(&self) -> anyhow::Result<Vec<BucketSummary>>;
    async fn bucket_region(&self, bucket: &str) -> anyhow::Result<String>;
    async fn bucket_tags(&self, bucket: &str) -> Result<BTreeMap<String, String>, TagFetchError>;
    /// Best effort; whatever cannot be read is left out.
    async fn bucket_metadata(&self, _bucket: &str) -> BTreeMap<String, Json> { BTreeMap::new() }
}

fn sdk_error<E: std::error::Error>(err: E) -> anyhow::Error { anyhow!("{}", DisplayErrorContext(err)) }

/// Buckets created before location constraints existed report an empty
/// constraint (us-east-1) or the legacy `EU` alias.
fn normalize_location(constraint: &str) -> String {
    match constraint {
        "" => DEFAULT_REGION,
        "EU" => "eu-west-1",
        other => other,
    }
    .to_string()
}

#[async_trait]
impl BucketApi for aws_sdk_s3::Client {
    async fn list_buckets(&self) -> anyhow::Result<Vec<BucketSummary>> {
        let mut buckets = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list_buckets().set_continuation_token(token.take()).send().await.map_err(sdk_error)?;
            for bucket in page.buckets() {
                let Some(name) = bucket.name() else { continue };
                buckets.push(BucketSummary {
                    name: name.to_string(),
                    creation_date: bucket.creation_date().and_then(|d| d.fmt(DateTimeFormat::DateTime).ok()),
                });
            }
            match page.continuation_token() {
                Some(next) if !next.is_empty() => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(buckets)
    }

    async fn bucket_region(&self, bucket: &str) -> anyhow::Result<String> {
        let out = self.get_bucket_location().bucket(bucket).send().await.map_err(sdk_error)?;
        Ok(normalize_location(out.location_constraint().map(|c| c.as_str()).unwrap_or_default()))
    }

    async fn bucket_tags(&self, bucket: &str) -> Result<BTreeMap<String, String>, TagFetchError> {
        match self.get_bucket_tagging().bucket(bucket).send().await {
            Ok(out) => Ok(out.tag_set().iter().map(|t| (t.key().to_string(), t.value().to_string())).collect()),
            Err(err) if err.as_service_error().and_then(|e| e.code()) == Some(NO_TAG_SET) => Err(TagFetchError::NoTagSet),
            Err(err) => Err(TagFetchError::Api(sdk_error(err))),
        }
    }

    async fn bucket_metadata(&self, bucket: &str) -> BTreeMap<String, Json> {
        let mut metadata = BTreeMap::new();
        if let Ok(out) = self.get_bucket_versioning().bucket(bucket).send().await {
            if let Some(status) = out.status() {
                metadata.insert("Versioning".to_string(), Json::from(status.as_str()));
            }
        }
        if let Ok(out) = self.get_bucket_encryption().bucket(bucket).send().await {
            if let Some(conf) = out.server_side_encryption_configuration() {
                let algorithms = conf
                    .rules()
                    .iter()
                    .filter_map(|rule| rule.apply_server_side_encryption_by_default())
                    .map(|default| Json::from(default.sse_algorithm().as_str()))
                    .collect();
                metadata.insert("Encryption".to_string(), Json::Array(algorithms));
            }
        }
        if let Ok(out) = self.get_bucket_policy_status().bucket(bucket).send().await {
            if let Some(public) = out.policy_status().and_then(|s| s.is_public()) {
                metadata.insert("PublicAccessAllowed".to_string(), Json::Bool(public));
            }
        }
        metadata
    }
}

pub fn bucket_arn(name: &str) -> String { format!("arn:aws:s3:::{name}") }

/// Scans buckets through any [`BucketApi`].
pub struct BucketScanner<A> {
    api: A,
}

impl<A: BucketApi> BucketScanner<A> {
    pub fn new(api: A) -> Self { Self { api } }
}

#[async_trait]
impl<A: BucketApi> ServiceScanner for BucketScanner<A> {
    fn service_key(&self) -> &str { ServiceKind::S3.key() }
    fn resource_type(&self) -> &str { RESOURCE_TYPE }

    async fn list(&self) -> anyhow::Result<Vec<ResourceRef>> {
        let buckets = self.api.list_buckets().await.context("failed to list buckets")?;
        Ok(buckets
            .into_iter()
            .map(|b| {
                let mut candidate = ResourceRef::new(b.name.as_str(), bucket_arn(&b.name));
                if let Some(created) = b.creation_date {
                    candidate.metadata.insert("CreationDate".to_string(), Json::String(created));
                }
                candidate
            })
            .collect())
    }

    async fn fetch(&self, candidate: &ResourceRef) -> anyhow::Result<TaggedResource> {
        let bucket = candidate.id.as_str();
        let region = self.api.bucket_region(bucket).await.with_context(|| format!("failed to get location of bucket {bucket}"))?;
        let tags = match self.api.bucket_tags(bucket).await {
            Ok(tags) => tags,
            Err(TagFetchError::NoTagSet) => {
                debug!(bucket, "bucket has no tag set");
                BTreeMap::new()
            }
            Err(TagFetchError::Api(err)) => return Err(err.context(format!("failed to get tags of bucket {bucket}"))),
        };
        let mut metadata = candidate.metadata.clone();
        metadata.extend(self.api.bucket_metadata(bucket).await);
        Ok(TaggedResource {
            resource_type: RESOURCE_TYPE.to_string(),
            resource_id: candidate.id.clone(),
            arn: candidate.arn.clone(),
            region,
            tags,
            metadata,
        })
    }
}

fn build_client(sdk: &SdkConfig, config: &ProviderConfig) -> ServiceClient {
    let conf = aws_sdk_s3::config::Builder::from(sdk).force_path_style(config.force_path_style).build();
    ServiceClient::S3(aws_sdk_s3::Client::from_conf(conf))
}

fn build_scanner(client: ServiceClient, _config: &ProviderConfig) -> Result<Arc<dyn ServiceScanner>, ProviderError> {
    match client {
        ServiceClient::S3(client) => Ok(Arc::new(BucketScanner::new(client))),
        other => Err(ProviderError::ClientMismatch { expected: ServiceKind::S3.key(), actual: other.kind().key() }),
    }
}

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor { kind: ServiceKind::S3, client: build_client, scanner: build_scanner }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Stub {
        tags: BTreeMap<String, BTreeMap<String, String>>,
        untagged: Vec<String>,
    }

    #[async_trait]
    impl BucketApi for Stub {
        async fn list_buckets(&self) -> anyhow::Result<Vec<BucketSummary>> {
            Ok(vec![
                BucketSummary { name: "logs".into(), creation_date: Some("2024-01-02T03:04:05Z".into()) },
                BucketSummary { name: "blank".into(), creation_date: None },
            ])
        }
        async fn bucket_region(&self, bucket: &str) -> anyhow::Result<String> {
            if bucket == "gone" { anyhow::bail!("NoSuchBucket") }
            Ok("eu-west-1".into())
        }
        async fn bucket_tags(&self, bucket: &str) -> Result<BTreeMap<String, String>, TagFetchError> {
            if self.untagged.iter().any(|b| b == bucket) {
                return Err(TagFetchError::NoTagSet);
            }
            self.tags.get(bucket).cloned().ok_or_else(|| anyhow!("AccessDenied: Access Denied").into())
        }
        async fn bucket_metadata(&self, _bucket: &str) -> BTreeMap<String, Json> {
            BTreeMap::from([("Versioning".to_string(), Json::from("Enabled"))])
        }
    }

    #[test]
    fn location_constraint_aliases() {
        assert_eq!(normalize_location(""), "us-east-1");
        assert_eq!(normalize_location("EU"), "eu-west-1");
        assert_eq!(normalize_location("ap-south-1"), "ap-south-1");
    }

    #[tokio::test]
    async fn listing_carries_arn_and_creation_date() {
        let scanner = BucketScanner::new(Stub::default());
        let listed = scanner.list().await.unwrap();
        assert_eq!(listed[0].arn, "arn:aws:s3:::logs");
        assert_eq!(listed[0].metadata["CreationDate"], "2024-01-02T03:04:05Z");
        assert!(listed[1].metadata.is_empty());
    }

    #[tokio::test]
    async fn missing_tag_set_is_an_empty_map() {
        let scanner = BucketScanner::new(Stub { untagged: vec!["blank".into()], ..Default::default() });
        let fetched = scanner.fetch(&ResourceRef::new("blank", bucket_arn("blank"))).await.unwrap();
        assert!(fetched.tags.is_empty());
        assert_eq!(fetched.region, "eu-west-1");
        assert_eq!(fetched.resource_type, RESOURCE_TYPE);
        assert_eq!(fetched.metadata["Versioning"], "Enabled");
    }

    #[tokio::test]
    async fn other_tag_errors_fail_the_resource() {
        let scanner = BucketScanner::new(Stub::default());
        let err = scanner.fetch(&ResourceRef::new("locked", bucket_arn("locked"))).await.unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("failed to get tags of bucket locked"), "{msg}");
        assert!(msg.contains("AccessDenied"), "{msg}");
    }

    #[tokio::test]
    async fn location_failure_fails_the_resource() {
        let scanner = BucketScanner::new(Stub::default());
        let err = scanner.fetch(&ResourceRef::new("gone", bucket_arn("gone"))).await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to get location of bucket gone"));
    }
}
