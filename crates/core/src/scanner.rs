use crate::error::ScanError;
use crate::resource::{ResourceRef, TaggedResource};
use async_trait::async_trait;
use std::sync::Arc;
use tagwarden_policy::DEFAULT_BATCH_SIZE;

/// Listing and tag fetching for one cloud service. Evaluation is not part of
/// this contract; the orchestrator applies the policy to what `fetch` returns.
#[async_trait]
pub trait ServiceScanner: Send + Sync {
    /// Key of the service in the policy's `resources` section, e.g. `s3`.
    fn service_key(&self) -> &str;
    /// Label written into results, e.g. `s3:bucket`.
    fn resource_type(&self) -> &str;
    fn default_batch_size(&self) -> usize { DEFAULT_BATCH_SIZE }
    async fn list(&self) -> anyhow::Result<Vec<ResourceRef>>;
    /// Tags and metadata of one listed resource. A resource that simply has
    /// no tags must come back with an empty tag map, not an error.
    async fn fetch(&self, candidate: &ResourceRef) -> anyhow::Result<TaggedResource>;
}

/// Hands out a scanner for a policy service key.
#[async_trait]
pub trait ScannerProvider: Send + Sync {
    async fn scanner(&self, service_key: &str) -> Result<Arc<dyn ServiceScanner>, ScanError>;
}
