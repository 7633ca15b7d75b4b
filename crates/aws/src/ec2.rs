use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::registry::{ServiceClient, ServiceDescriptor, ServiceKind};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::Filter;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tagwarden_core::{ResourceRef, ServiceScanner, TaggedResource};

pub const RESOURCE_TYPE: &str = "ec2:instance";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceSummary {
    pub instance_id: String,
    pub owner_id: String,
    pub instance_type: Option<String>,
    pub state: Option<String>,
    pub availability_zone: Option<String>,
}

#[async_trait]
pub trait InstanceApi: Send + Sync {
    async fn list_instances(&self) -> anyhow::Result<Vec<InstanceSummary>>;
    async fn instance_tags(&self, instance_id: &str) -> anyhow::Result<BTreeMap<String, String>>;
}

fn sdk_error<E: std::error::Error>(err: E) -> anyhow::Error { anyhow!("{}", DisplayErrorContext(err)) }

#[async_trait]
impl InstanceApi for aws_sdk_ec2::Client {
    async fn list_instances(&self) -> anyhow::Result<Vec<InstanceSummary>> {
        let mut instances = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.describe_instances().set_next_token(token.take()).send().await.map_err(sdk_error)?;
            for reservation in page.reservations() {
                let owner_id = reservation.owner_id().unwrap_or_default();
                for instance in reservation.instances() {
                    let Some(instance_id) = instance.instance_id() else { continue };
                    instances.push(InstanceSummary {
                        instance_id: instance_id.to_string(),
                        owner_id: owner_id.to_string(),
                        instance_type: instance.instance_type().map(|t| t.as_str().to_string()),
                        state: instance.state().and_then(|s| s.name()).map(|n| n.as_str().to_string()),
                        availability_zone: instance.placement().and_then(|p| p.availability_zone()).map(str::to_string),
                    });
                }
            }
            match page.next_token() {
                Some(next) if !next.is_empty() => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(instances)
    }

    async fn instance_tags(&self, instance_id: &str) -> anyhow::Result<BTreeMap<String, String>> {
        let filter = Filter::builder().name("resource-id").values(instance_id).build();
        let mut tags = BTreeMap::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .describe_tags()
                .filters(filter.clone())
                .set_next_token(token.take())
                .send()
                .await
                .map_err(sdk_error)?;
            for tag in page.tags() {
                if let (Some(key), Some(value)) = (tag.key(), tag.value()) {
                    tags.insert(key.to_string(), value.to_string());
                }
            }
            match page.next_token() {
                Some(next) if !next.is_empty() => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(tags)
    }
}

pub fn instance_arn(region: &str, owner_id: &str, instance_id: &str) -> String {
    format!("arn:aws:ec2:{region}:{owner_id}:instance/{instance_id}")
}

/// Scans the instances of one region.
pub struct InstanceScanner<A> {
    api: A,
    region: String,
}

impl<A: InstanceApi> InstanceScanner<A> {
    pub fn new(api: A, region: impl Into<String>) -> Self { Self { api, region: region.into() } }
}

#[async_trait]
impl<A: InstanceApi> ServiceScanner for InstanceScanner<A> {
    fn service_key(&self) -> &str { ServiceKind::Ec2.key() }
    fn resource_type(&self) -> &str { RESOURCE_TYPE }

    async fn list(&self) -> anyhow::Result<Vec<ResourceRef>> {
        let instances = self.api.list_instances().await.context("failed to describe instances")?;
        Ok(instances
            .into_iter()
            .map(|i| {
                let arn = instance_arn(&self.region, &i.owner_id, &i.instance_id);
                let mut candidate = ResourceRef::new(i.instance_id, arn);
                candidate.region = Some(self.region.clone());
                for (key, value) in [("InstanceType", i.instance_type), ("State", i.state), ("AvailabilityZone", i.availability_zone)] {
                    if let Some(value) = value {
                        candidate.metadata.insert(key.to_string(), Json::String(value));
                    }
                }
                candidate
            })
            .collect())
    }

    async fn fetch(&self, candidate: &ResourceRef) -> anyhow::Result<TaggedResource> {
        let tags = self
            .api
            .instance_tags(&candidate.id)
            .await
            .with_context(|| format!("failed to get tags of instance {}", candidate.id))?;
        Ok(TaggedResource {
            resource_type: RESOURCE_TYPE.to_string(),
            resource_id: candidate.id.clone(),
            arn: candidate.arn.clone(),
            region: candidate.region.clone().unwrap_or_else(|| self.region.clone()),
            tags,
            metadata: candidate.metadata.clone(),
        })
    }
}

fn build_client(sdk: &SdkConfig, _config: &ProviderConfig) -> ServiceClient {
    ServiceClient::Ec2(aws_sdk_ec2::Client::new(sdk))
}

fn build_scanner(client: ServiceClient, config: &ProviderConfig) -> Result<Arc<dyn ServiceScanner>, ProviderError> {
    match client {
        ServiceClient::Ec2(client) => Ok(Arc::new(InstanceScanner::new(client, config.region.clone()))),
        other => Err(ProviderError::ClientMismatch { expected: ServiceKind::Ec2.key(), actual: other.kind().key() }),
    }
}

pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor { kind: ServiceKind::Ec2, client: build_client, scanner: build_scanner }
}
