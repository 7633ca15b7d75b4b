use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::{ec2, s3};
use aws_config::SdkConfig;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tagwarden_core::ServiceScanner;

/// Every service the scanner knows how to reach. Adding one means a new
/// variant here and a descriptor registered in [`ServiceRegistry::with_defaults`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceKind { S3, Ec2 }

impl ServiceKind {
    pub const ALL: [ServiceKind; 2] = [ServiceKind::S3, ServiceKind::Ec2];

    /// Key used in the policy's `resources` section.
    pub fn key(self) -> &'static str {
        match self {
            ServiceKind::S3 => "s3",
            ServiceKind::Ec2 => "ec2",
        }
    }

    pub fn resource_type(self) -> &'static str {
        match self {
            ServiceKind::S3 => s3::RESOURCE_TYPE,
            ServiceKind::Ec2 => ec2::RESOURCE_TYPE,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.key()) }
}

impl FromStr for ServiceKind {
    type Err = ProviderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|k| k.key() == s).ok_or_else(|| ProviderError::UnknownService(s.to_string()))
    }
}

/// A typed SDK client; cheap to clone.
#[derive(Debug, Clone)]
pub enum ServiceClient {
    S3(aws_sdk_s3::Client),
    Ec2(aws_sdk_ec2::Client),
}

impl ServiceClient {
    pub fn kind(&self) -> ServiceKind {
        match self {
            ServiceClient::S3(_) => ServiceKind::S3,
            ServiceClient::Ec2(_) => ServiceKind::Ec2,
        }
    }
}

pub type ClientFactory = fn(&SdkConfig, &ProviderConfig) -> ServiceClient;
pub type ScannerFactory = fn(ServiceClient, &ProviderConfig) -> Result<Arc<dyn ServiceScanner>, ProviderError>;

#[derive(Clone, Copy)]
pub struct ServiceDescriptor {
    pub kind: ServiceKind,
    pub client: ClientFactory,
    pub scanner: ScannerFactory,
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor").field("kind", &self.kind).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: BTreeMap<ServiceKind, ServiceDescriptor>,
}

impl ServiceRegistry {
    pub fn empty() -> Self { Self { services: BTreeMap::new() } }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(s3::descriptor());
        registry.register(ec2::descriptor());
        registry
    }

    /// Registers a descriptor, returning the one it replaces.
    pub fn register(&mut self, descriptor: ServiceDescriptor) -> Option<ServiceDescriptor> {
        self.services.insert(descriptor.kind, descriptor)
    }

    pub fn get(&self, kind: ServiceKind) -> Option<&ServiceDescriptor> { self.services.get(&kind) }

    pub fn kinds(&self) -> impl Iterator<Item = ServiceKind> + '_ { self.services.keys().copied() }
}

impl Default for ServiceRegistry {
    fn default() -> Self { Self::with_defaults() }
}
