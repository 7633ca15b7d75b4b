//! AWS access for the scanner: provider configuration, lazily built SDK
//! clients looked up through a service registry, and the S3 bucket and EC2
//! instance scanners.

mod config;
mod ec2;
mod error;
mod provider;
mod registry;
mod s3;

pub use config::{CredentialSource, ProviderConfig, DEFAULT_REGION};
pub use ec2::{instance_arn, InstanceApi, InstanceScanner, InstanceSummary};
pub use error::ProviderError;
pub use provider::CloudProvider;
pub use registry::{ClientFactory, ScannerFactory, ServiceClient, ServiceDescriptor, ServiceKind, ServiceRegistry};
pub use s3::{bucket_arn, BucketApi, BucketScanner, BucketSummary, TagFetchError};
