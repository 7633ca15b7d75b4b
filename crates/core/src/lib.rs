//! Scan pipeline: the resource value type, scanner capability traits, and the
//! bounded-concurrency orchestrator that turns a policy into a [`Report`].

mod error;
mod orchestrator;
mod resource;
mod result;
mod scanner;

pub use error::ScanError;
pub use orchestrator::{Orchestrator, ScanOptions};
pub use resource::{ResourceRef, TaggedResource, COMPLIANCE_LEVEL_TAG};
pub use result::{ComplianceTag, Counts, Report, ResourceError, ScanResult, ServiceFailure, Summary};
pub use scanner::{ScannerProvider, ServiceScanner};
pub use tokio_util::sync::CancellationToken;
