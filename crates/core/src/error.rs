use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("unknown service '{0}'")]
    UnknownService(String),
    #[error("{service}: cannot build scanner: {cause}")]
    Provider { service: String, cause: String },
    #[error("{service}: listing failed: {cause}")]
    Listing { service: String, cause: String },
    #[error("scan task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ScanError {
    /// Errors confined to one service, which a run may record and move past.
    pub fn service_failure(&self) -> Option<(&str, &str)> {
        match self {
            ScanError::Provider { service, cause } | ScanError::Listing { service, cause } => Some((service, cause)),
            _ => None,
        }
    }
}
