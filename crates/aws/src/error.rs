use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider configuration: {0}")]
    Config(String),
    #[error("unknown service '{0}'")]
    UnknownService(String),
    #[error("service {service} is not registered with this provider")]
    NotRegistered { service: &'static str },
    #[error("client for {expected} was built as {actual}")]
    ClientMismatch { expected: &'static str, actual: &'static str },
}
