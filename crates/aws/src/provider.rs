use crate::config::{CredentialSource, ProviderConfig};
use crate::error::ProviderError;
use crate::registry::{ServiceClient, ServiceKind, ServiceRegistry};
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::config::Credentials;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::Arc;
use tagwarden_core::{ScanError, ScannerProvider, ServiceScanner};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

/// Builds typed SDK clients on first use and hands out the same client for
/// every later request of that service.
pub struct CloudProvider {
    config: ProviderConfig,
    registry: ServiceRegistry,
    sdk: OnceCell<SdkConfig>,
    clients: Mutex<HashMap<ServiceKind, ServiceClient>>,
}

impl CloudProvider {
    pub fn new(config: ProviderConfig, registry: ServiceRegistry) -> Result<Self, ProviderError> {
        config.validate()?;
        Ok(Self { config, registry, sdk: OnceCell::new(), clients: Mutex::new(HashMap::new()) })
    }

    /// Uses `sdk` as is instead of resolving the credential chain.
    pub fn with_sdk_config(config: ProviderConfig, registry: ServiceRegistry, sdk: SdkConfig) -> Result<Self, ProviderError> {
        config.validate()?;
        Ok(Self { config, registry, sdk: OnceCell::new_with(Some(sdk)), clients: Mutex::new(HashMap::new()) })
    }

    pub fn config(&self) -> &ProviderConfig { &self.config }

    pub async fn sdk_config(&self) -> &SdkConfig { self.sdk.get_or_init(|| load_sdk_config(&self.config)).await }

    pub async fn client(&self, kind: ServiceKind) -> Result<ServiceClient, ProviderError> {
        let descriptor = self.registry.get(kind).ok_or(ProviderError::NotRegistered { service: kind.key() })?;
        let sdk = self.sdk_config().await;
        // Held across construction so concurrent callers never build twice.
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&kind) {
            return Ok(client.clone());
        }
        debug!(service = %kind, "building service client");
        let client = (descriptor.client)(sdk, &self.config);
        clients.insert(kind, client.clone());
        Ok(client)
    }

    pub async fn client_for(&self, service_key: &str) -> Result<ServiceClient, ProviderError> {
        self.client(service_key.parse()?).await
    }
}

fn static_credentials(source: &CredentialSource) -> Option<Credentials> {
    match source {
        CredentialSource::Static { access_key_id, secret_access_key, session_token } => Some(Credentials::new(
            access_key_id.clone(),
            secret_access_key.expose_secret().clone(),
            session_token.as_ref().map(|t| t.expose_secret().clone()),
            None,
            "tagwarden-static",
        )),
        _ => None,
    }
}

async fn load_sdk_config(config: &ProviderConfig) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
    let source = if let Some(credentials) = static_credentials(&config.credentials) {
        loader = loader.credentials_provider(credentials);
        "static"
    } else if let CredentialSource::Profile(name) = &config.credentials {
        loader = loader.profile_name(name);
        "profile"
    } else {
        "ambient"
    };
    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    if let Some(retries) = config.max_retries {
        loader = loader.retry_config(RetryConfig::standard().with_max_attempts(retries.saturating_add(1)));
    }
    info!(region = %config.region, credentials = source, endpoint = config.endpoint.as_deref(), "loading AWS configuration");
    loader.load().await
}

#[async_trait]
impl ScannerProvider for CloudProvider {
    async fn scanner(&self, service_key: &str) -> Result<Arc<dyn ServiceScanner>, ScanError> {
        let unknown = || ScanError::UnknownService(service_key.to_string());
        let kind: ServiceKind = service_key.parse().map_err(|_| unknown())?;
        let descriptor = *self.registry.get(kind).ok_or_else(unknown)?;
        let setup = |err: ProviderError| ScanError::Provider { service: service_key.to_string(), cause: err.to_string() };
        let client = self.client(kind).await.map_err(setup)?;
        (descriptor.scanner)(client, &self.config).map_err(setup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3;
    use crate::registry::ServiceDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static BUILT: AtomicUsize = AtomicUsize::new(0);

    fn counting_client(sdk: &SdkConfig, _config: &ProviderConfig) -> ServiceClient {
        BUILT.fetch_add(1, Ordering::SeqCst);
        ServiceClient::S3(aws_sdk_s3::Client::new(sdk))
    }

    fn offline_sdk() -> SdkConfig {
        SdkConfig::builder()
            .region(Region::new("us-east-1"))
            .behavior_version(BehaviorVersion::latest())
            .build()
    }

    #[tokio::test]
    async fn clients_are_built_once_per_service() {
        let mut registry = ServiceRegistry::empty();
        registry.register(ServiceDescriptor { client: counting_client, ..s3::descriptor() });
        let provider =
            Arc::new(CloudProvider::with_sdk_config(ProviderConfig::default(), registry, offline_sdk()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.client(ServiceKind::S3).await.map(|c| c.kind()) })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), ServiceKind::S3);
        }
        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
        assert!(matches!(
            provider.client(ServiceKind::Ec2).await,
            Err(ProviderError::NotRegistered { service: "ec2" })
        ));
    }

    #[tokio::test]
    async fn scanners_are_looked_up_by_policy_key() {
        let provider =
            CloudProvider::with_sdk_config(ProviderConfig::default(), ServiceRegistry::with_defaults(), offline_sdk())
                .unwrap();
        assert_eq!(provider.scanner("s3").await.unwrap().resource_type(), "s3:bucket");
        assert_eq!(provider.scanner("ec2").await.unwrap().resource_type(), "ec2:instance");
        assert!(matches!(provider.scanner("lambda").await, Err(ScanError::UnknownService(k)) if k == "lambda"));
        assert!(matches!(provider.client_for("rds").await, Err(ProviderError::UnknownService(_))));
    }

    fn secret_config() -> ProviderConfig {
        ProviderConfig {
            region: "eu-west-1".into(),
            credentials: CredentialSource::resolve(
                Some("AKIDEXAMPLE".into()),
                Some("s3cr3t".into()),
                Some("session".into()),
                Some("dev".into()),
            )
            .unwrap(),
            endpoint: Some("http://localhost:4566".into()),
            max_retries: Some(2),
            force_path_style: true,
        }
    }

    #[test]
    fn static_keys_become_sdk_credentials() {
        let credentials = static_credentials(&secret_config().credentials).unwrap();
        assert_eq!(credentials.access_key_id(), "AKIDEXAMPLE");
        assert_eq!(credentials.secret_access_key(), "s3cr3t");
        assert_eq!(credentials.session_token(), Some("session"));
        assert!(static_credentials(&CredentialSource::Profile("dev".into())).is_none());
        assert!(static_credentials(&CredentialSource::Ambient).is_none());
    }

    #[tokio::test]
    async fn provider_settings_reach_the_sdk_config() {
        let provider = CloudProvider::new(secret_config(), ServiceRegistry::with_defaults()).unwrap();
        let sdk = provider.sdk_config().await;
        assert_eq!(sdk.region().map(|r| r.to_string()), Some("eu-west-1".to_string()));
        assert_eq!(sdk.endpoint_url(), Some("http://localhost:4566"));
        assert_eq!(sdk.retry_config().map(|r| r.max_attempts()), Some(3));
        assert!(sdk.credentials_provider().is_some());
    }

    #[test]
    fn invalid_region_is_rejected_up_front() {
        let err = CloudProvider::new(ProviderConfig::new("nowhere"), ServiceRegistry::with_defaults()).err();
        assert!(matches!(err, Some(ProviderError::Config(_))));
    }
}
