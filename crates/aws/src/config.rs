use crate::error::ProviderError;
use regex::Regex;
use secrecy::SecretString;

pub const DEFAULT_REGION: &str = "us-east-1";
const REGION_PATTERN: &str = r"^[a-z]{2}-[a-z]+-\d$";

/// Where SDK credentials come from, in resolution order.
#[derive(Debug, Default)]
pub enum CredentialSource {
    Static { access_key_id: String, secret_access_key: SecretString, session_token: Option<SecretString> },
    Profile(String),
    #[default]
    Ambient,
}

impl CredentialSource {
    /// Explicit keys win over a named profile, which wins over the ambient
    /// chain (environment, shared config, instance role).
    pub fn resolve(
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        session_token: Option<String>,
        profile: Option<String>,
    ) -> Result<Self, ProviderError> {
        match (access_key_id, secret_access_key) {
            (Some(access_key_id), Some(secret)) => Ok(Self::Static {
                access_key_id,
                secret_access_key: SecretString::new(secret),
                session_token: session_token.map(SecretString::new),
            }),
            (Some(_), None) | (None, Some(_)) => Err(ProviderError::Config(
                "access key id and secret access key must be given together".into(),
            )),
            (None, None) => Ok(profile.map(Self::Profile).unwrap_or_default()),
        }
    }
}

#[derive(Debug)]
pub struct ProviderConfig {
    pub region: String,
    pub credentials: CredentialSource,
    /// Replaces the default endpoint resolver for every client.
    pub endpoint: Option<String>,
    pub max_retries: Option<u32>,
    pub force_path_style: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            credentials: CredentialSource::Ambient,
            endpoint: None,
            max_retries: None,
            force_path_style: false,
        }
    }
}

impl ProviderConfig {
    pub fn new(region: impl Into<String>) -> Self { Self { region: region.into(), ..Self::default() } }

    pub fn validate(&self) -> Result<(), ProviderError> {
        let pattern = Regex::new(REGION_PATTERN).map_err(|e| ProviderError::Config(e.to_string()))?;
        if !pattern.is_match(&self.region) {
            return Err(ProviderError::Config(format!("invalid AWS region format: {}", self.region)));
        }
        if self.endpoint.as_deref().is_some_and(str::is_empty) {
            return Err(ProviderError::Config("endpoint override cannot be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn static_keys_take_precedence_over_profile() {
        let src = CredentialSource::resolve(Some("AKIA".into()), Some("s3cr3t".into()), None, Some("dev".into())).unwrap();
        match src {
            CredentialSource::Static { access_key_id, secret_access_key, session_token } => {
                assert_eq!(access_key_id, "AKIA");
                assert_eq!(secret_access_key.expose_secret(), "s3cr3t");
                assert!(session_token.is_none());
            }
            other => panic!("expected static credentials, got {other:?}"),
        }
    }

    #[test]
    fn profile_then_ambient() {
        assert!(matches!(
            CredentialSource::resolve(None, None, None, Some("dev".into())).unwrap(),
            CredentialSource::Profile(p) if p == "dev"
        ));
        assert!(matches!(CredentialSource::resolve(None, None, None, None).unwrap(), CredentialSource::Ambient));
    }

    #[test]
    fn half_a_key_pair_is_rejected() {
        assert!(CredentialSource::resolve(Some("AKIA".into()), None, None, None).is_err());
        assert!(CredentialSource::resolve(None, Some("x".into()), None, None).is_err());
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let src = CredentialSource::resolve(Some("AKIA".into()), Some("s3cr3t".into()), None, None).unwrap();
        assert!(!format!("{src:?}").contains("s3cr3t"));
    }

    #[test]
    fn region_format_is_checked() {
        assert!(ProviderConfig::new("eu-west-2").validate().is_ok());
        assert!(ProviderConfig::new("ap-southeast-1").validate().is_ok());
        assert!(ProviderConfig::new("moon-1").validate().is_err());
        assert!(ProviderConfig::new("").validate().is_err());
    }
}
