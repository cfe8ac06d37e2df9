//! Configuration Builder
//!
//! Fluent builder for OAuth2 configuration.

use std::time::Duration;

use crate::error::{ConfigurationError, OAuth2Error};
use crate::types::{
    ClientAuthMethod, ClientCredentials, OAuth2Config, ProviderConfig, DEFAULT_TIMEOUT_SECS,
    MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS,
};
use secrecy::SecretString;

/// OAuth2 configuration builder.
#[derive(Default)]
pub struct OAuth2ConfigBuilder {
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    auth_method: Option<ClientAuthMethod>,
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
    redirect_uri: Option<String>,
    default_scopes: Vec<String>,
    timeout: Duration,
}

impl OAuth2ConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            ..Default::default()
        }
    }

    /// Set client ID.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set client secret.
    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::new(client_secret.into()));
        self
    }

    /// Set client authentication method.
    pub fn auth_method(mut self, method: ClientAuthMethod) -> Self {
        self.auth_method = Some(method);
        self
    }

    /// Set authorization endpoint.
    pub fn authorization_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.authorization_endpoint = Some(endpoint.into());
        self
    }

    /// Set token endpoint.
    pub fn token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = Some(endpoint.into());
        self
    }

    /// Set the registered redirect URI.
    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// Add a default scope.
    pub fn add_default_scope(mut self, scope: impl Into<String>) -> Self {
        self.default_scopes.push(scope.into());
        self
    }

    /// Set request timeout (must lie within 5..=10 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the OAuth2 configuration.
    pub fn build(self) -> Result<OAuth2Config, OAuth2Error> {
        let client_id = required(self.client_id, "client_id")?;
        let client_secret = required(self.client_secret, "client_secret")?;
        let authorization_endpoint =
            endpoint(required(self.authorization_endpoint, "authorization_endpoint")?)?;
        let token_endpoint = endpoint(required(self.token_endpoint, "token_endpoint")?)?;
        let redirect_uri = endpoint(required(self.redirect_uri, "redirect_uri")?)?;

        let bounds = Duration::from_secs(MIN_TIMEOUT_SECS)..=Duration::from_secs(MAX_TIMEOUT_SECS);
        if !bounds.contains(&self.timeout) {
            return Err(OAuth2Error::Configuration(ConfigurationError::InvalidConfig {
                message: format!(
                    "timeout must be between {} and {} seconds, got {:?}",
                    MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS, self.timeout
                ),
            }));
        }

        Ok(OAuth2Config {
            credentials: ClientCredentials {
                client_id,
                client_secret: Some(client_secret),
                auth_method: self.auth_method.unwrap_or_default(),
            },
            provider: ProviderConfig {
                authorization_endpoint,
                token_endpoint,
            },
            redirect_uri,
            default_scopes: self.default_scopes,
            timeout: self.timeout,
        })
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, OAuth2Error> {
    value.ok_or_else(|| {
        OAuth2Error::Configuration(ConfigurationError::MissingRequired {
            field: field.to_string(),
        })
    })
}

fn endpoint(value: String) -> Result<String, OAuth2Error> {
    match url::Url::parse(&value) {
        Ok(_) => Ok(value),
        Err(_) => Err(OAuth2Error::Configuration(ConfigurationError::InvalidEndpoint {
            url: value,
        })),
    }
}

/// Create a new OAuth2 configuration builder.
pub fn oauth2_config() -> OAuth2ConfigBuilder {
    OAuth2ConfigBuilder::new()
}
