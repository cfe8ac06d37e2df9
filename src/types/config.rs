//! Configuration Types
//!
//! Provider, coordinator, store and job configuration.

use chrono::Duration as ChronoDuration;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::builders::OAuth2ConfigBuilder;
use crate::error::{ConfigurationError, OAuth2Error};
use crate::resilience::RetryConfig;

/// OAuth2 client configuration.
#[derive(Clone, Debug)]
pub struct OAuth2Config {
    /// Provider configuration.
    pub provider: ProviderConfig,
    /// Client credentials.
    pub credentials: ClientCredentials,
    /// Registered redirect URI for the authorization-code grant.
    pub redirect_uri: String,
    /// Default scopes to request.
    pub default_scopes: Vec<String>,
    /// HTTP timeout.
    pub timeout: Duration,
}

/// OAuth2 provider endpoint configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Authorization endpoint URL.
    pub authorization_endpoint: String,
    /// Token endpoint URL.
    pub token_endpoint: String,
}

/// Client credentials for OAuth2 authentication.
#[derive(Clone)]
pub struct ClientCredentials {
    /// Client identifier.
    pub client_id: String,
    /// Client secret.
    pub client_secret: Option<SecretString>,
    /// Client authentication method.
    pub auth_method: ClientAuthMethod,
}

impl Default for ClientCredentials {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            auth_method: ClientAuthMethod::ClientSecretBasic,
        }
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("auth_method", &self.auth_method)
            .finish()
    }
}

/// Client authentication method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// client_id and client_secret in request body.
    ClientSecretPost,
    /// HTTP Basic Authentication header.
    #[default]
    ClientSecretBasic,
}

/// Grant type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantType {
    #[serde(rename = "authorization_code")]
    AuthorizationCode,
    #[serde(rename = "refresh_token")]
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
        }
    }
}

/// Refresh coordination settings.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Refresh once the access token is this close to expiry.
    pub refresh_threshold: ChronoDuration,
    /// Lifetime assumed for a rotated refresh token whose expiry is not announced.
    pub refresh_token_lifetime: ChronoDuration,
    /// Retry policy for token endpoint and store reads.
    pub retry: RetryConfig,
    /// Time budget of one scheduled invocation.
    pub invocation_budget: Duration,
    /// Minimum remaining budget required to issue a conditional write.
    pub write_guard: Duration,
    /// Lifetime of a human authorization session.
    pub session_ttl: ChronoDuration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            refresh_threshold: ChronoDuration::seconds(DEFAULT_REFRESH_THRESHOLD_SECS as i64),
            refresh_token_lifetime: ChronoDuration::days(90),
            retry: RetryConfig::default(),
            invocation_budget: Duration::from_secs(50),
            write_guard: Duration::from_secs(2),
            session_ttl: ChronoDuration::seconds(60),
        }
    }
}

/// Remote secret store location.
#[derive(Clone)]
pub struct StoreConfig {
    /// Base URL of the secret store API.
    pub base_url: String,
    /// Secret holding the token record.
    pub secret_name: String,
    /// Optional bearer token for the store.
    pub auth_token: Option<SecretString>,
    /// HTTP timeout.
    pub timeout: Duration,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("base_url", &self.base_url)
            .field("secret_name", &self.secret_name)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Everything a scheduled invocation needs.
#[derive(Clone, Debug)]
pub struct JobConfig {
    pub oauth: OAuth2Config,
    pub coordinator: CoordinatorConfig,
    pub store: StoreConfig,
}

impl JobConfig {
    /// Read configuration from `TOKEN_KEEPER_*` environment variables.
    pub fn from_env() -> Result<Self, OAuth2Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, OAuth2Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.is_empty());
        let required = |name: &str| {
            var(name).ok_or_else(|| {
                OAuth2Error::Configuration(ConfigurationError::MissingRequired {
                    field: format!("{}{}", ENV_PREFIX, name),
                })
            })
        };
        let seconds = |name: &str| -> Result<Option<u64>, OAuth2Error> {
            var(name)
                .map(|raw| {
                    raw.trim().parse::<u64>().map_err(|_| {
                        OAuth2Error::Configuration(ConfigurationError::InvalidConfig {
                            message: format!("{}{} must be a whole number of seconds", ENV_PREFIX, name),
                        })
                    })
                })
                .transpose()
        };

        let timeout = Duration::from_secs(seconds("HTTP_TIMEOUT_SECS")?.unwrap_or(DEFAULT_TIMEOUT_SECS));

        let mut builder = OAuth2ConfigBuilder::new()
            .client_id(required("CLIENT_ID")?)
            .client_secret(required("CLIENT_SECRET")?)
            .authorization_endpoint(required("AUTHORIZE_URL")?)
            .token_endpoint(required("TOKEN_URL")?)
            .redirect_uri(required("REDIRECT_URI")?)
            .timeout(timeout);
        if let Some(scope) = var("SCOPE") {
            for s in scope.split_whitespace() {
                builder = builder.add_default_scope(s);
            }
        }
        let oauth = builder.build()?;

        let mut coordinator = CoordinatorConfig::default();
        if let Some(secs) = seconds("REFRESH_THRESHOLD_SECS")? {
            coordinator.refresh_threshold = ChronoDuration::seconds(secs as i64);
        }
        if let Some(secs) = seconds("INVOCATION_BUDGET_SECS")? {
            coordinator.invocation_budget = Duration::from_secs(secs);
        }

        let store = StoreConfig {
            base_url: required("STORE_URL")?,
            secret_name: required("STORE_SECRET")?,
            auth_token: var("STORE_AUTH_TOKEN").map(SecretString::new),
            timeout,
        };
        url::Url::parse(&store.base_url).map_err(|_| {
            OAuth2Error::Configuration(ConfigurationError::InvalidEndpoint {
                url: store.base_url.clone(),
            })
        })?;

        Ok(Self {
            oauth,
            coordinator,
            store,
        })
    }
}

/// Prefix of every environment variable read by [`JobConfig::from_env`].
pub const ENV_PREFIX: &str = "TOKEN_KEEPER_";

/// Default configuration values.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const MIN_TIMEOUT_SECS: u64 = 5;
pub const MAX_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REFRESH_THRESHOLD_SECS: u64 = 300;
