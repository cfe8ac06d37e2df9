//! Error Types
//!
//! Error hierarchy for token lifecycle coordination, with a classification
//! layer that drives retry and re-authorization decisions.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Root error type.
#[derive(Error, Debug)]
pub enum OAuth2Error {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Cancelled: {0}")]
    Cancelled(#[from] CancellationError),
}

/// Failure classes that decide how the coordinator reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient transport or 5xx failure; retried within the attempt budget.
    Network,
    /// Provider or store asked us to slow down; retried with backoff.
    RateLimited,
    /// The provider rejected the credential; human re-authorization required.
    InvalidGrant,
    /// A conditional write lost against a newer version.
    VersionConflict,
    /// A response or stored document could not be understood.
    MalformedResponse,
    /// The authorization code or its session is no longer usable.
    ExpiredAuthorizationCode,
    /// Anything else: misconfiguration, CSRF rejection, cancellation.
    Fatal,
}

impl OAuth2Error {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "TOKEN_CONFIG",
            Self::Authorization(_) => "TOKEN_AUTH",
            Self::Network(_) => "TOKEN_NETWORK",
            Self::Store(_) => "TOKEN_STORE",
            Self::Protocol(_) => "TOKEN_PROTOCOL",
            Self::Provider(_) => "TOKEN_PROVIDER",
            Self::Cancelled(_) => "TOKEN_CANCELLED",
        }
    }

    /// Classify the error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network(NetworkError::RateLimited { .. }) => ErrorClass::RateLimited,
            Self::Network(NetworkError::TlsError { .. }) => ErrorClass::Fatal,
            Self::Network(_) => ErrorClass::Network,

            Self::Provider(ProviderError::InvalidGrant { .. })
            | Self::Provider(ProviderError::InvalidToken { .. }) => ErrorClass::InvalidGrant,
            Self::Provider(ProviderError::ServerError { .. })
            | Self::Provider(ProviderError::TemporarilyUnavailable { .. }) => ErrorClass::Network,
            Self::Provider(_) => ErrorClass::Fatal,

            Self::Store(StoreError::VersionConflict { .. }) => ErrorClass::VersionConflict,
            Self::Store(StoreError::Unavailable { .. }) => ErrorClass::Network,
            Self::Store(StoreError::CorruptedData { .. })
            | Self::Store(StoreError::MissingVersion) => ErrorClass::MalformedResponse,
            Self::Store(_) => ErrorClass::Fatal,

            Self::Protocol(_) => ErrorClass::MalformedResponse,

            Self::Authorization(AuthorizationError::ExpiredAuthorizationCode { .. }) => {
                ErrorClass::ExpiredAuthorizationCode
            }
            Self::Authorization(_) => ErrorClass::Fatal,

            Self::Configuration(_) | Self::Cancelled(_) => ErrorClass::Fatal,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Network | ErrorClass::RateLimited)
    }

    /// Get retry-after duration if applicable.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Network(NetworkError::RateLimited { retry_after }) => *retry_after,
            Self::Provider(ProviderError::TemporarilyUnavailable { retry_after }) => *retry_after,
            _ => None,
        }
    }

    /// Whether the next scheduled invocation would fail the same way.
    ///
    /// Cancellation only means this invocation ran out of time.
    pub fn is_fatal(&self) -> bool {
        matches!(self.class(), ErrorClass::Fatal | ErrorClass::MalformedResponse)
            && !matches!(self, Self::Cancelled(_))
    }

    /// Check if error requires a new authorization-code exchange.
    pub fn needs_reauth(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::InvalidGrant | ErrorClass::ExpiredAuthorizationCode
        )
    }

    /// Whether this is a lost conditional write.
    pub fn is_version_conflict(&self) -> bool {
        self.class() == ErrorClass::VersionConflict
    }
}

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid endpoint URL: {url}")]
    InvalidEndpoint { url: String },
}

/// Authorization-code flow error.
#[derive(Error, Debug)]
pub enum AuthorizationError {
    #[error("Access denied by user")]
    AccessDenied {
        error_description: Option<String>,
        error_uri: Option<String>,
    },

    #[error("State parameter mismatch (possible CSRF attack)")]
    StateMismatch { expected: String, received: String },

    #[error("Authorization code expired or already used")]
    ExpiredAuthorizationCode { message: String },

    #[error("Missing authorization code in callback")]
    MissingCode,

    #[error("Authorization session is not awaiting a callback (phase: {phase})")]
    UnexpectedPhase { phase: String },
}

/// Network/transport error.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("TLS error: {message}")]
    TlsError { message: String },

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
}

/// Protocol/response parsing error.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Unexpected redirect to: {location}")]
    UnexpectedRedirect { location: String },

    #[error("Response too large: {size} bytes")]
    ResponseTooLarge { size: usize },

    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String },

    #[error("Token record violates invariants: {message}")]
    InvalidRecord { message: String },
}

/// Token store error.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Version conflict (expected {expected})")]
    VersionConflict { expected: String },

    #[error("Store unavailable: HTTP {status}")]
    Unavailable { status: u16 },

    #[error("Read failed: {message}")]
    ReadFailed { message: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Corrupted data: {message}")]
    CorruptedData { message: String },

    #[error("Store response carried no version identifier")]
    MissingVersion,

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },
}

/// Provider (OAuth2 server) error.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Invalid client credentials")]
    InvalidClient { error_description: Option<String> },

    #[error("Invalid grant: {message}")]
    InvalidGrant { message: String },

    #[error("Invalid token: {message}")]
    InvalidToken { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Invalid scope: {scope}")]
    InvalidScope { scope: String },

    #[error("Unauthorized client for this grant type")]
    UnauthorizedClient { error_description: Option<String> },

    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType { grant_type: String },

    #[error("Server error: {message}")]
    ServerError { message: String },

    #[error("Server temporarily unavailable")]
    TemporarilyUnavailable { retry_after: Option<Duration> },
}

/// The invocation ran out of time before it could finish safely.
#[derive(Error, Debug)]
pub enum CancellationError {
    #[error("Invocation budget exhausted before {stage}")]
    BudgetExhausted { stage: &'static str },
}

/// Result type for token lifecycle operations.
pub type OAuth2Result<T> = Result<T, OAuth2Error>;

/// OAuth2 error response from provider.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OAuth2ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error_uri: Option<String>,
}

/// Map token error response to error type.
pub fn map_token_error(response: &OAuth2ErrorResponse) -> ProviderError {
    let description = |fallback: &str| {
        response
            .error_description
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    };

    match response.error.as_str() {
        "invalid_client" => ProviderError::InvalidClient {
            error_description: response.error_description.clone(),
        },
        "invalid_grant" => ProviderError::InvalidGrant {
            message: description("Invalid grant"),
        },
        "invalid_token" => ProviderError::InvalidToken {
            message: description("Invalid token"),
        },
        "invalid_request" => ProviderError::InvalidRequest {
            message: description("Invalid request"),
        },
        "invalid_scope" => ProviderError::InvalidScope {
            scope: response.error_description.clone().unwrap_or_default(),
        },
        "unauthorized_client" => ProviderError::UnauthorizedClient {
            error_description: response.error_description.clone(),
        },
        "unsupported_grant_type" => ProviderError::UnsupportedGrantType {
            grant_type: response.error_description.clone().unwrap_or_default(),
        },
        "server_error" => ProviderError::ServerError {
            message: description("Server error"),
        },
        "temporarily_unavailable" => ProviderError::TemporarilyUnavailable { retry_after: None },
        _ => ProviderError::InvalidRequest {
            message: description(&response.error),
        },
    }
}

/// Parse error response from HTTP body.
pub fn parse_error_response(body: &str) -> Option<OAuth2ErrorResponse> {
    serde_json::from_str(body).ok()
}

/// Parse a `Retry-After` header given in seconds.
pub fn parse_retry_after(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Create error from a non-success token endpoint response.
pub fn create_error_from_response(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> OAuth2Error {
    if status == 429 {
        return OAuth2Error::Network(NetworkError::RateLimited {
            retry_after: parse_retry_after(headers),
        });
    }

    if (500..600).contains(&status) {
        return OAuth2Error::Provider(ProviderError::ServerError {
            message: format!("HTTP {}", status),
        });
    }

    if let Some(response) = parse_error_response(body) {
        return OAuth2Error::Provider(map_token_error(&response));
    }

    let error = match status {
        400 => ProviderError::InvalidRequest {
            message: "Bad request".to_string(),
        },
        401 => ProviderError::InvalidClient {
            error_description: Some("Unauthorized".to_string()),
        },
        403 => ProviderError::UnauthorizedClient {
            error_description: Some("Forbidden".to_string()),
        },
        _ => ProviderError::InvalidRequest {
            message: format!("HTTP {}", status),
        },
    };

    OAuth2Error::Provider(error)
}
