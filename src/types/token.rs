//! Token Types
//!
//! Wire responses from the token endpoint and the persisted token record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{OAuth2Error, ProtocolError};

/// Token response from authorization server.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    /// Access token.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Token type (usually "Bearer").
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expires in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Refresh token, when issued or rotated.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Refresh token lifetime in seconds, for providers that announce it.
    #[serde(default)]
    pub refresh_token_expires_in: Option<u64>,
    /// Granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
    /// Additional fields.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Validated token material returned by the token endpoint.
#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub scope: Option<String>,
    pub expires_in: Duration,
    pub refresh_token_expires_in: Option<Duration>,
    /// When the response was received.
    pub received_at: DateTime<Utc>,
}

impl TokenGrant {
    /// Validate a wire response.
    pub fn from_response(
        response: TokenResponse,
        received_at: DateTime<Utc>,
    ) -> Result<Self, OAuth2Error> {
        let access_token = response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| missing_field("access_token"))?;
        let expires_in = response.expires_in.ok_or_else(|| missing_field("expires_in"))?;

        Ok(Self {
            access_token,
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            token_type: response.token_type,
            scope: response.scope,
            expires_in: seconds(expires_in),
            refresh_token_expires_in: response.refresh_token_expires_in.map(seconds),
            received_at,
        })
    }

    /// Build the first record of a fresh credential lineage.
    pub fn into_record(self, refresh_token_lifetime: Duration) -> Result<TokenRecord, OAuth2Error> {
        let issued_at = self.received_at;
        let refresh_token = self
            .refresh_token
            .ok_or_else(|| missing_field("refresh_token"))?;
        let refresh_token_expires_at =
            issued_at + self.refresh_token_expires_in.unwrap_or(refresh_token_lifetime);

        let record = TokenRecord {
            access_token: self.access_token,
            refresh_token,
            token_type: self.token_type,
            scope: self.scope,
            issued_at,
            expires_at: (issued_at + self.expires_in).min(refresh_token_expires_at),
            refresh_token_expires_at,
            last_refresh_at: None,
            refresh_count: 0,
            last_error: None,
            store_version: None,
        };
        record.validate()?;
        Ok(record)
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("received_at", &self.received_at)
            .finish()
    }
}

/// Lifetimes beyond a century are treated as a century.
const MAX_LIFETIME_SECS: u64 = 100 * 365 * 24 * 3600;

fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_LIFETIME_SECS) as i64)
}

fn missing_field(field: &str) -> OAuth2Error {
    OAuth2Error::Protocol(ProtocolError::MissingField {
        field: field.to_string(),
    })
}

/// Opaque version tag assigned by the token store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreVersion(pub String);

impl StoreVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoreVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a record was declared unusable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Token endpoint answered `invalid_grant`.
    InvalidGrant,
    /// Token endpoint answered `invalid_token`.
    InvalidToken,
    /// A real API call rejected the access token.
    ApiRejected,
}

/// Terminal fault annotation persisted on a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFault {
    pub kind: FaultKind,
    pub message: String,
    pub observed_at: DateTime<Utc>,
}

/// The authoritative token record for one credential identity.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub refresh_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<TokenFault>,
    /// Version this record was read at; owned by the store, never serialized.
    #[serde(skip)]
    pub store_version: Option<StoreVersion>,
}

impl TokenRecord {
    /// Build the record that replaces `self` after a successful refresh.
    ///
    /// A refresh token that was not rotated keeps its previous expiry. The
    /// access token expiry is clamped to the refresh token expiry.
    pub fn successor(
        &self,
        grant: TokenGrant,
        refresh_token_lifetime: Duration,
    ) -> Result<TokenRecord, OAuth2Error> {
        let now = grant.received_at;
        let (refresh_token, refresh_token_expires_at) = match grant.refresh_token {
            Some(rotated) => (
                rotated,
                now + grant
                    .refresh_token_expires_in
                    .unwrap_or(refresh_token_lifetime),
            ),
            None => (self.refresh_token.clone(), self.refresh_token_expires_at),
        };

        let record = TokenRecord {
            access_token: grant.access_token,
            refresh_token,
            token_type: grant.token_type,
            scope: grant.scope.or_else(|| self.scope.clone()),
            issued_at: now,
            expires_at: (now + grant.expires_in).min(refresh_token_expires_at),
            refresh_token_expires_at,
            last_refresh_at: Some(now),
            refresh_count: self.refresh_count + 1,
            last_error: None,
            store_version: None,
        };
        record.validate()?;
        Ok(record)
    }

    /// Copy of this record carrying a terminal fault annotation.
    ///
    /// The rejected access token is dropped. The refresh token stays so the
    /// record still identifies the lineage it was annotated on.
    pub fn with_fault(&self, fault: TokenFault) -> TokenRecord {
        TokenRecord {
            access_token: String::new(),
            last_error: Some(fault),
            store_version: None,
            ..self.clone()
        }
    }

    /// Attach the version the store reported for this record.
    pub fn with_version(mut self, version: StoreVersion) -> TokenRecord {
        self.store_version = Some(version);
        self
    }

    /// Check `issued_at <= expires_at <= refresh_token_expires_at` and token presence.
    ///
    /// A faulted record carries no access token.
    pub fn validate(&self) -> Result<(), OAuth2Error> {
        let invalid = |message: &str| {
            Err(OAuth2Error::Protocol(ProtocolError::InvalidRecord {
                message: message.to_string(),
            }))
        };

        if self.refresh_token.is_empty() {
            return invalid("empty refresh token");
        }
        if self.access_token.is_empty() && self.last_error.is_none() {
            return invalid("empty access token");
        }
        if self.issued_at > self.expires_at {
            return invalid("issued_at is after expires_at");
        }
        if self.expires_at > self.refresh_token_expires_at {
            return invalid("expires_at is after refresh_token_expires_at");
        }
        Ok(())
    }

    /// Format as Authorization header value.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("refresh_token_expires_at", &self.refresh_token_expires_at)
            .field("last_refresh_at", &self.last_refresh_at)
            .field("refresh_count", &self.refresh_count)
            .field("last_error", &self.last_error)
            .field("store_version", &self.store_version)
            .finish()
    }
}
