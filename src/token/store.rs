//! Token Store
//!
//! Single-slot versioned storage for the authoritative token record. The
//! version check on `put` is the only coordination between invocations.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use url::Url;

use crate::core::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestHttpTransport};
use crate::error::{parse_retry_after, ConfigurationError, NetworkError, OAuth2Error, StoreError};
use crate::types::{StoreConfig, StoreVersion, TokenRecord};

/// Precondition for a store write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteCondition {
    /// Only if the stored version still equals this one.
    IfVersion(StoreVersion),
    /// Only if no record exists yet.
    IfAbsent,
    /// Overwrite whatever is there.
    Unconditional,
}

impl WriteCondition {
    /// Condition matching the version `record` was read at.
    pub fn matching(record: &TokenRecord) -> Self {
        match &record.store_version {
            Some(version) => Self::IfVersion(version.clone()),
            None => Self::IfAbsent,
        }
    }
}

impl std::fmt::Display for WriteCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IfVersion(version) => write!(f, "version {}", version),
            Self::IfAbsent => f.write_str("absent"),
            Self::Unconditional => f.write_str("any"),
        }
    }
}

/// Token store interface.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Read the current record with its `store_version` set.
    async fn get(&self) -> Result<Option<TokenRecord>, OAuth2Error>;

    /// Write `record` if `condition` holds and return the new version.
    ///
    /// A failed precondition is `StoreError::VersionConflict`.
    async fn put(
        &self,
        record: &TokenRecord,
        condition: WriteCondition,
    ) -> Result<StoreVersion, OAuth2Error>;
}

fn conflict(condition: &WriteCondition) -> OAuth2Error {
    OAuth2Error::Store(StoreError::VersionConflict {
        expected: condition.to_string(),
    })
}

#[derive(Default)]
struct Slot {
    record: Option<TokenRecord>,
    version: u64,
}

/// In-memory token store with a monotonically increasing version counter.
#[derive(Default)]
pub struct InMemoryTokenStore {
    slot: Mutex<Slot>,
    history: Mutex<Vec<TokenRecord>>,
}

impl InMemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `record` at version 1.
    pub fn with_record(record: TokenRecord) -> Self {
        let store = Self::new();
        {
            let mut slot = store.lock_slot();
            slot.record = Some(TokenRecord {
                store_version: None,
                ..record
            });
            slot.version = 1;
        }
        store
    }

    /// Current record without going through the async interface.
    pub fn current(&self) -> Option<TokenRecord> {
        let slot = self.lock_slot();
        slot.record
            .clone()
            .map(|r| r.with_version(Self::version_tag(slot.version)))
    }

    /// Every record successfully written through `put`, oldest first.
    pub fn history(&self) -> Vec<TokenRecord> {
        self.lock_history().clone()
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.lock_history().len()
    }

    fn version_tag(version: u64) -> StoreVersion {
        StoreVersion::new(version.to_string())
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, Vec<TokenRecord>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self) -> Result<Option<TokenRecord>, OAuth2Error> {
        Ok(self.current())
    }

    async fn put(
        &self,
        record: &TokenRecord,
        condition: WriteCondition,
    ) -> Result<StoreVersion, OAuth2Error> {
        record.validate()?;

        let mut slot = self.lock_slot();
        let holds = match &condition {
            WriteCondition::IfVersion(expected) => {
                slot.record.is_some() && Self::version_tag(slot.version) == *expected
            }
            WriteCondition::IfAbsent => slot.record.is_none(),
            WriteCondition::Unconditional => true,
        };
        if !holds {
            return Err(conflict(&condition));
        }

        let stored = TokenRecord {
            store_version: None,
            ..record.clone()
        };
        slot.version += 1;
        slot.record = Some(stored.clone());
        let version = Self::version_tag(slot.version);
        drop(slot);

        self.lock_history().push(stored);
        Ok(version)
    }
}

/// Remote versioned secret store over HTTP.
///
/// `GET {base}/{secret}` returns the record JSON with its version in `ETag`;
/// `PUT` carries `If-Match` or `If-None-Match: *`.
pub struct HttpSecretStore<T: HttpTransport = ReqwestHttpTransport> {
    config: StoreConfig,
    secret_url: String,
    transport: Arc<T>,
}

impl HttpSecretStore<ReqwestHttpTransport> {
    /// Create a store over a reqwest transport.
    pub fn new(config: StoreConfig) -> Result<Self, OAuth2Error> {
        let transport = ReqwestHttpTransport::with_options(
            config.timeout,
            crate::core::DEFAULT_MAX_RESPONSE_SIZE,
        )?;
        Self::with_transport(config, Arc::new(transport))
    }
}

impl<T: HttpTransport> HttpSecretStore<T> {
    /// Create a store over a custom transport.
    pub fn with_transport(config: StoreConfig, transport: Arc<T>) -> Result<Self, OAuth2Error> {
        let invalid = || {
            OAuth2Error::Configuration(ConfigurationError::InvalidEndpoint {
                url: config.base_url.clone(),
            })
        };
        let mut url = Url::parse(&config.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .push(&config.secret_name);

        Ok(Self {
            secret_url: url.into(),
            config,
            transport,
        })
    }

    /// URL of the secret holding the record.
    pub fn secret_url(&self) -> &str {
        &self.secret_url
    }

    fn headers(&self) -> HashMap<String, String> {
        use secrecy::ExposeSecret;

        let mut headers = HashMap::new();
        headers.insert("accept".to_string(), "application/json".to_string());
        if let Some(token) = &self.config.auth_token {
            headers.insert(
                "authorization".to_string(),
                format!("Bearer {}", token.expose_secret()),
            );
        }
        headers
    }

    fn version_of(response: &HttpResponse) -> Result<StoreVersion, OAuth2Error> {
        response
            .header("etag")
            .filter(|v| !v.is_empty())
            .map(StoreVersion::new)
            .ok_or_else(|| OAuth2Error::Store(StoreError::MissingVersion))
    }

    fn status_error(response: &HttpResponse, writing: bool) -> OAuth2Error {
        match response.status {
            401 | 403 => OAuth2Error::Store(StoreError::PermissionDenied {
                message: format!("secret store returned HTTP {}", response.status),
            }),
            429 => OAuth2Error::Network(NetworkError::RateLimited {
                retry_after: parse_retry_after(&response.headers),
            }),
            status @ 500..=599 => OAuth2Error::Store(StoreError::Unavailable { status }),
            status if writing => OAuth2Error::Store(StoreError::WriteFailed {
                message: format!("HTTP {}", status),
            }),
            status => OAuth2Error::Store(StoreError::ReadFailed {
                message: format!("HTTP {}", status),
            }),
        }
    }
}

#[async_trait]
impl<T: HttpTransport> TokenStore for HttpSecretStore<T> {
    async fn get(&self) -> Result<Option<TokenRecord>, OAuth2Error> {
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: self.secret_url.clone(),
            headers: self.headers(),
            body: None,
            timeout: Some(self.config.timeout),
        };

        let response = self.transport.send(request).await?;
        if response.status == 404 {
            debug!(secret = %self.config.secret_name, "no token record stored");
            return Ok(None);
        }
        if !response.is_success() {
            return Err(Self::status_error(&response, false));
        }

        let version = Self::version_of(&response)?;
        let record: TokenRecord = serde_json::from_str(&response.body).map_err(|e| {
            OAuth2Error::Store(StoreError::CorruptedData {
                message: e.to_string(),
            })
        })?;

        Ok(Some(record.with_version(version)))
    }

    async fn put(
        &self,
        record: &TokenRecord,
        condition: WriteCondition,
    ) -> Result<StoreVersion, OAuth2Error> {
        record.validate()?;

        let body = serde_json::to_string(record).map_err(|e| {
            OAuth2Error::Store(StoreError::WriteFailed {
                message: e.to_string(),
            })
        })?;

        let mut headers = self.headers();
        headers.insert("content-type".to_string(), "application/json".to_string());
        match &condition {
            WriteCondition::IfVersion(version) => {
                headers.insert("if-match".to_string(), version.to_string());
            }
            WriteCondition::IfAbsent => {
                headers.insert("if-none-match".to_string(), "*".to_string());
            }
            WriteCondition::Unconditional => {}
        }

        let request = HttpRequest {
            method: HttpMethod::Put,
            url: self.secret_url.clone(),
            headers,
            body: Some(body),
            timeout: Some(self.config.timeout),
        };

        let response = self.transport.send(request).await?;
        match response.status {
            409 | 412 => {
                warn!(condition = %condition, "secret store rejected conditional write");
                Err(conflict(&condition))
            }
            _ if response.is_success() => Self::version_of(&response),
            _ => Err(Self::status_error(&response, true)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MockHttpTransport;
    use crate::error::ErrorClass;
    use chrono::{Duration, Utc};
    use secrecy::SecretString;

    fn record() -> TokenRecord {
        let now = Utc::now();
        TokenRecord {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            token_type: "Bearer".to_string(),
            scope: Some("readonly".to_string()),
            issued_at: now,
            expires_at: now + Duration::minutes(30),
            refresh_token_expires_at: now + Duration::days(7),
            last_refresh_at: None,
            refresh_count: 0,
            last_error: None,
            store_version: None,
        }
    }

    #[tokio::test]
    async fn test_in_memory_version_check() {
        let store = InMemoryTokenStore::new();
        assert!(store.get().await.unwrap().is_none());

        let v1 = store.put(&record(), WriteCondition::IfAbsent).await.unwrap();
        let read = store.get().await.unwrap().unwrap();
        assert_eq!(read.store_version.as_ref(), Some(&v1));

        let err = store
            .put(&record(), WriteCondition::IfAbsent)
            .await
            .unwrap_err();
        assert!(err.is_version_conflict());

        let v2 = store
            .put(&read, WriteCondition::matching(&read))
            .await
            .unwrap();
        assert_ne!(v1, v2);

        // The version read before v2 is stale now.
        let err = store
            .put(&read, WriteCondition::IfVersion(v1))
            .await
            .unwrap_err();
        assert!(err.is_version_conflict());
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_rejects_invalid_record() {
        let store = InMemoryTokenStore::new();
        let mut bad = record();
        bad.expires_at = bad.refresh_token_expires_at + Duration::seconds(1);

        let err = store
            .put(&bad, WriteCondition::Unconditional)
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::MalformedResponse);
        assert!(store.current().is_none());
    }

    #[tokio::test]
    async fn test_seeded_store_starts_at_version_one() {
        let store = InMemoryTokenStore::with_record(record());
        let read = store.get().await.unwrap().unwrap();
        assert_eq!(read.store_version, Some(StoreVersion::new("1")));
        assert_eq!(store.write_count(), 0);
    }

    fn http_store(transport: Arc<MockHttpTransport>) -> HttpSecretStore<MockHttpTransport> {
        HttpSecretStore::with_transport(
            StoreConfig {
                base_url: "https://secrets.example.com/v1/secrets/".to_string(),
                secret_name: "brokerage-token".to_string(),
                auth_token: Some(SecretString::new("store-token".to_string())),
                timeout: std::time::Duration::from_secs(5),
            },
            transport,
        )
        .unwrap()
    }

    fn response(status: u16, etag: Option<&str>, body: String) -> HttpResponse {
        HttpResponse {
            status,
            headers: etag
                .map(|e| ("etag".to_string(), e.to_string()))
                .into_iter()
                .collect(),
            body,
        }
    }

    #[tokio::test]
    async fn test_http_get_reads_etag() {
        let transport = Arc::new(MockHttpTransport::new());
        let stored = record();
        transport.queue_response(response(
            200,
            Some("\"7\""),
            serde_json::to_string(&stored).unwrap(),
        ));
        let store = http_store(transport.clone());

        let read = store.get().await.unwrap().unwrap();
        assert_eq!(read.store_version, Some(StoreVersion::new("\"7\"")));
        assert_eq!(read.access_token, stored.access_token);

        let request = transport.get_last_request().unwrap();
        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.url, "https://secrets.example.com/v1/secrets/brokerage-token");
        assert_eq!(request.headers["authorization"], "Bearer store-token");
    }

    #[tokio::test]
    async fn test_http_get_status_mapping() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_response(response(404, None, String::new()));
        transport.queue_response(response(503, None, String::new()));
        transport.queue_response(response(200, None, "{}".to_string()));
        transport.queue_response(response(200, Some("1"), "not json".to_string()));
        let store = http_store(transport);

        assert!(store.get().await.unwrap().is_none());
        assert!(store.get().await.unwrap_err().is_retryable());
        assert!(matches!(
            store.get().await.unwrap_err(),
            OAuth2Error::Store(StoreError::MissingVersion)
        ));
        assert_eq!(
            store.get().await.unwrap_err().class(),
            ErrorClass::MalformedResponse
        );
    }

    #[tokio::test]
    async fn test_http_put_sends_precondition() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_response(response(200, Some("\"8\""), String::new()));
        transport.queue_response(response(412, None, String::new()));
        transport.queue_response(response(201, Some("\"1\""), String::new()));
        let store = http_store(transport.clone());
        let read = record().with_version(StoreVersion::new("\"7\""));

        let version = store.put(&read, WriteCondition::matching(&read)).await.unwrap();
        assert_eq!(version, StoreVersion::new("\"8\""));
        let request = transport.get_last_request().unwrap();
        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(request.headers["if-match"], "\"7\"");
        let body: serde_json::Value = serde_json::from_str(&request.body.unwrap()).unwrap();
        assert!(body.get("store_version").is_none());

        let err = store.put(&read, WriteCondition::matching(&read)).await.unwrap_err();
        assert!(err.is_version_conflict());

        store.put(&record(), WriteCondition::IfAbsent).await.unwrap();
        let request = transport.get_last_request().unwrap();
        assert_eq!(request.headers["if-none-match"], "*");
        assert!(!request.headers.contains_key("if-match"));
    }
}
