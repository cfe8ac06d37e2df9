//! Re-authorization Flow
//!
//! Human-driven authorization-code grant that starts a fresh credential
//! lineage. A session moves `Created -> AwaitingCallback -> Exchanged ->
//! Persisted` and is consumed by [`ReauthorizationFlow::complete`], so an
//! expired or rejected session cannot be retried.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::client::OAuthClient;
use crate::core::generate_state_nonce;
use crate::error::{AuthorizationError, OAuth2Error, ProtocolError};
use crate::telemetry::{NoOpMetrics, RefreshMetrics};
use crate::token::{TokenStore, WriteCondition};
use crate::types::{
    AuthorizationSession, CallbackParams, CoordinatorConfig, SessionPhase, TokenRecord,
};

pub struct ReauthorizationFlow<C: OAuthClient, S: TokenStore> {
    client: Arc<C>,
    store: Arc<S>,
    redirect_uri: String,
    session_ttl: Duration,
    refresh_token_lifetime: Duration,
    metrics: Arc<dyn RefreshMetrics>,
}

impl<C: OAuthClient, S: TokenStore> ReauthorizationFlow<C, S> {
    pub fn new(
        client: Arc<C>,
        store: Arc<S>,
        redirect_uri: impl Into<String>,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            client,
            store,
            redirect_uri: redirect_uri.into(),
            session_ttl: config.session_ttl,
            refresh_token_lifetime: config.refresh_token_lifetime,
            metrics: Arc::new(NoOpMetrics),
        }
    }

    /// Set metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn RefreshMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Start a session and return it with the URL the human must open.
    pub fn begin(&self) -> Result<(AuthorizationSession, String), OAuth2Error> {
        let mut session = AuthorizationSession::new(
            generate_state_nonce(),
            self.redirect_uri.clone(),
            Utc::now(),
            self.session_ttl,
        );
        let url = self.client.build_authorization_url(&session.state_nonce)?;
        session.phase = SessionPhase::AwaitingCallback;

        info!(expires_at = %session.expires_at, "authorization session started");
        Ok((session, url))
    }

    /// Complete a session from the full redirect URL the browser landed on.
    pub async fn complete_from_redirect(
        &self,
        session: AuthorizationSession,
        redirect_url: &str,
    ) -> Result<TokenRecord, OAuth2Error> {
        let callback = CallbackParams::from_url_str(redirect_url).map_err(|e| {
            OAuth2Error::Protocol(ProtocolError::InvalidResponse {
                message: format!("invalid redirect URL: {}", e),
            })
        })?;
        self.complete(session, callback).await
    }

    /// Validate the callback, exchange the code and persist the new record.
    pub async fn complete(
        &self,
        mut session: AuthorizationSession,
        callback: CallbackParams,
    ) -> Result<TokenRecord, OAuth2Error> {
        if session.phase != SessionPhase::AwaitingCallback {
            return Err(OAuth2Error::Authorization(
                AuthorizationError::UnexpectedPhase {
                    phase: session.phase.to_string(),
                },
            ));
        }

        if callback.is_error() {
            warn!(error = ?callback.error, "provider returned an error on the callback");
            return Err(OAuth2Error::Authorization(AuthorizationError::AccessDenied {
                error_description: callback.error_description,
                error_uri: callback.error_uri,
            }));
        }

        let received = callback.state.unwrap_or_default();
        if !session.state_matches(&received) {
            warn!("callback state does not match the session nonce");
            return Err(OAuth2Error::Authorization(AuthorizationError::StateMismatch {
                expected: session.state_nonce,
                received,
            }));
        }

        if session.is_expired(Utc::now()) {
            warn!(expires_at = %session.expires_at, "authorization session expired");
            return Err(OAuth2Error::Authorization(
                AuthorizationError::ExpiredAuthorizationCode {
                    message: "authorization session expired before the callback".to_string(),
                },
            ));
        }

        let code = callback
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| OAuth2Error::Authorization(AuthorizationError::MissingCode))?;

        let grant = self
            .client
            .exchange_code(&code, &session.redirect_uri)
            .await?;
        session.phase = SessionPhase::Exchanged;

        let record = grant.into_record(self.refresh_token_lifetime)?;
        // Fresh lineage: there is no prior version to race against.
        let version = self.store.put(&record, WriteCondition::Unconditional).await?;
        session.phase = SessionPhase::Persisted;

        self.metrics.record_reauthorization_completed();
        info!(
            phase = %session.phase,
            version = %version,
            expires_at = %record.expires_at,
            "stored token from authorization-code exchange"
        );
        Ok(record.with_version(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockOAuthClient;
    use crate::error::ErrorClass;
    use crate::token::InMemoryTokenStore;
    use crate::types::{FaultKind, TokenFault, TokenGrant};

    const REDIRECT: &str = "https://127.0.0.1:8182/callback";

    fn grant() -> TokenGrant {
        TokenGrant {
            access_token: "at-1".to_string(),
            refresh_token: Some("rt-1".to_string()),
            token_type: "Bearer".to_string(),
            scope: Some("readonly".to_string()),
            expires_in: Duration::minutes(30),
            refresh_token_expires_in: Some(Duration::days(7)),
            received_at: Utc::now(),
        }
    }

    fn client_with_url() -> MockOAuthClient {
        let mut client = MockOAuthClient::new();
        client
            .expect_build_authorization_url()
            .returning(|nonce| Ok(format!("https://broker.example.com/authorize?state={}", nonce)));
        client
    }

    fn flow(
        client: MockOAuthClient,
        store: Arc<InMemoryTokenStore>,
    ) -> ReauthorizationFlow<MockOAuthClient, InMemoryTokenStore> {
        ReauthorizationFlow::new(Arc::new(client), store, REDIRECT, &CoordinatorConfig::default())
    }

    fn callback(code: &str, state: &str) -> CallbackParams {
        CallbackParams {
            code: Some(code.to_string()),
            state: Some(state.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_begin_awaits_callback() {
        let flow = flow(client_with_url(), Arc::new(InMemoryTokenStore::new()));

        let (session, url) = flow.begin().unwrap();
        assert_eq!(session.phase, SessionPhase::AwaitingCallback);
        assert_eq!(session.redirect_uri, REDIRECT);
        assert_eq!(session.expires_at - session.created_at, Duration::seconds(60));
        assert!(url.ends_with(&session.state_nonce));
    }

    #[tokio::test]
    async fn test_successful_exchange_persists_new_lineage() {
        let mut client = client_with_url();
        client
            .expect_exchange_code()
            .withf(|code: &str, redirect_uri: &str| code == "C0.code@" && redirect_uri == REDIRECT)
            .times(1)
            .returning(|_, _| Ok(grant()));

        // An invalidated record is replaced regardless of its version.
        let now = Utc::now();
        let old = TokenRecord {
            access_token: "old".to_string(),
            refresh_token: "old".to_string(),
            token_type: "Bearer".to_string(),
            scope: None,
            issued_at: now - Duration::days(8),
            expires_at: now - Duration::days(8),
            refresh_token_expires_at: now - Duration::days(1),
            last_refresh_at: None,
            refresh_count: 40,
            last_error: Some(TokenFault {
                kind: FaultKind::InvalidGrant,
                message: "revoked".to_string(),
                observed_at: now,
            }),
            store_version: None,
        };
        let store = Arc::new(InMemoryTokenStore::with_record(old));
        let flow = flow(client, store.clone());

        let (session, _) = flow.begin().unwrap();
        let nonce = session.state_nonce.clone();
        let record = flow
            .complete(session, callback("C0.code@", &nonce))
            .await
            .unwrap();

        assert_eq!(record.refresh_count, 0);
        assert!(record.last_error.is_none());
        assert_eq!(record.refresh_token_expires_at - record.issued_at, Duration::days(7));
        assert_eq!(store.current().unwrap().access_token, "at-1");
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_state_mismatch_never_exchanges() {
        let mut client = client_with_url();
        client.expect_exchange_code().times(0);
        let store = Arc::new(InMemoryTokenStore::new());
        let flow = flow(client, store.clone());

        let (session, _) = flow.begin().unwrap();
        let err = flow
            .complete(session, callback("code", "forged-state"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OAuth2Error::Authorization(AuthorizationError::StateMismatch { .. })
        ));
        assert!(store.current().is_none());
    }

    #[tokio::test]
    async fn test_expired_session_fails_without_network() {
        let mut client = client_with_url();
        client.expect_exchange_code().times(0);
        let flow = flow(client, Arc::new(InMemoryTokenStore::new()));

        let (mut session, _) = flow.begin().unwrap();
        session.expires_at = Utc::now() - Duration::seconds(1);
        let nonce = session.state_nonce.clone();

        let err = flow
            .complete(session, callback("code", &nonce))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::ExpiredAuthorizationCode);
    }

    #[tokio::test]
    async fn test_provider_error_on_callback() {
        let mut client = client_with_url();
        client.expect_exchange_code().times(0);
        let flow = flow(client, Arc::new(InMemoryTokenStore::new()));

        let (session, _) = flow.begin().unwrap();
        let redirect = format!(
            "{}?error=access_denied&error_description=user%20cancelled&state={}",
            REDIRECT, session.state_nonce
        );

        let err = flow
            .complete_from_redirect(session, &redirect)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OAuth2Error::Authorization(AuthorizationError::AccessDenied {
                error_description: Some(ref d),
                ..
            }) if d == "user cancelled"
        ));
    }

    #[tokio::test]
    async fn test_session_must_be_awaiting_callback() {
        let mut client = MockOAuthClient::new();
        client.expect_exchange_code().times(0);
        let flow = flow(client, Arc::new(InMemoryTokenStore::new()));
        let session = AuthorizationSession::new(
            "nonce".to_string(),
            REDIRECT.to_string(),
            Utc::now(),
            Duration::seconds(60),
        );

        let err = flow
            .complete(session, callback("code", "nonce"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OAuth2Error::Authorization(AuthorizationError::UnexpectedPhase { .. })
        ));
    }
}
