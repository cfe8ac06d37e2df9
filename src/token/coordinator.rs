//! Refresh Coordinator
//!
//! Turns whatever the store holds into a usable token, refreshing at most
//! once per invocation. Concurrent invocations coordinate only through the
//! store version: whoever loses the conditional write adopts the winner's
//! record instead of refreshing again.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::OAuthClient;
use crate::error::{CancellationError, OAuth2Error, ProviderError, StoreError};
use crate::resilience::{Deadline, OAuth2RetryExecutor};
use crate::telemetry::{NoOpMetrics, RefreshMetrics};
use crate::token::state::{ApiOutcome, TokenState, TokenStateMachine};
use crate::token::store::{TokenStore, WriteCondition};
use crate::types::{CoordinatorConfig, FaultKind, TokenFault, TokenRecord};

/// Why a human has to run the authorization-code flow again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReauthorizationReason {
    /// No record has ever been stored.
    NoRecord,
    /// The refresh token itself has expired.
    RefreshTokenExpired,
    /// The stored record carries a fault annotation.
    Invalid { message: String },
    /// The provider rejected the refresh token during this invocation.
    RefreshRejected { message: String },
}

impl ReauthorizationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoRecord => "no_record",
            Self::RefreshTokenExpired => "refresh_token_expired",
            Self::Invalid { .. } => "invalid",
            Self::RefreshRejected { .. } => "refresh_rejected",
        }
    }
}

impl std::fmt::Display for ReauthorizationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid { message } | Self::RefreshRejected { message } => {
                write!(f, "{}: {}", self.as_str(), message)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Result of one coordination attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenOutcome {
    /// The stored token was valid; nothing was written.
    Unchanged(TokenRecord),
    /// This invocation refreshed and wrote the record.
    Refreshed(TokenRecord),
    /// A concurrent invocation refreshed first; its record was adopted.
    RefreshedByPeer(TokenRecord),
    /// No usable token without human action.
    RequiresReauthorization(ReauthorizationReason),
}

impl TokenOutcome {
    /// The usable record, if any.
    pub fn record(&self) -> Option<&TokenRecord> {
        match self {
            Self::Unchanged(r) | Self::Refreshed(r) | Self::RefreshedByPeer(r) => Some(r),
            Self::RequiresReauthorization(_) => None,
        }
    }

    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, Self::RequiresReauthorization(_))
    }
}

/// Coordinates reads, refreshes and conditional writes of the token record.
pub struct RefreshCoordinator<C: OAuthClient, S: TokenStore> {
    client: Arc<C>,
    store: Arc<S>,
    config: CoordinatorConfig,
    state_machine: TokenStateMachine,
    metrics: Arc<dyn RefreshMetrics>,
}

impl<C: OAuthClient, S: TokenStore> RefreshCoordinator<C, S> {
    pub fn new(client: Arc<C>, store: Arc<S>, config: CoordinatorConfig) -> Self {
        Self {
            client,
            store,
            state_machine: TokenStateMachine::new(config.refresh_threshold),
            config,
            metrics: Arc::new(NoOpMetrics),
        }
    }

    /// Set metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn RefreshMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Obtain a usable token within the configured invocation budget.
    pub async fn obtain_usable_token(&self) -> Result<TokenOutcome, OAuth2Error> {
        self.obtain_usable_token_within(&Deadline::after(self.config.invocation_budget))
            .await
    }

    /// Obtain a usable token before `deadline`.
    pub async fn obtain_usable_token_within(
        &self,
        deadline: &Deadline,
    ) -> Result<TokenOutcome, OAuth2Error> {
        let retry = OAuth2RetryExecutor::new(self.config.retry.clone());
        self.obtain_with(&retry, deadline).await
    }

    /// Obtain a usable token, running every retried call through `retry`.
    pub async fn obtain_with(
        &self,
        retry: &OAuth2RetryExecutor,
        deadline: &Deadline,
    ) -> Result<TokenOutcome, OAuth2Error> {
        let Some(record) = self.read(retry, deadline).await? else {
            self.metrics.record_state(TokenState::Uninitialized.as_str());
            return Ok(self.requires(ReauthorizationReason::NoRecord));
        };

        let state = self
            .state_machine
            .evaluate(Some(&record), Utc::now(), &ApiOutcome::NotObserved);
        self.metrics.record_state(state.as_str());
        info!(
            state = %state,
            refresh_count = record.refresh_count,
            expires_at = %record.expires_at,
            "evaluated stored token"
        );

        match state {
            TokenState::Valid => Ok(TokenOutcome::Unchanged(record)),
            TokenState::ExpiringSoon | TokenState::ExpiredRefreshable => {
                self.refresh(record, retry, deadline).await
            }
            TokenState::ExpiredUnrefreshable => {
                Ok(self.requires(ReauthorizationReason::RefreshTokenExpired))
            }
            TokenState::Invalid => Ok(self.requires(invalid_reason(&record))),
            TokenState::Uninitialized => Ok(self.requires(ReauthorizationReason::NoRecord)),
        }
    }

    /// Record that a real API call rejected the access token in `used`.
    ///
    /// The rejection is treated as authoritative for that record only. The
    /// annotation is conditioned on the version `used` was read at, so a
    /// record a peer stored since then is returned untouched.
    pub async fn record_api_rejection(
        &self,
        used: &TokenRecord,
        reason: &str,
    ) -> Result<TokenOutcome, OAuth2Error> {
        let Some(version) = used.store_version.clone() else {
            return Err(OAuth2Error::Store(StoreError::MissingVersion));
        };
        if used.last_error.is_some() {
            return Ok(self.requires(invalid_reason(used)));
        }

        let deadline = Deadline::after(self.config.invocation_budget);
        let retry = OAuth2RetryExecutor::new(self.config.retry.clone());

        let outcome = ApiOutcome::Rejected {
            reason: reason.to_string(),
        };
        let state = self.state_machine.evaluate(Some(used), Utc::now(), &outcome);
        warn!(state = %state, version = %version, reason, "API rejected the access token");

        self.ensure_write_budget(&deadline, "rejection annotation")?;
        let annotated = used.with_fault(TokenFault {
            kind: FaultKind::ApiRejected,
            message: reason.to_string(),
            observed_at: Utc::now(),
        });

        match self
            .store
            .put(&annotated, WriteCondition::IfVersion(version))
            .await
        {
            Ok(version) => {
                debug!(version = %version, "annotated token record as invalid");
                Ok(self.requires(ReauthorizationReason::Invalid {
                    message: reason.to_string(),
                }))
            }
            Err(error) if error.is_version_conflict() => {
                self.metrics.record_version_conflict();
                info!("rejected token was already replaced, leaving the stored record as is");
                let (current, state) = self.reread(&retry, &deadline).await?;
                self.peer_outcome(current, state).ok_or(error)
            }
            Err(error) => {
                self.metrics.record_error(error.error_code());
                Err(error)
            }
        }
    }

    /// Current record and its state, without contacting the provider.
    pub async fn inspect(&self) -> Result<(Option<TokenRecord>, TokenState), OAuth2Error> {
        let deadline = Deadline::after(self.config.invocation_budget);
        let retry = OAuth2RetryExecutor::new(self.config.retry.clone());
        let record = self.read(&retry, &deadline).await?;
        let state = self
            .state_machine
            .evaluate(record.as_ref(), Utc::now(), &ApiOutcome::NotObserved);
        Ok((record, state))
    }

    async fn read(
        &self,
        retry: &OAuth2RetryExecutor,
        deadline: &Deadline,
    ) -> Result<Option<TokenRecord>, OAuth2Error> {
        let store = &self.store;
        retry
            .execute("store read", deadline, move || store.get())
            .await
    }

    async fn refresh(
        &self,
        record: TokenRecord,
        retry: &OAuth2RetryExecutor,
        deadline: &Deadline,
    ) -> Result<TokenOutcome, OAuth2Error> {
        self.metrics.record_refresh_attempt();
        let client = &self.client;
        let refresh_token = record.refresh_token.as_str();

        let grant = match retry
            .execute("refresh", deadline, move || client.refresh(refresh_token))
            .await
        {
            Ok(grant) => grant,
            Err(error) if error.needs_reauth() => {
                self.metrics.record_refresh(false);
                warn!(error = %error, "provider rejected the refresh token");
                let fault = TokenFault {
                    kind: fault_kind(&error),
                    message: error.to_string(),
                    observed_at: Utc::now(),
                };
                let reason = ReauthorizationReason::RefreshRejected {
                    message: error.to_string(),
                };
                return self.annotate(&record, fault, reason, retry, deadline).await;
            }
            Err(error) => {
                self.metrics.record_refresh(false);
                self.metrics.record_error(error.error_code());
                warn!(error = %error, retryable = error.is_retryable(), "refresh failed");
                return Err(error);
            }
        };

        let next = record.successor(grant, self.config.refresh_token_lifetime)?;
        self.ensure_write_budget(deadline, "refresh write")?;

        match self.store.put(&next, WriteCondition::matching(&record)).await {
            Ok(version) => {
                self.metrics.record_refresh(true);
                info!(
                    refresh_count = next.refresh_count,
                    version = %version,
                    expires_at = %next.expires_at,
                    "refreshed token"
                );
                Ok(TokenOutcome::Refreshed(next.with_version(version)))
            }
            Err(error) if error.is_version_conflict() => {
                self.metrics.record_version_conflict();
                info!("lost refresh race, adopting the stored record");
                let (current, state) = self.reread(retry, deadline).await?;
                match current {
                    Some(annotated) if rejected_predecessor(&record, &annotated) => {
                        self.replace_stale_fault(next, &annotated, retry, deadline)
                            .await
                    }
                    current => self.peer_outcome(current, state).ok_or(error),
                }
            }
            Err(error) => {
                self.metrics.record_refresh(false);
                self.metrics.record_error(error.error_code());
                Err(error)
            }
        }
    }

    /// A peer annotated our base record after its refresh token was rotated
    /// by this invocation. Store the rotated grant over that annotation once.
    async fn replace_stale_fault(
        &self,
        next: TokenRecord,
        annotated: &TokenRecord,
        retry: &OAuth2RetryExecutor,
        deadline: &Deadline,
    ) -> Result<TokenOutcome, OAuth2Error> {
        warn!(
            refresh_count = annotated.refresh_count,
            "stored fault is from the refresh token this invocation rotated, replacing it"
        );
        self.ensure_write_budget(deadline, "refresh write")?;

        match self.store.put(&next, WriteCondition::matching(annotated)).await {
            Ok(version) => {
                self.metrics.record_refresh(true);
                info!(
                    refresh_count = next.refresh_count,
                    version = %version,
                    "refreshed token"
                );
                Ok(TokenOutcome::Refreshed(next.with_version(version)))
            }
            Err(error) if error.is_version_conflict() => {
                self.metrics.record_version_conflict();
                let (current, state) = self.reread(retry, deadline).await?;
                self.peer_outcome(current, state).ok_or(error)
            }
            Err(error) => {
                self.metrics.record_refresh(false);
                self.metrics.record_error(error.error_code());
                Err(error)
            }
        }
    }

    /// Persist a fault annotation conditioned on the version `record` was read at.
    async fn annotate(
        &self,
        record: &TokenRecord,
        fault: TokenFault,
        reason: ReauthorizationReason,
        retry: &OAuth2RetryExecutor,
        deadline: &Deadline,
    ) -> Result<TokenOutcome, OAuth2Error> {
        if self.ensure_write_budget(deadline, "fault annotation").is_err() {
            return Ok(self.requires(reason));
        }

        let annotated = record.with_fault(fault);
        match self
            .store
            .put(&annotated, WriteCondition::matching(record))
            .await
        {
            Ok(version) => {
                debug!(version = %version, "annotated token record as invalid");
                Ok(self.requires(reason))
            }
            Err(error) if error.is_version_conflict() => {
                self.metrics.record_version_conflict();
                let (current, state) = self.reread(retry, deadline).await?;
                match self.peer_outcome(current, state) {
                    Some(outcome) => Ok(outcome),
                    None => Ok(self.requires(reason)),
                }
            }
            Err(error) => {
                warn!(error = %error, "failed to persist fault annotation");
                self.metrics.record_error(error.error_code());
                Ok(self.requires(reason))
            }
        }
    }

    /// Re-read once after a lost write. Never refreshes.
    async fn reread(
        &self,
        retry: &OAuth2RetryExecutor,
        deadline: &Deadline,
    ) -> Result<(Option<TokenRecord>, TokenState), OAuth2Error> {
        let current = self.read(retry, deadline).await?;
        let state = self
            .state_machine
            .evaluate(current.as_ref(), Utc::now(), &ApiOutcome::NotObserved);
        debug!(state = %state, "re-read after version conflict");
        Ok((current, state))
    }

    /// What a re-read record means for this invocation. `None` when the
    /// record is neither usable nor terminal.
    fn peer_outcome(
        &self,
        current: Option<TokenRecord>,
        state: TokenState,
    ) -> Option<TokenOutcome> {
        match current {
            Some(peer) if state.is_usable() => Some(TokenOutcome::RefreshedByPeer(peer)),
            Some(peer) if state == TokenState::Invalid => {
                Some(self.requires(invalid_reason(&peer)))
            }
            Some(_) if state == TokenState::ExpiredUnrefreshable => {
                Some(self.requires(ReauthorizationReason::RefreshTokenExpired))
            }
            None => Some(self.requires(ReauthorizationReason::NoRecord)),
            Some(_) => None,
        }
    }

    fn ensure_write_budget(
        &self,
        deadline: &Deadline,
        stage: &'static str,
    ) -> Result<(), OAuth2Error> {
        if deadline.has_at_least(self.config.write_guard) {
            return Ok(());
        }
        warn!(
            stage,
            remaining = ?deadline.remaining(),
            "invocation budget nearly exhausted, skipping store write"
        );
        self.metrics.record_error("TOKEN_CANCELLED");
        Err(OAuth2Error::Cancelled(CancellationError::BudgetExhausted {
            stage,
        }))
    }

    fn requires(&self, reason: ReauthorizationReason) -> TokenOutcome {
        warn!(reason = %reason, "re-authorization required");
        self.metrics.record_reauthorization_required(reason.as_str());
        TokenOutcome::RequiresReauthorization(reason)
    }
}

fn invalid_reason(record: &TokenRecord) -> ReauthorizationReason {
    ReauthorizationReason::Invalid {
        message: record
            .last_error
            .as_ref()
            .map(|fault| fault.message.clone())
            .unwrap_or_default(),
    }
}

/// Whether `stored` is `base` annotated by a peer whose refresh was refused
/// because this invocation had already rotated the refresh token.
fn rejected_predecessor(base: &TokenRecord, stored: &TokenRecord) -> bool {
    let provider_fault = stored.last_error.as_ref().is_some_and(|fault| {
        matches!(fault.kind, FaultKind::InvalidGrant | FaultKind::InvalidToken)
    });
    provider_fault
        && stored.refresh_count == base.refresh_count
        && stored.refresh_token == base.refresh_token
}

fn fault_kind(error: &OAuth2Error) -> FaultKind {
    match error {
        OAuth2Error::Provider(ProviderError::InvalidToken { .. }) => FaultKind::InvalidToken,
        _ => FaultKind::InvalidGrant,
    }
}
