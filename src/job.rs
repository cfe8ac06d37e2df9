//! Scheduled Invocation
//!
//! One run of the scheduled job: coordinate the token and summarise the
//! result as a machine-readable report for the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::client::{HttpOAuthClient, OAuthClient};
use crate::error::{ErrorClass, OAuth2Error};
use crate::resilience::{Deadline, OAuth2RetryExecutor, RetryStats};
use crate::telemetry::RefreshMetrics;
use crate::token::{
    HttpSecretStore, ReauthorizationReason, RefreshCoordinator, TokenOutcome, TokenState,
    TokenStore,
};
use crate::types::{JobConfig, TokenFault, TokenRecord};

/// Status consumed by the ingestion pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    TokenValidNoAction,
    Refreshed,
    RequiresReauthorization,
    RetryableFailure,
}

impl InvocationStatus {
    /// Whether data calls may proceed this cycle.
    pub fn can_proceed(&self) -> bool {
        matches!(self, Self::TokenValidNoAction | Self::Refreshed)
    }
}

/// Outcome of one invocation, serialised to stdout.
#[derive(Clone, Debug, Serialize)]
pub struct InvocationReport {
    pub status: InvocationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Calls made through the retry executor, including store reads.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reauthorization: Option<ReauthorizationReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    /// Set when retrying on the next tick would fail the same way.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fatal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InvocationReport {
    pub fn from_result(result: Result<TokenOutcome, OAuth2Error>, stats: &RetryStats) -> Self {
        let mut report = Self {
            status: InvocationStatus::RetryableFailure,
            refresh_count: None,
            expires_at: None,
            attempts: stats.total_attempts,
            reauthorization: None,
            error_code: None,
            error_class: None,
            fatal: false,
            message: None,
        };

        match result {
            Ok(outcome) => {
                report.status = match &outcome {
                    TokenOutcome::Unchanged(_) | TokenOutcome::RefreshedByPeer(_) => {
                        InvocationStatus::TokenValidNoAction
                    }
                    TokenOutcome::Refreshed(_) => InvocationStatus::Refreshed,
                    TokenOutcome::RequiresReauthorization(_) => {
                        InvocationStatus::RequiresReauthorization
                    }
                };
                if let Some(record) = outcome.record() {
                    report.refresh_count = Some(record.refresh_count);
                    report.expires_at = Some(record.expires_at);
                }
                if let TokenOutcome::RequiresReauthorization(reason) = outcome {
                    report.reauthorization = Some(reason);
                }
            }
            Err(error) => {
                if error.needs_reauth() {
                    report.status = InvocationStatus::RequiresReauthorization;
                }
                report.error_code = Some(error.error_code());
                report.error_class = Some(error.class());
                report.fatal = error.is_fatal();
                report.message = Some(error.to_string());
            }
        }

        report
    }
}

/// Run one invocation within the configured budget.
pub async fn run_invocation<C: OAuthClient, S: TokenStore>(
    coordinator: &RefreshCoordinator<C, S>,
) -> InvocationReport {
    let config = coordinator.config();
    let deadline = Deadline::after(config.invocation_budget);
    let retry = OAuth2RetryExecutor::new(config.retry.clone());

    let result = coordinator.obtain_with(&retry, &deadline).await;
    let report = InvocationReport::from_result(result, &retry.get_stats());
    tracing::info!(status = ?report.status, attempts = report.attempts, "invocation finished");
    report
}

/// Snapshot of the stored record, produced without contacting the provider.
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub state: TokenState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<TokenFault>,
}

impl StatusReport {
    pub fn new(record: Option<&TokenRecord>, state: TokenState) -> Self {
        Self {
            state,
            refresh_count: record.map(|r| r.refresh_count),
            expires_at: record.map(|r| r.expires_at),
            refresh_token_expires_at: record.map(|r| r.refresh_token_expires_at),
            last_refresh_at: record.and_then(|r| r.last_refresh_at),
            last_error: record.and_then(|r| r.last_error.clone()),
        }
    }
}

/// Evaluate the stored record without refreshing.
pub async fn inspect<C: OAuthClient, S: TokenStore>(
    coordinator: &RefreshCoordinator<C, S>,
) -> Result<StatusReport, OAuth2Error> {
    let (record, state) = coordinator.inspect().await?;
    Ok(StatusReport::new(record.as_ref(), state))
}

/// Production wiring: HTTP token endpoint and HTTP secret store.
pub type HttpCoordinator = RefreshCoordinator<HttpOAuthClient, HttpSecretStore>;

/// Build the production coordinator from configuration.
pub fn coordinator_from_config(
    config: &JobConfig,
    metrics: Arc<dyn RefreshMetrics>,
) -> Result<HttpCoordinator, OAuth2Error> {
    let client = HttpOAuthClient::new(config.oauth.clone())?;
    let store = HttpSecretStore::new(config.store.clone())?;
    Ok(
        RefreshCoordinator::new(Arc::new(client), Arc::new(store), config.coordinator.clone())
            .with_metrics(metrics),
    )
}
