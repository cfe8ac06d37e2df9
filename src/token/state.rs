//! Token State Machine
//!
//! Classifies a stored record against the clock.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::types::TokenRecord;

/// Lifecycle state of the stored credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// No record exists.
    Uninitialized,
    /// `now < expires_at - threshold`.
    Valid,
    /// `expires_at - threshold <= now < expires_at`.
    ExpiringSoon,
    /// `expires_at <= now < refresh_token_expires_at`.
    ExpiredRefreshable,
    /// `now >= refresh_token_expires_at`.
    ExpiredUnrefreshable,
    /// Rejected by the provider or the API. Overrides every expiry.
    Invalid,
}

impl TokenState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Valid => "valid",
            Self::ExpiringSoon => "expiring_soon",
            Self::ExpiredRefreshable => "expired_refreshable",
            Self::ExpiredUnrefreshable => "expired_unrefreshable",
            Self::Invalid => "invalid",
        }
    }

    /// Only a human re-authorization leaves this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ExpiredUnrefreshable | Self::Invalid)
    }

    /// A refresh can bring the record back to `Valid`.
    pub fn needs_refresh(&self) -> bool {
        matches!(self, Self::ExpiringSoon | Self::ExpiredRefreshable)
    }

    /// The access token may be presented to the API right now.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Valid | Self::ExpiringSoon)
    }
}

impl std::fmt::Display for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the most recent real API call said about the access token.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ApiOutcome {
    #[default]
    NotObserved,
    Accepted,
    Rejected { reason: String },
}

/// Pure classifier over a record and a point in time.
#[derive(Clone, Copy, Debug)]
pub struct TokenStateMachine {
    refresh_threshold: Duration,
}

impl TokenStateMachine {
    pub fn new(refresh_threshold: Duration) -> Self {
        Self { refresh_threshold }
    }

    pub fn refresh_threshold(&self) -> Duration {
        self.refresh_threshold
    }

    /// Evaluate the state of `record` at `now`.
    pub fn evaluate(
        &self,
        record: Option<&TokenRecord>,
        now: DateTime<Utc>,
        last_api_outcome: &ApiOutcome,
    ) -> TokenState {
        let Some(record) = record else {
            return TokenState::Uninitialized;
        };

        if record.last_error.is_some() || matches!(last_api_outcome, ApiOutcome::Rejected { .. }) {
            return TokenState::Invalid;
        }

        if now >= record.refresh_token_expires_at {
            TokenState::ExpiredUnrefreshable
        } else if now >= record.expires_at {
            TokenState::ExpiredRefreshable
        } else if now >= record.expires_at - self.refresh_threshold {
            TokenState::ExpiringSoon
        } else {
            TokenState::Valid
        }
    }
}

impl Default for TokenStateMachine {
    fn default() -> Self {
        Self::new(Duration::seconds(crate::types::DEFAULT_REFRESH_THRESHOLD_SECS as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaultKind, TokenFault};

    fn record(now: DateTime<Utc>, expires_in: Duration, rt_expires_in: Duration) -> TokenRecord {
        TokenRecord {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            token_type: "Bearer".to_string(),
            scope: None,
            issued_at: now - Duration::minutes(1),
            expires_at: now + expires_in,
            refresh_token_expires_at: now + rt_expires_in,
            last_refresh_at: None,
            refresh_count: 0,
            last_error: None,
            store_version: None,
        }
    }

    #[test]
    fn test_daily_threshold_against_weekly_token() {
        let machine = TokenStateMachine::new(Duration::hours(24));
        let now = Utc::now();

        let soon = record(now, Duration::hours(2), Duration::days(7));
        let later = record(now, Duration::hours(48), Duration::days(7));

        assert_eq!(
            machine.evaluate(Some(&soon), now, &ApiOutcome::NotObserved),
            TokenState::ExpiringSoon
        );
        assert_eq!(
            machine.evaluate(Some(&later), now, &ApiOutcome::NotObserved),
            TokenState::Valid
        );
    }

    #[test]
    fn test_boundaries() {
        let machine = TokenStateMachine::new(Duration::minutes(5));
        let now = Utc::now();
        let r = record(now, Duration::minutes(30), Duration::days(7));
        let eval = |at| machine.evaluate(Some(&r), at, &ApiOutcome::NotObserved);

        let threshold_start = r.expires_at - Duration::minutes(5);
        assert_eq!(eval(threshold_start - Duration::seconds(1)), TokenState::Valid);
        assert_eq!(eval(threshold_start), TokenState::ExpiringSoon);
        assert_eq!(eval(r.expires_at - Duration::seconds(1)), TokenState::ExpiringSoon);
        assert_eq!(eval(r.expires_at), TokenState::ExpiredRefreshable);
        assert_eq!(
            eval(r.refresh_token_expires_at - Duration::seconds(1)),
            TokenState::ExpiredRefreshable
        );
        assert_eq!(eval(r.refresh_token_expires_at), TokenState::ExpiredUnrefreshable);
    }

    #[test]
    fn test_missing_record_is_uninitialized() {
        let machine = TokenStateMachine::default();
        assert_eq!(
            machine.evaluate(None, Utc::now(), &ApiOutcome::NotObserved),
            TokenState::Uninitialized
        );
    }

    #[test]
    fn test_rejection_overrides_expiry() {
        let machine = TokenStateMachine::default();
        let now = Utc::now();
        let fresh = record(now, Duration::hours(24), Duration::days(7));

        let rejected = ApiOutcome::Rejected {
            reason: "401 from accounts endpoint".to_string(),
        };
        assert_eq!(machine.evaluate(Some(&fresh), now, &rejected), TokenState::Invalid);
        assert_eq!(
            machine.evaluate(Some(&fresh), now, &ApiOutcome::Accepted),
            TokenState::Valid
        );

        let annotated = fresh.with_fault(TokenFault {
            kind: FaultKind::InvalidGrant,
            message: "refresh token revoked".to_string(),
            observed_at: now,
        });
        assert_eq!(
            machine.evaluate(Some(&annotated), now, &ApiOutcome::NotObserved),
            TokenState::Invalid
        );
    }

    #[test]
    fn test_state_predicates() {
        assert!(TokenState::Invalid.is_terminal());
        assert!(TokenState::ExpiredUnrefreshable.is_terminal());
        assert!(!TokenState::Uninitialized.is_terminal());
        assert!(TokenState::ExpiringSoon.needs_refresh());
        assert!(TokenState::ExpiredRefreshable.needs_refresh());
        assert!(!TokenState::Valid.needs_refresh());
        assert!(TokenState::ExpiringSoon.is_usable());
        assert!(!TokenState::ExpiredRefreshable.is_usable());
    }
}
