//! Authorization Session
//!
//! The short-lived, in-memory record of one human authorization attempt.

use chrono::{DateTime, Duration, Utc};

/// Phase of an authorization session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    AwaitingCallback,
    Exchanged,
    Persisted,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingCallback => "awaiting_callback",
            Self::Exchanged => "exchanged",
            Self::Persisted => "persisted",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One human authorization attempt. Never persisted, and consumed by the
/// flow that completes it.
///
/// ```compile_fail
/// fn cloneable<T: Clone>() {}
/// cloneable::<brokerage_token_keeper::AuthorizationSession>();
/// ```
#[derive(Debug)]
pub struct AuthorizationSession {
    pub state_nonce: String,
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub phase: SessionPhase,
}

impl AuthorizationSession {
    /// Create a session that expires `ttl` after `created_at`.
    pub fn new(
        state_nonce: String,
        redirect_uri: String,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            state_nonce,
            redirect_uri,
            created_at,
            expires_at: created_at + ttl,
            phase: SessionPhase::Created,
        }
    }

    /// Check if the session has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Byte-for-byte comparison against the state returned on the callback.
    pub fn state_matches(&self, received: &str) -> bool {
        self.state_nonce.as_bytes() == received.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_expiry_boundary() {
        let created = Utc::now();
        let session = AuthorizationSession::new(
            "nonce".to_string(),
            "https://127.0.0.1/callback".to_string(),
            created,
            Duration::seconds(60),
        );

        assert_eq!(session.phase, SessionPhase::Created);
        assert!(!session.is_expired(created + Duration::seconds(59)));
        assert!(session.is_expired(created + Duration::seconds(60)));
    }

    #[test]
    fn test_state_matches_exactly() {
        let session = AuthorizationSession::new(
            "AbC-123".to_string(),
            "https://127.0.0.1/callback".to_string(),
            Utc::now(),
            Duration::seconds(60),
        );

        assert!(session.state_matches("AbC-123"));
        assert!(!session.state_matches("abc-123"));
        assert!(!session.state_matches("AbC-123 "));
    }
}
