//! Token Lifecycle
//!
//! State classification, versioned storage and refresh coordination for the
//! stored token record.

pub mod coordinator;
pub mod state;
pub mod store;

pub use coordinator::{ReauthorizationReason, RefreshCoordinator, TokenOutcome};
pub use state::{ApiOutcome, TokenState, TokenStateMachine};
pub use store::{HttpSecretStore, InMemoryTokenStore, TokenStore, WriteCondition};
