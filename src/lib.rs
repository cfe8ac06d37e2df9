//! Brokerage Token Keeper
//!
//! OAuth2 token lifecycle coordination for a scheduled brokerage data
//! ingestion job.
//!
//! Every invocation reads the single authoritative token record from a
//! versioned store, classifies it, refreshes it at most once and writes it
//! back with a version check. Overlapping invocations never need a lock:
//! the loser of a conditional write adopts the winner's record. When the
//! credential can no longer be refreshed the job reports
//! `requires_reauthorization` and a human runs the authorization-code flow.
//!
//! # Features
//!
//! - Token state machine with a configurable refresh threshold
//! - Refresh coordination over optimistic concurrency
//! - Authorization-code re-authorization with state nonce and session TTL
//! - In-memory and HTTP secret-store backends
//! - Bounded retry with exponential backoff, jitter and an invocation deadline
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use brokerage_token_keeper::{
//!     job::run_invocation, oauth2_config, CoordinatorConfig, HttpOAuthClient,
//!     InMemoryTokenStore, RefreshCoordinator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = oauth2_config()
//!         .client_id("app-key")
//!         .client_secret("app-secret")
//!         .authorization_endpoint("https://broker.example.com/v1/oauth/authorize")
//!         .token_endpoint("https://broker.example.com/v1/oauth/token")
//!         .redirect_uri("https://127.0.0.1:8182/callback")
//!         .build()?;
//!
//!     let client = Arc::new(HttpOAuthClient::new(config)?);
//!     let store = Arc::new(InMemoryTokenStore::new());
//!     let coordinator = RefreshCoordinator::new(client, store, CoordinatorConfig::default());
//!
//!     let report = run_invocation(&coordinator).await;
//!     println!("{}", serde_json::to_string(&report)?);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: token records, sessions, callback parameters and configuration
//! - `error`: error hierarchy and failure classification
//! - `core`: HTTP transport and state nonce generation
//! - `client`: stateless token endpoint client
//! - `token`: state machine, store adapters and the refresh coordinator
//! - `flows`: human re-authorization flow
//! - `resilience`: bounded retry and invocation deadlines
//! - `telemetry`: logging setup and lifecycle metrics
//! - `job`: one scheduled invocation and its report

pub mod builders;
pub mod client;
pub mod core;
pub mod error;
pub mod flows;
pub mod job;
pub mod resilience;
pub mod telemetry;
pub mod token;
pub mod types;

// Re-export client
pub use client::{HttpOAuthClient, OAuthClient};

// Re-export builders
pub use builders::{oauth2_config, OAuth2ConfigBuilder};

// Re-export errors
pub use error::{
    create_error_from_response, map_token_error, parse_error_response, AuthorizationError,
    CancellationError, ConfigurationError, ErrorClass, NetworkError, OAuth2Error,
    OAuth2ErrorResponse, OAuth2Result, ProtocolError, ProviderError, StoreError,
};

// Re-export types
pub use types::{
    // Config
    ClientAuthMethod, ClientCredentials, CoordinatorConfig, GrantType, JobConfig, OAuth2Config,
    ProviderConfig, StoreConfig,
    // Token
    FaultKind, StoreVersion, TokenFault, TokenGrant, TokenRecord, TokenResponse,
    // Session
    AuthorizationSession, CallbackParams, SessionPhase,
};

// Re-export core components
pub use self::core::{
    generate_state_nonce, HttpMethod, HttpRequest, HttpResponse, HttpTransport,
    MockHttpTransport, ReqwestHttpTransport,
};

// Re-export flows
pub use flows::ReauthorizationFlow;

// Re-export token lifecycle
pub use token::{
    ApiOutcome, HttpSecretStore, InMemoryTokenStore, ReauthorizationReason, RefreshCoordinator,
    TokenOutcome, TokenState, TokenStateMachine, TokenStore, WriteCondition,
};

// Re-export resilience
pub use resilience::{Deadline, OAuth2RetryExecutor, RetryConfig, RetryStats};

// Re-export job
pub use job::{run_invocation, InvocationReport, InvocationStatus, StatusReport};
