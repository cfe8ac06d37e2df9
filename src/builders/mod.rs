//! Builders
//!
//! Fluent builder for OAuth2 configuration.

pub mod config;

pub use config::{oauth2_config, OAuth2ConfigBuilder};
