//! Core Components
//!
//! HTTP transport and state nonce generation.

pub mod nonce;
pub mod transport;

pub use nonce::*;
pub use transport::*;
