//! Authorization Flows
//!
//! Out-of-band flows that need a human in the loop.

pub mod reauthorization;

pub use reauthorization::ReauthorizationFlow;
