//! Telemetry
//!
//! Logging setup and lifecycle metrics.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
pub use metrics::{
    create_in_memory_metrics, no_op_metrics, InMemoryMetrics, MetricEntry, MetricLabels,
    NoOpMetrics, RefreshMetrics,
};
