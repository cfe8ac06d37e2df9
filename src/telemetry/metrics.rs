//! Metrics
//!
//! Counters emitted by the refresh coordinator and the re-authorization flow.

use std::collections::HashMap;
use std::sync::Mutex;

/// Metric labels.
pub type MetricLabels = HashMap<String, String>;

/// Token lifecycle metrics interface.
pub trait RefreshMetrics: Send + Sync {
    /// Token state observed at the start of an invocation.
    fn record_state(&self, state: &str);

    /// A refresh call was sent to the token endpoint.
    fn record_refresh_attempt(&self);

    /// A refresh finished, successfully or not.
    fn record_refresh(&self, success: bool);

    /// A conditional write lost against a newer version.
    fn record_version_conflict(&self);

    /// The invocation ended needing a human.
    fn record_reauthorization_required(&self, reason: &str);

    /// An authorization-code exchange was persisted.
    fn record_reauthorization_completed(&self);

    /// Record error.
    fn record_error(&self, error_code: &str);
}

/// No-op metrics implementation.
pub struct NoOpMetrics;

impl RefreshMetrics for NoOpMetrics {
    fn record_state(&self, _state: &str) {}
    fn record_refresh_attempt(&self) {}
    fn record_refresh(&self, _success: bool) {}
    fn record_version_conflict(&self) {}
    fn record_reauthorization_required(&self, _reason: &str) {}
    fn record_reauthorization_completed(&self) {}
    fn record_error(&self, _error_code: &str) {}
}

/// No-op metrics singleton.
pub fn no_op_metrics() -> NoOpMetrics {
    NoOpMetrics
}

/// Metric entry for in-memory storage.
#[derive(Debug, Clone)]
pub struct MetricEntry {
    pub name: String,
    pub value: f64,
    pub labels: MetricLabels,
    pub timestamp: u64,
}

/// In-memory metrics for testing.
#[derive(Default)]
pub struct InMemoryMetrics {
    entries: Mutex<Vec<MetricEntry>>,
}

impl InMemoryMetrics {
    /// Create new in-memory metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded entries.
    pub fn get_entries(&self) -> Vec<MetricEntry> {
        self.lock().clone()
    }

    /// Get entries by name.
    pub fn get_entries_by_name(&self, name: &str) -> Vec<MetricEntry> {
        self.lock()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    /// Number of entries recorded under `name`.
    pub fn count(&self, name: &str) -> usize {
        self.lock().iter().filter(|e| e.name == name).count()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MetricEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, name: &str, labels: &[(&str, &str)]) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        self.lock().push(MetricEntry {
            name: name.to_string(),
            value: 1.0,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timestamp: now,
        });
    }
}

impl RefreshMetrics for InMemoryMetrics {
    fn record_state(&self, state: &str) {
        self.record("token_state_observed_total", &[("state", state)]);
    }

    fn record_refresh_attempt(&self) {
        self.record("token_refresh_attempts_total", &[]);
    }

    fn record_refresh(&self, success: bool) {
        let success = success.to_string();
        self.record("token_refreshes_total", &[("success", &success)]);
    }

    fn record_version_conflict(&self) {
        self.record("token_version_conflicts_total", &[]);
    }

    fn record_reauthorization_required(&self, reason: &str) {
        self.record("token_reauthorization_required_total", &[("reason", reason)]);
    }

    fn record_reauthorization_completed(&self) {
        self.record("token_reauthorizations_total", &[]);
    }

    fn record_error(&self, error_code: &str) {
        self.record("token_errors_total", &[("error_code", error_code)]);
    }
}

/// Create in-memory metrics for testing.
pub fn create_in_memory_metrics() -> InMemoryMetrics {
    InMemoryMetrics::new()
}
