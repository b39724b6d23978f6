//! Running error-handling statistics

use crate::error::{ErrorKind, Severity};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorHandlingStats {
    pub total_errors: u64,
    pub recovered_errors: u64,
    pub retried_operations: u64,
    pub degraded_operations: u64,
    pub critical_failures: u64,
    pub errors_by_type: BTreeMap<ErrorKind, u64>,
    pub errors_by_severity: BTreeMap<Severity, u64>,
    /// Mean time from first failure to successful recovery
    pub average_recovery_time_ms: f64,
}

impl ErrorHandlingStats {
    pub fn record_error(&mut self, kind: ErrorKind, severity: Severity) {
        self.total_errors += 1;
        *self.errors_by_type.entry(kind).or_insert(0) += 1;
        *self.errors_by_severity.entry(severity).or_insert(0) += 1;
    }

    pub fn record_retry(&mut self) {
        self.retried_operations += 1;
    }

    pub fn record_recovery(&mut self, elapsed: Duration) {
        let previous = self.recovered_errors as f64;
        self.recovered_errors += 1;
        self.average_recovery_time_ms = (self.average_recovery_time_ms * previous
            + elapsed.as_secs_f64() * 1000.0)
            / self.recovered_errors as f64;
    }

    pub fn record_degradation(&mut self) {
        self.degraded_operations += 1;
    }

    pub fn record_critical_failure(&mut self) {
        self.critical_failures += 1;
    }

    pub fn count_for(&self, kind: ErrorKind) -> u64 {
        self.errors_by_type.get(&kind).copied().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
