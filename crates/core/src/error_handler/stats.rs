use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::AppError;

/// Counters kept by the [`ErrorHandler`](super::ErrorHandler).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorStatistics {
  pub total_errors: u64,
  pub errors_by_type: BTreeMap<String, u64>,
  pub errors_by_component: BTreeMap<String, u64>,
  pub errors_by_code: BTreeMap<String, u64>,
  pub pattern_counts: BTreeMap<String, u64>,
  pub alert_counts: BTreeMap<String, u64>,
  pub recovery_attempts: u64,
  pub recovery_success: u64,
  pub recovery_failure: u64,
  /// `recovery_success / recovery_attempts`, 0 when nothing was attempted.
  pub recovery_success_rate: f64,
}

impl ErrorStatistics {
  pub(super) fn record(&mut self, error: &AppError, component: &str) {
    self.total_errors += 1;
    *self.errors_by_type.entry(error.name().to_string()).or_default() += 1;
    *self.errors_by_component.entry(component.to_string()).or_default() += 1;
    *self.errors_by_code.entry(error.code().to_string()).or_default() += 1;
  }

  pub(super) fn record_recovery(&mut self, success: bool) {
    self.recovery_attempts += 1;
    if success {
      self.recovery_success += 1;
    } else {
      self.recovery_failure += 1;
    }
    self.recovery_success_rate = self.recovery_success as f64 / self.recovery_attempts as f64;
  }

  pub fn count_for_type(&self, name: &str) -> u64 {
    self.errors_by_type.get(name).copied().unwrap_or(0)
  }

  pub fn count_for_code(&self, code: &str) -> u64 {
    self.errors_by_code.get(code).copied().unwrap_or(0)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdSummary {
  pub name: String,
  pub severity: String,
  pub message: String,
}

/// Statistics plus the names of everything registered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardData {
  pub statistics: ErrorStatistics,
  pub patterns: Vec<String>,
  pub strategies: Vec<String>,
  pub thresholds: Vec<ThresholdSummary>,
}
