//! Configuration for the sync core.

use crate::retry::{millis, RetryPolicy};
use serde::Deserialize;
use std::time::Duration;

/// Configuration for a [`SyncCoordinator`](crate::SyncCoordinator).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Retry policy for fetches and submissions.
    pub retry: RetryPolicy,
    /// Timeout applied to each individual remote call.
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    /// Capacity of the sync event broadcast channel.
    pub event_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
            event_capacity: 256,
        }
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Split of sales revenue into cost of goods, expenses and profit.
///
/// Ratios are fractions of revenue. Whatever remains after cost of goods and
/// expenses is reported as net profit. Deserialized ratios go through
/// [`FinancialSplit::new`], so they are clamped the same way.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "SplitRatios")]
pub struct FinancialSplit {
    /// Fraction of revenue attributed to cost of goods sold.
    pub cogs_ratio: f64,
    /// Fraction of revenue attributed to operating expenses.
    pub expense_ratio: f64,
}

impl FinancialSplit {
    /// Creates a split, clamping each ratio into `0.0..=1.0`. A ratio that
    /// is not finite counts as `0.0`.
    pub fn new(cogs_ratio: f64, expense_ratio: f64) -> Self {
        Self {
            cogs_ratio: clamp_ratio(cogs_ratio),
            expense_ratio: clamp_ratio(expense_ratio),
        }
    }

    /// Cost of goods for `revenue_cents`, rounded down.
    pub fn cogs(&self, revenue_cents: i64) -> i64 {
        (revenue_cents as f64 * self.cogs_ratio).floor() as i64
    }

    /// Expenses for `revenue_cents`, rounded down.
    pub fn expenses(&self, revenue_cents: i64) -> i64 {
        (revenue_cents as f64 * self.expense_ratio).floor() as i64
    }
}

fn clamp_ratio(ratio: f64) -> f64 {
    if ratio.is_finite() {
        ratio.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Deserialize)]
struct SplitRatios {
    cogs_ratio: f64,
    expense_ratio: f64,
}

impl From<SplitRatios> for FinancialSplit {
    fn from(raw: SplitRatios) -> Self {
        Self::new(raw.cogs_ratio, raw.expense_ratio)
    }
}

impl Default for FinancialSplit {
    /// No costs configured: all revenue is reported as profit.
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_retry(RetryPolicy::new(5))
            .with_request_timeout(Duration::from_secs(2))
            .with_event_capacity(0);

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.event_capacity, 1);
    }

    #[test]
    fn sync_config_from_json() {
        let config: SyncConfig = serde_json::from_str(
            r#"{"retry": {"max_attempts": 2}, "request_timeout_ms": 1500}"#,
        )
        .unwrap();
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(100));
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn financial_split_rounds_down() {
        let split = FinancialSplit::new(0.5, 0.4);
        assert_eq!(split.cogs(1001), 500);
        assert_eq!(split.expenses(1001), 400);
    }

    #[test]
    fn financial_split_from_json_is_clamped() {
        let split: FinancialSplit =
            serde_json::from_str(r#"{"cogs_ratio": -0.5, "expense_ratio": 3.0}"#).unwrap();
        assert_eq!(split, FinancialSplit::new(0.0, 1.0));
        assert_eq!(split.cogs(1000), 0);
        assert_eq!(split.expenses(1000), 1000);
    }

    #[test]
    fn financial_split_clamps() {
        let split = FinancialSplit::new(1.5, -0.2);
        assert_eq!(split.cogs_ratio, 1.0);
        assert_eq!(split.expense_ratio, 0.0);
        assert_eq!(FinancialSplit::new(f64::NAN, f64::INFINITY), FinancialSplit::default());
    }
}
