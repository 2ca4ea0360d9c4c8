//! Thread-safe aggregation of request outcomes.
//!
//! Every worker folds its outcomes into one [`MetricsAggregator`] through
//! [`MetricsAggregator::record`]. The aggregator keeps the full list of
//! successful latencies (mean/min/max/stddev are computed from it) and an HDR
//! histogram of the same samples for percentiles.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;
use tracing::warn;

use crate::errors::ErrorCategory;

/// Histogram range: 1µs to 60s, 3 significant digits.
const HISTOGRAM_MAX_US: u64 = 60_000_000;

/// Result of one worker's attempt at a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// HTTP 200. The latency enters the statistics.
    Success { latency: Duration },

    /// Non-200 status or transport failure. Counted, no latency contribution.
    Failure {
        category: ErrorCategory,
        status: Option<u16>,
    },
}

impl RequestOutcome {
    /// Classifies a completed HTTP exchange by its status code.
    pub fn from_status(status: u16, latency: Duration) -> Self {
        match ErrorCategory::from_status_code(status) {
            None => RequestOutcome::Success { latency },
            Some(category) => RequestOutcome::Failure {
                category,
                status: Some(status),
            },
        }
    }
}

/// Percentile statistics for the successful latencies, in microseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileStats {
    pub count: u64,
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    pub p99_9: u64,
}

impl PercentileStats {
    fn from_histogram(hist: &Histogram<u64>) -> Option<Self> {
        if hist.is_empty() {
            return None;
        }

        Some(PercentileStats {
            count: hist.len(),
            p50: hist.value_at_quantile(0.50),
            p90: hist.value_at_quantile(0.90),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
            p99_9: hist.value_at_quantile(0.999),
        })
    }

    /// Format statistics as a human-readable string.
    pub fn format(&self) -> String {
        format!(
            "p50={:.2}ms, p90={:.2}ms, p95={:.2}ms, p99={:.2}ms, p99.9={:.2}ms",
            self.p50 as f64 / 1000.0,
            self.p90 as f64 / 1000.0,
            self.p95 as f64 / 1000.0,
            self.p99 as f64 / 1000.0,
            self.p99_9 as f64 / 1000.0,
        )
    }
}

/// Consistent copy of the aggregate state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateMetrics {
    /// Latencies of successful requests in completion order.
    pub latencies: Vec<Duration>,
    pub error_count: u64,
    pub errors_by_category: BTreeMap<ErrorCategory, u64>,
    /// Every response status seen, successful or not.
    pub status_codes: BTreeMap<u16, u64>,
    /// Tokens discarded because the configured method is unsupported.
    pub rejected_count: u64,
    pub percentiles: Option<PercentileStats>,
}

impl AggregateMetrics {
    pub fn successes(&self) -> u64 {
        self.latencies.len() as u64
    }

    /// Completed outcomes: successes plus errors. Rejections are not outcomes.
    pub fn total(&self) -> u64 {
        self.successes() + self.error_count
    }

    /// Every token the workers resolved, including rejections.
    pub fn consumed(&self) -> u64 {
        self.total() + self.rejected_count
    }
}

struct Accumulator {
    latencies: Vec<Duration>,
    error_count: u64,
    errors_by_category: BTreeMap<ErrorCategory, u64>,
    status_codes: BTreeMap<u16, u64>,
    rejected_count: u64,
    histogram: Histogram<u64>,
}

/// Single point of mutation for run statistics.
pub struct MetricsAggregator {
    inner: Mutex<Accumulator>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, HISTOGRAM_MAX_US, 3)
            .expect("static histogram bounds are valid");

        Self {
            inner: Mutex::new(Accumulator {
                latencies: Vec::new(),
                error_count: 0,
                errors_by_category: BTreeMap::new(),
                status_codes: BTreeMap::new(),
                rejected_count: 0,
                histogram,
            }),
        }
    }

    // Every update below is a single push or increment, so a poisoned lock
    // still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, Accumulator> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Folds one outcome into the aggregate.
    pub fn record(&self, outcome: RequestOutcome) {
        let mut acc = self.lock();

        match outcome {
            RequestOutcome::Success { latency } => {
                acc.latencies.push(latency);
                *acc.status_codes.entry(200).or_insert(0) += 1;

                let latency_us = (latency.as_micros() as u64).clamp(1, HISTOGRAM_MAX_US);
                if let Err(e) = acc.histogram.record(latency_us) {
                    warn!(latency_us, error = %e, "Failed to record latency in histogram");
                }
            }
            RequestOutcome::Failure { category, status } => {
                acc.error_count += 1;
                *acc.errors_by_category.entry(category).or_insert(0) += 1;
                if let Some(status) = status {
                    *acc.status_codes.entry(status).or_insert(0) += 1;
                }
            }
        }
    }

    /// Counts a token discarded because of a configuration rejection.
    pub fn record_rejection(&self) {
        self.lock().rejected_count += 1;
    }

    pub fn snapshot(&self) -> AggregateMetrics {
        let acc = self.lock();

        AggregateMetrics {
            latencies: acc.latencies.clone(),
            error_count: acc.error_count,
            errors_by_category: acc.errors_by_category.clone(),
            status_codes: acc.status_codes.clone(),
            rejected_count: acc.rejected_count,
            percentiles: PercentileStats::from_histogram(&acc.histogram),
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}
