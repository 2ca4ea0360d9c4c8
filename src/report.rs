//! Summary report built from the final aggregate snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregator::{AggregateMetrics, PercentileStats};

/// Output format of the final report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!("Expected 'text' or 'json', got '{}'", other)),
        }
    }
}

/// Latency statistics in seconds. All zero when there are no samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation; zero with fewer than two samples.
    pub std_dev: f64,
}

impl LatencyStats {
    pub fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let secs: Vec<f64> = samples.iter().map(Duration::as_secs_f64).collect();
        let n = secs.len() as f64;
        let mean = secs.iter().sum::<f64>() / n;
        let min = secs.iter().copied().fold(f64::INFINITY, f64::min);
        let max = secs.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let std_dev = if secs.len() < 2 {
            0.0
        } else {
            let variance = secs.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1.0);
            variance.sqrt()
        };

        Self {
            mean,
            min,
            max,
            std_dev,
        }
    }
}

/// Final summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Percentage, 0 when no requests completed.
    pub error_rate_percent: f64,
    pub latency: LatencyStats,
    pub percentiles_us: Option<PercentileStats>,
    /// Successful requests per second of configured test duration.
    pub throughput_rps: f64,
    pub errors_by_category: BTreeMap<String, u64>,
    pub status_codes: BTreeMap<u16, u64>,
    pub rejected_tokens: u64,
    pub tokens_dispatched: u64,
    pub drain_secs: f64,
}

impl Report {
    /// Builds the report. Throughput divides by `test_duration`, the configured
    /// duration, not by the time the run actually took to drain.
    pub fn new(
        metrics: &AggregateMetrics,
        test_duration: Duration,
        tokens_dispatched: u64,
        drain_time: Duration,
    ) -> Self {
        let total = metrics.total();
        let successes = metrics.successes();

        let error_rate_percent = if total == 0 {
            0.0
        } else {
            metrics.error_count as f64 / total as f64 * 100.0
        };

        let duration_secs = test_duration.as_secs_f64();
        let throughput_rps = if duration_secs > 0.0 {
            successes as f64 / duration_secs
        } else {
            0.0
        };

        Self {
            total_requests: total,
            successful_requests: successes,
            failed_requests: metrics.error_count,
            error_rate_percent,
            latency: LatencyStats::from_samples(&metrics.latencies),
            percentiles_us: metrics.percentiles.clone(),
            throughput_rps,
            errors_by_category: metrics
                .errors_by_category
                .iter()
                .map(|(category, count)| (category.label().to_string(), *count))
                .collect(),
            status_codes: metrics.status_codes.clone(),
            rejected_tokens: metrics.rejected_count,
            tokens_dispatched,
            drain_secs: drain_time.as_secs_f64(),
        }
    }

    pub fn render(&self, format: ReportFormat) -> Result<String, serde_json::Error> {
        match format {
            ReportFormat::Text => Ok(self.to_string()),
            ReportFormat::Json => serde_json::to_string_pretty(self),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total requests: {}", self.total_requests)?;
        writeln!(f, "Successful requests: {}", self.successful_requests)?;
        writeln!(f, "Failed requests: {}", self.failed_requests)?;
        writeln!(f, "Error rate: {:.2}%", self.error_rate_percent)?;
        writeln!(f, "Average latency: {:.4} seconds", self.latency.mean)?;
        writeln!(f, "Minimum latency: {:.4} seconds", self.latency.min)?;
        writeln!(f, "Maximum latency: {:.4} seconds", self.latency.max)?;
        writeln!(
            f,
            "Standard deviation of latency: {:.4} seconds",
            self.latency.std_dev
        )?;
        if let Some(ref p) = self.percentiles_us {
            writeln!(f, "Latency percentiles: {}", p.format())?;
        }
        writeln!(f, "Throughput: {:.2} requests/second", self.throughput_rps)?;

        if !self.errors_by_category.is_empty() {
            writeln!(f, "Errors by category:")?;
            for (category, count) in &self.errors_by_category {
                writeln!(f, "  {:<20} {}", category, count)?;
            }
        }
        if self.rejected_tokens > 0 {
            writeln!(
                f,
                "Rejected tokens (unsupported method): {}",
                self.rejected_tokens
            )?;
        }
        write!(
            f,
            "Tokens dispatched: {} (drained in {:.2}s after the timing loop)",
            self.tokens_dispatched, self.drain_secs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{MetricsAggregator, RequestOutcome};
    use crate::errors::ErrorCategory;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn empty_run_has_zero_error_rate() {
        let report = Report::new(
            &AggregateMetrics::default(),
            Duration::from_secs(10),
            0,
            Duration::ZERO,
        );
        assert_eq!(report.total_requests, 0);
        assert_eq!(report.error_rate_percent, 0.0);
        assert_eq!(report.throughput_rps, 0.0);
        assert_eq!(report.latency, LatencyStats::default());
    }

    #[test]
    fn single_sample_has_zero_std_dev() {
        let stats = LatencyStats::from_samples(&[ms(20)]);
        assert_eq!(stats.std_dev, 0.0);
        assert!((stats.mean - 0.02).abs() < 1e-9);
        assert_eq!(stats.min, stats.max);
    }

    #[test]
    fn sample_std_dev() {
        // 2, 4, 4, 4, 5, 5, 7, 9 ms: sample variance = 32/7 ms^2
        let samples: Vec<Duration> = [2, 4, 4, 4, 5, 5, 7, 9].iter().map(|v| ms(*v)).collect();
        let stats = LatencyStats::from_samples(&samples);

        let expected = (32.0f64 / 7.0).sqrt() / 1000.0;
        assert!((stats.std_dev - expected).abs() < 1e-9, "{}", stats.std_dev);
        assert!((stats.mean - 0.005).abs() < 1e-9);
        assert!((stats.min - 0.002).abs() < 1e-9);
        assert!((stats.max - 0.009).abs() < 1e-9);
    }

    #[test]
    fn error_rate_and_throughput() {
        let agg = MetricsAggregator::new();
        for _ in 0..6 {
            agg.record(RequestOutcome::Success { latency: ms(10) });
        }
        for _ in 0..2 {
            agg.record(RequestOutcome::Failure {
                category: ErrorCategory::ServerError,
                status: Some(500),
            });
        }

        let report = Report::new(&agg.snapshot(), Duration::from_secs(3), 8, ms(50));
        assert_eq!(report.total_requests, 8);
        assert_eq!(report.successful_requests, 6);
        assert_eq!(report.failed_requests, 2);
        assert!((report.error_rate_percent - 25.0).abs() < 1e-9);
        assert!((report.throughput_rps - 2.0).abs() < 1e-9);
        assert_eq!(report.errors_by_category["server_error"], 2);
    }

    #[test]
    fn text_render_lists_core_fields() {
        let agg = MetricsAggregator::new();
        agg.record(RequestOutcome::Success { latency: ms(10) });
        let text = Report::new(&agg.snapshot(), Duration::from_secs(1), 1, Duration::ZERO)
            .render(ReportFormat::Text)
            .unwrap();

        assert!(text.contains("Total requests: 1"));
        assert!(text.contains("Error rate: 0.00%"));
        assert!(text.contains("Throughput: 1.00 requests/second"));
    }

    #[test]
    fn json_render_is_valid_json() {
        let report = Report::new(
            &AggregateMetrics::default(),
            Duration::from_secs(1),
            0,
            Duration::ZERO,
        );
        let json = report.render(ReportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["total_requests"], 0);
        assert_eq!(value["error_rate_percent"], 0.0);
    }

    #[test]
    fn report_format_parses() {
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
