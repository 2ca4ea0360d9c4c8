use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::aggregator::{AggregateMetrics, MetricsAggregator};
use crate::config::Config;
use crate::dispatcher::{DispatchSummary, Dispatcher};
use crate::errors::LoadTestError;
use crate::intake::TokenIntake;
use crate::load_models::RateShaper;
use crate::monitor::run_resource_monitor;
use crate::report::Report;
use crate::transport::Transport;
use crate::worker::WorkerPool;

/// How often the resource monitor logs a telemetry line.
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub metrics: AggregateMetrics,
    pub dispatch: DispatchSummary,
    /// Time spent waiting for the backlog after the timing loop ended.
    pub drain_time: Duration,
    /// Tokens handled by each worker, indexed by task id.
    pub handled_per_worker: Vec<u64>,
    pub report: Report,
}

/// One load test run: validated configuration plus the collaborators it drives.
pub struct LoadTest {
    config: Config,
    transport: Arc<dyn Transport>,
    shaper: Box<dyn RateShaper>,
}

impl LoadTest {
    /// Validates `config` and prepares a run shaped by its load model.
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Result<Self, LoadTestError> {
        config.validate()?;
        let shaper = Box::new(config.load_model.clone());
        Ok(Self {
            config,
            transport,
            shaper,
        })
    }

    /// Replaces the configured load model with a custom shaper.
    pub fn with_shaper(mut self, shaper: impl RateShaper + 'static) -> Self {
        self.shaper = Box::new(shaper);
        self
    }

    /// Runs the test: dispatch for the configured duration, drain, stop, report.
    pub async fn run(self) -> Result<RunSummary, LoadTestError> {
        let config = &self.config;
        config.print_summary();

        let aggregator = Arc::new(MetricsAggregator::new());
        let intake = TokenIntake::new();

        let (monitor_stop, monitor_rx) = watch::channel(false);
        let monitor = config
            .resource_monitor
            .then(|| tokio::spawn(run_resource_monitor(MONITOR_INTERVAL, monitor_rx)));

        let pool = WorkerPool::spawn(
            config.num_concurrent_tasks,
            config.to_worker_config(),
            self.transport.clone(),
            intake.clone(),
            aggregator.clone(),
        );
        info!(workers = pool.size(), "Worker pool started");

        let dispatcher =
            Dispatcher::new(config.to_dispatcher_config(), self.shaper.as_ref(), intake);
        let dispatch = dispatcher.run().await;
        info!(
            ticks = dispatch.ticks,
            tokens_dispatched = dispatch.tokens_dispatched,
            "Test duration completed, waiting for outstanding tokens"
        );

        let drained = dispatcher.drain(&pool).await;

        pool.signal_stop();
        // A closed receiver only means the monitor already exited.
        let _ = monitor_stop.send(true);
        let joined = pool.join().await;
        if let Some(monitor) = monitor {
            monitor.await?;
        }
        let drain_time = drained?;
        let handled_per_worker = joined?;

        let metrics = aggregator.snapshot();
        if metrics.consumed() != dispatch.tokens_dispatched {
            warn!(
                consumed = metrics.consumed(),
                dispatched = dispatch.tokens_dispatched,
                "Outcome count does not match dispatched tokens"
            );
        }

        let report = Report::new(
            &metrics,
            config.test_duration,
            dispatch.tokens_dispatched,
            drain_time,
        );
        info!(
            total = report.total_requests,
            failed = report.failed_requests,
            throughput_rps = report.throughput_rps,
            "Load test finished"
        );

        Ok(RunSummary {
            metrics,
            dispatch,
            drain_time,
            handled_per_worker,
            report,
        })
    }
}
