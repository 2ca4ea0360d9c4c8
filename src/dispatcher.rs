use serde::Deserialize;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info};

use crate::errors::LoadTestError;
use crate::intake::TokenIntake;
use crate::load_models::RateShaper;
use crate::metrics::{TARGET_QPS, TOKENS_DISPATCHED_TOTAL, TOKEN_BACKLOG};
use crate::worker::WorkerPool;

/// How a tick's tokens are released into the intake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// All of a tick's tokens at the tick boundary.
    #[default]
    Burst,
    /// Tokens evenly spaced across the tick.
    Spread,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub total_duration: Duration,
    pub tick: Duration,
    pub mode: DispatchMode,
}

/// What the timing loop did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchSummary {
    pub ticks: u64,
    pub tokens_dispatched: u64,
    /// Target QPS requested at each tick, in order.
    pub tick_targets: Vec<u64>,
}

/// Drives the test timeline and turns the shaped rate into dispatch tokens.
pub struct Dispatcher<'a> {
    config: DispatcherConfig,
    shaper: &'a dyn RateShaper,
    intake: TokenIntake,
}

impl<'a> Dispatcher<'a> {
    pub fn new(config: DispatcherConfig, shaper: &'a dyn RateShaper, intake: TokenIntake) -> Self {
        Self {
            config,
            shaper,
            intake,
        }
    }

    /// Runs the timing loop until the configured duration has elapsed.
    ///
    /// Ticks are anchored at the start instant, so a slow tick does not push
    /// every later one back. No tokens are enqueued after this returns.
    pub async fn run(&self) -> DispatchSummary {
        let total = self.config.total_duration;
        // A tick longer than the test still yields exactly one tick.
        let tick = self.config.tick.min(total);

        let start = Instant::now();
        let mut next_tick = start + tick;
        let mut elapsed = Duration::ZERO;
        let mut summary = DispatchSummary::default();

        while elapsed < total {
            let current_qps = self.shaper.target_qps(elapsed, total);
            TARGET_QPS.set(current_qps as i64);
            info!(
                elapsed_secs = elapsed.as_secs_f64(),
                current_qps, "Dispatching tick"
            );

            let queued = match self.config.mode {
                DispatchMode::Burst => self.intake.enqueue(current_qps),
                DispatchMode::Spread => self.spread(current_qps, tick).await,
            };

            summary.ticks += 1;
            summary.tokens_dispatched += queued;
            summary.tick_targets.push(current_qps);
            TOKENS_DISPATCHED_TOTAL.inc_by(queued);
            TOKEN_BACKLOG.set(self.intake.outstanding() as i64);

            time::sleep_until(next_tick).await;
            next_tick += tick;
            elapsed = start.elapsed();
        }

        debug!(
            ticks = summary.ticks,
            tokens = summary.tokens_dispatched,
            "Timing loop finished"
        );
        summary
    }

    async fn spread(&self, count: u64, tick: Duration) -> u64 {
        if count == 0 {
            return 0;
        }

        let tick_start = Instant::now();
        let spacing = tick.div_f64(count as f64);
        let mut queued = 0;

        for i in 0..count {
            time::sleep_until(tick_start + spacing.mul_f64(i as f64)).await;
            queued += self.intake.enqueue(1);
        }
        queued
    }

    /// Waits until every dispatched token has been consumed.
    ///
    /// Progress is logged once per tick. The only failure is a backlog left
    /// behind by a pool with no live workers; a slow pool just takes longer.
    pub async fn drain(&self, pool: &WorkerPool) -> Result<Duration, LoadTestError> {
        let started = Instant::now();

        loop {
            let outstanding = self.intake.outstanding();
            TOKEN_BACKLOG.set(outstanding as i64);

            if outstanding == 0 {
                break;
            }
            if pool.live_workers() == 0 {
                return Err(LoadTestError::DrainStalled { outstanding });
            }

            info!(outstanding, "Draining token backlog");
            if time::timeout(self.config.tick, self.intake.wait_drained())
                .await
                .is_ok()
            {
                break;
            }
        }

        TOKEN_BACKLOG.set(0);
        let drain_time = started.elapsed();
        info!(drain_secs = drain_time.as_secs_f64(), "Token backlog drained");
        Ok(drain_time)
    }
}
