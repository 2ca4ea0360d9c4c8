use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use reqwest::Method;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::aggregator::{MetricsAggregator, RequestOutcome};
use crate::errors::{ErrorCategory, TransportError};
use crate::intake::{DispatchToken, TokenIntake};
use crate::metrics::{
    status_code_label, CONCURRENT_REQUESTS, REQUEST_DURATION_SECONDS, REQUEST_ERRORS_BY_CATEGORY,
    REQUEST_STATUS_CODES, REQUEST_TOTAL,
};
use crate::transport::Transport;

/// Per-request settings shared by every worker in the pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    /// Bounded wait for a token before the stop flag is re-checked.
    pub token_wait: Duration,
    /// Deadline for a single transport call. `None` leaves it to the transport.
    pub request_timeout: Option<Duration>,
}

struct Shared {
    config: WorkerConfig,
    transport: Arc<dyn Transport>,
    intake: TokenIntake,
    aggregator: Arc<MetricsAggregator>,
    stop: AtomicBool,
    live: AtomicUsize,
    rejection_logged: AtomicBool,
}

/// Decrements the live-worker count when a worker task ends, panics included.
struct LiveGuard(Arc<Shared>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Fixed-size set of worker tasks consuming tokens from a [`TokenIntake`].
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<u64>>,
}

impl WorkerPool {
    /// Spawns `size` workers. They start pulling tokens immediately.
    pub fn spawn(
        size: usize,
        config: WorkerConfig,
        transport: Arc<dyn Transport>,
        intake: TokenIntake,
        aggregator: Arc<MetricsAggregator>,
    ) -> Self {
        let shared = Arc::new(Shared {
            config,
            transport,
            intake,
            aggregator,
            stop: AtomicBool::new(false),
            live: AtomicUsize::new(size),
            rejection_logged: AtomicBool::new(false),
        });

        let handles = (0..size)
            .map(|task_id| {
                let guard = LiveGuard(shared.clone());
                tokio::spawn(async move {
                    let handled = run_worker(task_id, &guard.0).await;
                    drop(guard);
                    handled
                })
            })
            .collect();

        Self { shared, handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Workers whose task has not finished yet.
    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Asks workers to stop once their current token wait times out.
    pub fn signal_stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
    }

    /// Waits for every worker to exit and returns how many tokens each handled.
    pub async fn join(self) -> Result<Vec<u64>, JoinError> {
        let mut handled = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            handled.push(handle.await?);
        }
        Ok(handled)
    }
}

/// Runs a single worker: take a token, perform one request, record the outcome.
async fn run_worker(task_id: usize, shared: &Shared) -> u64 {
    debug!(task_id, url = %shared.config.url, method = %shared.config.method, "Worker starting");

    let mut handled = 0u64;

    while !shared.stop.load(Ordering::Acquire) {
        let Some(token) = shared.intake.take(shared.config.token_wait).await else {
            continue;
        };

        execute(task_id, shared, token).await;
        handled += 1;
    }

    info!(task_id, handled, "Worker stopping");
    handled
}

async fn execute(task_id: usize, shared: &Shared, token: DispatchToken) {
    let config = &shared.config;

    CONCURRENT_REQUESTS.inc();
    let request_start_time = Instant::now();

    let send = shared
        .transport
        .send(&config.method, &config.url, config.body.as_deref());
    let result = match config.request_timeout {
        Some(deadline) => time::timeout(deadline, send)
            .await
            .unwrap_or(Err(TransportError::Deadline(deadline))),
        None => send.await,
    };

    let latency = request_start_time.elapsed();
    CONCURRENT_REQUESTS.dec();

    let outcome = match result {
        Ok(status) => {
            REQUEST_STATUS_CODES
                .with_label_values(&[status_code_label(status)])
                .inc();
            RequestOutcome::from_status(status, latency)
        }
        Err(TransportError::UnsupportedMethod(method)) => {
            if !shared.rejection_logged.swap(true, Ordering::AcqRel) {
                warn!(
                    method = %method,
                    "Unsupported HTTP method, tokens will be discarded without a request"
                );
            }
            shared.aggregator.record_rejection();
            return;
        }
        Err(e) => {
            REQUEST_STATUS_CODES.with_label_values(&["error"]).inc();
            let category = e.category().unwrap_or(ErrorCategory::OtherError);
            error!(
                task_id,
                token = token.id(),
                url = %config.url,
                error = %e,
                error_category = category.label(),
                "Request failed"
            );
            RequestOutcome::Failure {
                category,
                status: None,
            }
        }
    };

    REQUEST_TOTAL.inc();
    REQUEST_DURATION_SECONDS.observe(latency.as_secs_f64());
    if let RequestOutcome::Failure { category, .. } = outcome {
        REQUEST_ERRORS_BY_CATEGORY
            .with_label_values(&[category.label()])
            .inc();
    }

    shared.aggregator.record(outcome);
    // Released only after recording so the drain barrier sees this outcome.
    drop(token);
}
