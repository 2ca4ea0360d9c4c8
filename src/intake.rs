//! Token intake shared by the dispatcher and the worker pool.
//!
//! The intake is an unbounded queue of [`DispatchToken`]s plus a counter of
//! tokens that have been enqueued but not yet consumed. A token counts as
//! consumed when it is dropped, so a worker that records its outcome before
//! letting go of the token guarantees the outcome is visible once
//! [`TokenIntake::wait_drained`] returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};
use tracing::warn;

#[derive(Debug, Default)]
struct Pending {
    outstanding: AtomicU64,
    drained: Notify,
}

/// Permission and obligation to perform exactly one request.
#[derive(Debug)]
pub struct DispatchToken {
    id: u64,
    pending: Arc<Pending>,
}

impl DispatchToken {
    /// Sequence number assigned at enqueue time, starting at 0.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for DispatchToken {
    fn drop(&mut self) {
        if self.pending.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.pending.drained.notify_waiters();
        }
    }
}

/// Unbounded token queue with a drain barrier.
#[derive(Clone)]
pub struct TokenIntake {
    tx: mpsc::UnboundedSender<DispatchToken>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<DispatchToken>>>,
    pending: Arc<Pending>,
    dispatched: Arc<AtomicU64>,
}

impl TokenIntake {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            pending: Arc::new(Pending::default()),
            dispatched: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueues `count` tokens without blocking. Returns how many were queued.
    pub fn enqueue(&self, count: u64) -> u64 {
        let mut queued = 0;
        for _ in 0..count {
            self.pending.outstanding.fetch_add(1, Ordering::AcqRel);
            let token = DispatchToken {
                id: self.dispatched.fetch_add(1, Ordering::Relaxed),
                pending: self.pending.clone(),
            };
            // The token is dropped inside the error on failure, which settles
            // the outstanding count again.
            if self.tx.send(token).is_err() {
                warn!(requested = count, queued, "Token intake closed, stopping enqueue");
                break;
            }
            queued += 1;
        }
        queued
    }

    /// Takes one token, waiting at most `wait`. `None` means the wait timed out.
    pub async fn take(&self, wait: Duration) -> Option<DispatchToken> {
        let recv = async { self.rx.lock().await.recv().await };
        tokio::time::timeout(wait, recv).await.ok().flatten()
    }

    /// Tokens enqueued but not yet consumed.
    pub fn outstanding(&self) -> u64 {
        self.pending.outstanding.load(Ordering::Acquire)
    }

    /// Total tokens ever enqueued.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Resolves once every enqueued token has been consumed.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.pending.drained.notified();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for TokenIntake {
    fn default() -> Self {
        Self::new()
    }
}
