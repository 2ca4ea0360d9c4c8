#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use qps_loadtest::config::Config;
use qps_loadtest::errors::TransportError;
use qps_loadtest::transport::Transport;
use reqwest::Method;

type Responder = Box<dyn Fn(u64) -> Result<u16, TransportError> + Send + Sync>;

/// In-process transport: sleeps for a fixed latency, then answers with
/// whatever the responder returns for the call number.
pub struct FakeTransport {
    latency: Duration,
    responder: Responder,
    calls: AtomicU64,
}

impl FakeTransport {
    pub fn ok(latency: Duration) -> Self {
        Self::with(latency, |_| Ok(200))
    }

    pub fn with(
        latency: Duration,
        responder: impl Fn(u64) -> Result<u16, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            latency,
            responder: Box::new(responder),
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(
        &self,
        _method: &Method,
        _url: &str,
        _body: Option<&str>,
    ) -> Result<u16, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        (self.responder)(call)
    }
}

pub fn config(max_qps: u64, duration_secs: u64, workers: usize) -> Config {
    Config::new(
        "http://loadtest.invalid/",
        max_qps,
        Duration::from_secs(duration_secs),
        workers,
    )
}
