//! Live Prometheus export of the run.
//!
//! These series mirror what the workers and dispatcher are doing while the
//! test runs. The final report never reads them; it is built from the
//! run-owned [`crate::aggregator::MetricsAggregator`].

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{Encoder, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};
use std::env;
use tracing::{error, info};

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "qps_loadtest".to_string());

    pub static ref REQUEST_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_total", "Total number of HTTP requests made")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_STATUS_CODES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("requests_status_codes_total", "Number of HTTP requests by status code")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["status_code"]
        ).unwrap();

    pub static ref REQUEST_ERRORS_BY_CATEGORY: IntCounterVec =
        IntCounterVec::new(
            Opts::new("request_errors_by_category_total", "Number of failed requests by error category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    pub static ref CONCURRENT_REQUESTS: Gauge =
        Gauge::with_opts(
            Opts::new("concurrent_requests", "Number of HTTP requests currently in flight")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "request_duration_seconds",
                "HTTP request latencies in seconds."
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref TOKENS_DISPATCHED_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("tokens_dispatched_total", "Dispatch tokens enqueued for the worker pool")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref TOKEN_BACKLOG: IntGauge =
        IntGauge::with_opts(
            Opts::new("token_backlog", "Dispatch tokens enqueued but not yet consumed")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref TARGET_QPS: IntGauge =
        IntGauge::with_opts(
            Opts::new("target_qps", "Offered rate requested by the rate shaper for the current tick")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let registry = prometheus::default_registry();

    registry.register(Box::new(REQUEST_TOTAL.clone()))?;
    registry.register(Box::new(REQUEST_STATUS_CODES.clone()))?;
    registry.register(Box::new(REQUEST_ERRORS_BY_CATEGORY.clone()))?;
    registry.register(Box::new(CONCURRENT_REQUESTS.clone()))?;
    registry.register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    registry.register(Box::new(TOKENS_DISPATCHED_TOTAL.clone()))?;
    registry.register(Box::new(TOKEN_BACKLOG.clone()))?;
    registry.register(Box::new(TARGET_QPS.clone()))?;

    Ok(())
}

/// Returns a static string label for common HTTP status codes.
///
/// Uncommon codes fall back to "other" rather than allocating a unique string.
pub fn status_code_label(code: u16) -> &'static str {
    match code {
        200 => "200",
        201 => "201",
        204 => "204",
        301 => "301",
        302 => "302",
        304 => "304",
        400 => "400",
        401 => "401",
        403 => "403",
        404 => "404",
        405 => "405",
        408 => "408",
        429 => "429",
        500 => "500",
        502 => "502",
        503 => "503",
        504 => "504",
        _ => "other",
    }
}

/// Gathers and encodes the default registry in the Prometheus text format.
pub fn gather_metrics_string() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# ERROR ENCODING METRICS");
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!(error = %e, "Metrics output is not valid UTF-8");
        String::from("# ERROR ENCODING METRICS TO UTF-8")
    })
}

async fn metrics_handler(_req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
    let mut response = Response::new(Body::from(gather_metrics_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    Ok(response)
}

/// Serves the Prometheus text format on `0.0.0.0:port` until the process exits.
pub async fn start_metrics_server(port: u16) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, hyper::Error>(service_fn(metrics_handler))
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(port, addr = %addr, "Metrics server listening");

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}
