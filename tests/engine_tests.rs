//! End-to-end runs of the load engine against an in-process transport.
//!
//! Every test runs on paused tokio time, so ticks, request latencies and
//! drain times are exact virtual durations.

mod support;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use qps_loadtest::client::{build_client, ClientConfig};
use qps_loadtest::errors::{ErrorCategory, LoadTestError, TransportError};
use qps_loadtest::load_models::LoadModel;
use qps_loadtest::runner::LoadTest;
use qps_loadtest::transport::ReqwestTransport;
use reqwest::Method;
use support::{config, FakeTransport};

#[tokio::test(start_paused = true)]
async fn phased_run_dispatches_and_records_every_token() {
    let transport = Arc::new(FakeTransport::ok(Duration::from_millis(10)));
    let summary = LoadTest::new(config(10, 3, 2), transport.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.dispatch.tick_targets, vec![5, 10, 7]);
    assert_eq!(summary.dispatch.tokens_dispatched, 22);
    assert_eq!(transport.calls(), 22);

    let metrics = &summary.metrics;
    assert_eq!(metrics.error_count, 0);
    assert_eq!(metrics.latencies.len(), 22);
    assert!(
        metrics
            .latencies
            .iter()
            .all(|l| *l >= Duration::from_millis(10) && *l < Duration::from_millis(12)),
        "latencies should match the transport delay: {:?}",
        metrics.latencies
    );

    let report = &summary.report;
    assert_eq!(report.total_requests, 22);
    assert_eq!(report.failed_requests, 0);
    assert_eq!(report.error_rate_percent, 0.0);
    assert!((report.throughput_rps - 22.0 / 3.0).abs() < 1e-9);
    assert_eq!(summary.handled_per_worker.iter().sum::<u64>(), 22);
}

#[tokio::test(start_paused = true)]
async fn every_token_yields_exactly_one_outcome() {
    // Cycle through success, server error, client error and a network failure.
    let transport = Arc::new(FakeTransport::with(Duration::from_millis(5), |call| {
        match call % 4 {
            0 => Ok(200),
            1 => Ok(503),
            2 => Ok(404),
            _ => Err(TransportError::Failed {
                category: ErrorCategory::NetworkError,
                message: "connection reset".into(),
            }),
        }
    }));
    let summary = LoadTest::new(config(20, 3, 3), transport)
        .unwrap()
        .run()
        .await
        .unwrap();

    let metrics = &summary.metrics;
    let dispatched = summary.dispatch.tokens_dispatched;
    assert_eq!(dispatched, 10 + 20 + 15);
    assert_eq!(
        metrics.latencies.len() as u64 + metrics.error_count,
        dispatched,
        "successes plus errors must equal tokens dispatched"
    );
    assert_eq!(metrics.rejected_count, 0);

    // 45 calls: 12 of the first residue, 11 of each other.
    assert_eq!(metrics.latencies.len(), 12);
    assert_eq!(metrics.error_count, 33);
    assert_eq!(metrics.errors_by_category[&ErrorCategory::ServerError], 11);
    assert_eq!(metrics.errors_by_category[&ErrorCategory::ClientError], 11);
    assert_eq!(metrics.errors_by_category[&ErrorCategory::NetworkError], 11);
    assert_eq!(metrics.status_codes[&200], 12);
    assert_eq!(metrics.status_codes[&503], 11);
    assert_eq!(metrics.status_codes[&404], 11);

    let report = &summary.report;
    assert!((report.error_rate_percent - 33.0 / 45.0 * 100.0).abs() < 1e-9);
    assert!((report.throughput_rps - 12.0 / 3.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn non_200_responses_are_errors_without_latency() {
    let transport = Arc::new(FakeTransport::with(Duration::from_millis(5), |_| Ok(201)));
    let mut cfg = config(4, 1, 1);
    cfg.load_model = LoadModel::Constant { qps: 4 };

    let summary = LoadTest::new(cfg, transport).unwrap().run().await.unwrap();

    assert!(summary.metrics.latencies.is_empty());
    assert_eq!(summary.metrics.error_count, 4);
    assert_eq!(
        summary.metrics.errors_by_category[&ErrorCategory::UnexpectedStatus],
        4
    );
    assert_eq!(summary.metrics.percentiles, None);
    assert_eq!(summary.report.error_rate_percent, 100.0);
    assert_eq!(summary.report.throughput_rps, 0.0);
}

#[tokio::test(start_paused = true)]
async fn half_second_ticks_double_the_tick_count() {
    let duration_secs = 3;
    let mut cfg = config(10, duration_secs, 2);
    cfg.tick_period = Duration::from_millis(500);
    let transport = Arc::new(FakeTransport::ok(Duration::from_millis(10)));

    let summary = LoadTest::new(cfg, transport.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.dispatch.ticks, 2 * duration_secs);
    // Thirds of 3s: ticks at 0 and 0.5s, then 1 and 1.5s, then 2 and 2.5s.
    assert_eq!(summary.dispatch.tick_targets, vec![5, 5, 10, 10, 7, 7]);
    assert_eq!(summary.dispatch.tokens_dispatched, 44);
    assert_eq!(transport.calls(), 44);
    assert_eq!(summary.metrics.latencies.len(), 44);
}

#[tokio::test(start_paused = true)]
async fn workers_drain_backlog_concurrently() {
    let mut cfg = config(100, 1, 4);
    cfg.load_model = LoadModel::Constant { qps: 100 };
    let transport = Arc::new(FakeTransport::ok(Duration::from_millis(200)));

    let summary = LoadTest::new(cfg, transport).unwrap().run().await.unwrap();

    // 100 tokens * 200ms / 4 workers = 5s of work; the timing loop covers 1s.
    let drain = summary.drain_time.as_secs_f64();
    assert!((3.9..=4.1).contains(&drain), "drain took {}s", drain);
    assert_eq!(summary.metrics.latencies.len(), 100);
    assert_eq!(summary.handled_per_worker.len(), 4);
    assert!(
        summary.handled_per_worker.iter().all(|n| *n == 25),
        "work should be shared evenly: {:?}",
        summary.handled_per_worker
    );
}

#[tokio::test(start_paused = true)]
async fn single_worker_processes_backlog_sequentially() {
    let mut cfg = config(20, 1, 1);
    cfg.load_model = LoadModel::Constant { qps: 20 };
    let transport = Arc::new(FakeTransport::ok(Duration::from_millis(200)));

    let summary = LoadTest::new(cfg, transport).unwrap().run().await.unwrap();

    let drain = summary.drain_time.as_secs_f64();
    assert!((2.9..=3.1).contains(&drain), "drain took {}s", drain);
    assert_eq!(summary.handled_per_worker, vec![20]);
}

#[tokio::test(start_paused = true)]
async fn shaper_is_not_consulted_after_the_timing_loop() {
    let queries = Arc::new(AtomicU64::new(0));
    let shaper = {
        let queries = queries.clone();
        move |_: Duration, _: Duration| {
            queries.fetch_add(1, Ordering::SeqCst);
            3u64
        }
    };
    // Slow requests keep the backlog alive long after the loop ends.
    let transport = Arc::new(FakeTransport::ok(Duration::from_secs(2)));

    let summary = LoadTest::new(config(1, 2, 1), transport.clone())
        .unwrap()
        .with_shaper(shaper)
        .run()
        .await
        .unwrap();

    assert_eq!(queries.load(Ordering::SeqCst), 2);
    assert_eq!(summary.dispatch.ticks, 2);
    assert_eq!(summary.dispatch.tokens_dispatched, 6);
    assert_eq!(transport.calls(), 6, "run must wait for the whole backlog");
    assert_eq!(summary.metrics.latencies.len(), 6);
    assert!(summary.drain_time >= Duration::from_secs(9));
}

#[tokio::test(start_paused = true)]
async fn request_deadline_counts_as_timeout_error() {
    let mut cfg = config(3, 1, 3);
    cfg.load_model = LoadModel::Constant { qps: 3 };
    cfg.request_timeout = Some(Duration::from_secs(1));
    let transport = Arc::new(FakeTransport::ok(Duration::from_secs(5)));

    let summary = LoadTest::new(cfg, transport).unwrap().run().await.unwrap();

    assert!(summary.metrics.latencies.is_empty());
    assert_eq!(summary.metrics.error_count, 3);
    assert_eq!(
        summary.metrics.errors_by_category[&ErrorCategory::TimeoutError],
        3
    );
    assert!(summary.metrics.status_codes.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unsupported_method_rejects_tokens_without_requests() {
    let client = build_client(&ClientConfig::default()).unwrap().client;
    let transport = Arc::new(ReqwestTransport::new(
        client,
        "application/x-www-form-urlencoded",
    ));
    let mut cfg = config(10, 2, 2);
    cfg.method = Method::PUT;

    let summary = LoadTest::new(cfg, transport).unwrap().run().await.unwrap();

    let metrics = &summary.metrics;
    assert_eq!(summary.dispatch.tokens_dispatched, 15);
    assert_eq!(metrics.rejected_count, 15);
    assert_eq!(metrics.total(), 0);
    assert_eq!(metrics.error_count, 0);
    assert_eq!(summary.report.rejected_tokens, 15);
    assert_eq!(summary.report.error_rate_percent, 0.0);
}

#[tokio::test(start_paused = true)]
async fn backlog_without_live_workers_is_reported() {
    let mut cfg = config(5, 1, 1);
    cfg.load_model = LoadModel::Constant { qps: 5 };
    let transport = Arc::new(FakeTransport::with(Duration::from_millis(1), |_| {
        panic!("transport blew up")
    }));

    let err = LoadTest::new(cfg, transport)
        .unwrap()
        .run()
        .await
        .unwrap_err();

    match err {
        LoadTestError::DrainStalled { outstanding } => assert_eq!(outstanding, 4),
        other => panic!("expected a stalled drain, got {other}"),
    }
}

#[test]
fn zero_workers_is_rejected_before_running() {
    let transport = Arc::new(FakeTransport::ok(Duration::from_millis(1)));
    let err = LoadTest::new(config(10, 3, 0), transport)
        .err()
        .expect("zero workers must be rejected");
    assert!(matches!(err, LoadTestError::Config(_)), "{err}");
}
