use std::env;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use qps_loadtest::client::build_client;
use qps_loadtest::config::Config;
use qps_loadtest::metrics::{register_metrics, start_metrics_server};
use qps_loadtest::runner::LoadTest;
use qps_loadtest::transport::ReqwestTransport;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Required environment variables:");
    eprintln!(
        "  TARGET_URL              - The URL to load test (must start with http:// or https://)"
    );
    eprintln!();
    eprintln!("Optional environment variables:");
    eprintln!("  REQUEST_TYPE            - HTTP method: GET or POST (default: GET)");
    eprintln!("  REQUEST_BODY            - POST body (default: key=value)");
    eprintln!("  CONTENT_TYPE            - POST content type (default: application/x-www-form-urlencoded)");
    eprintln!("  MAX_QPS                 - Peak queries per second (default: 10)");
    eprintln!("  TEST_DURATION           - Test duration: 30, 30s, 10m, 2h (default: 30s)");
    eprintln!("  NUM_CONCURRENT_TASKS    - Number of concurrent workers (default: 1, must be > 0)");
    eprintln!("  TICK_PERIOD             - Scheduling tick (default: 1s)");
    eprintln!("  TOKEN_WAIT              - Worker wait for a token before re-checking stop (default: 1s)");
    eprintln!("  REQUEST_TIMEOUT         - Per-request deadline, 0 disables (default: 30s)");
    eprintln!("  DISPATCH_MODE           - burst or spread (default: burst)");
    eprintln!();
    eprintln!("Load model configuration:");
    eprintln!("  LOAD_MODEL_TYPE         - Phased, Constant, or Ramp (default: Phased)");
    eprintln!("    Phased: 50% of MAX_QPS, then 100%, then 75% over equal thirds");
    eprintln!("    Constant model requires:");
    eprintln!("      TARGET_QPS          - Fixed queries per second");
    eprintln!("    Ramp model requires:");
    eprintln!("      MIN_QPS             - Starting and ending queries per second");
    eprintln!();
    eprintln!("Other configuration:");
    eprintln!("  CONFIG_FILE             - YAML file with base settings (env overrides it)");
    eprintln!("  SKIP_TLS_VERIFY         - Skip TLS certificate verification (default: false)");
    eprintln!("  CUSTOM_HEADERS          - Comma-separated headers (use \\, for literal commas)");
    eprintln!("  RESOURCE_MONITOR        - Log CPU/memory usage every second (default: true)");
    eprintln!("  METRICS_PORT            - Serve Prometheus metrics on this port (default: off)");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: qps_loadtest)");
    eprintln!("  REPORT_FORMAT           - text or json (default: text)");
    eprintln!("  RUST_LOG / LOG_FORMAT   - Log filter (default: info) / json for JSON logs");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // Logs go to stderr so stdout carries only the report.
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();
    register_metrics()?;

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(1);
        }
    };

    if let Some(port) = config.metrics_port {
        tokio::spawn(start_metrics_server(port));
    }

    let client = build_client(&config.to_client_config())?.client;
    let transport = Arc::new(ReqwestTransport::new(client, config.content_type.clone()));

    let report_format = config.report_format;
    let summary = LoadTest::new(config, transport)?.run().await?;

    println!("{}", summary.report.render(report_format)?);
    Ok(())
}
