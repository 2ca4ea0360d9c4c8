use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::utils::parse_headers_with_escapes;

/// Configuration for building the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
    pub request_timeout: Option<Duration>,
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
    pub tcp_keepalive: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            skip_tls_verify: false,
            custom_headers: None,
            request_timeout: None,
            max_idle_per_host: 32,
            idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Some(Duration::from_secs(60)),
        }
    }
}

/// Result of building the client, includes parsed headers for logging.
pub struct ClientBuildResult {
    pub client: reqwest::Client,
    pub parsed_headers: HeaderMap,
}

/// Builds a reqwest HTTP client with the specified configuration.
pub fn build_client(
    config: &ClientConfig,
) -> Result<ClientBuildResult, Box<dyn std::error::Error + Send + Sync>> {
    let mut client_builder = reqwest::Client::builder()
        .pool_max_idle_per_host(config.max_idle_per_host)
        .pool_idle_timeout(config.idle_timeout);

    if let Some(keepalive) = config.tcp_keepalive {
        client_builder = client_builder.tcp_keepalive(keepalive);
    }

    if let Some(timeout) = config.request_timeout {
        client_builder = client_builder.timeout(timeout);
    }

    let parsed_headers = configure_custom_headers(config.custom_headers.as_deref())?;
    if !parsed_headers.is_empty() {
        client_builder = client_builder.default_headers(parsed_headers.clone());
        info!(count = parsed_headers.len(), "Configured custom default headers");
    }

    let client = if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?
    } else {
        client_builder.build()?
    };

    Ok(ClientBuildResult {
        client,
        parsed_headers,
    })
}

fn configure_custom_headers(
    custom_headers_str: Option<&str>,
) -> Result<HeaderMap, Box<dyn std::error::Error + Send + Sync>> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match custom_headers_str {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for header_pair in parse_headers_with_escapes(headers_str) {
        let header_pair = header_pair.trim();

        let (name_str, value_str) = header_pair.split_once(':').ok_or_else(|| {
            format!(
                "Invalid header format in CUSTOM_HEADERS: '{}'. Expected 'Name:Value'.",
                header_pair
            )
        })?;

        let name_str = name_str.trim();
        if name_str.is_empty() {
            return Err(format!(
                "Invalid header format: Header name cannot be empty in '{}'.",
                header_pair
            )
            .into());
        }

        let header_name = HeaderName::from_str(name_str)
            .map_err(|e| format!("Invalid header name: {}. Name: '{}'", e, name_str))?;
        let header_value = HeaderValue::from_str(value_str.trim()).map_err(|e| {
            format!(
                "Invalid header value for '{}': {}. Value: '{}'",
                name_str, e, value_str
            )
        })?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}
