//! Run configuration.
//!
//! Values come from an optional YAML file (`CONFIG_FILE`) overridden by
//! environment variables, falling back to defaults. Precedence: env > yaml >
//! defaults. Every fatal problem is a [`ConfigError`] raised before the run
//! starts.

use std::env;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::client::ClientConfig;
use crate::dispatcher::{DispatchMode, DispatcherConfig};
use crate::load_models::{LoadModel, Step};
use crate::report::ReportFormat;
use crate::utils::parse_duration_string;
use crate::worker::WorkerConfig;

/// Body sent with POST requests when none is configured.
pub const DEFAULT_POST_BODY: &str = "key=value";
pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {field}: '{value}'. {message}")]
    InvalidValue {
        field: &'static str,
        value: String,
        message: String,
    },

    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("{field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Duration in YAML: either a bare number of seconds or a string like "30s".
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum YamlDuration {
    Seconds(u64),
    String(String),
}

impl YamlDuration {
    fn resolve(&self, field: &'static str) -> Result<Duration, ConfigError> {
        match self {
            YamlDuration::Seconds(s) => Ok(Duration::from_secs(*s)),
            YamlDuration::String(s) => {
                parse_duration_string(s).map_err(|message| ConfigError::InvalidValue {
                    field,
                    value: s.clone(),
                    message,
                })
            }
        }
    }
}

/// Load model section of the YAML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum YamlLoadModel {
    Phased,
    Constant { qps: u64 },
    Ramp { min_qps: u64 },
    Steps { steps: Vec<Step> },
}

/// Shape of the YAML configuration file. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub target_url: Option<String>,
    pub method: Option<String>,
    pub body: Option<String>,
    pub content_type: Option<String>,
    pub max_qps: Option<u64>,
    pub duration: Option<YamlDuration>,
    pub workers: Option<usize>,
    pub tick: Option<YamlDuration>,
    pub token_wait: Option<YamlDuration>,
    pub request_timeout: Option<YamlDuration>,
    pub dispatch_mode: Option<DispatchMode>,
    pub load: Option<YamlLoadModel>,
    pub skip_tls_verify: Option<bool>,
    pub custom_headers: Option<String>,
    pub resource_monitor: Option<bool>,
    pub metrics_port: Option<u16>,
    pub report_format: Option<ReportFormat>,
}

impl FileConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

/// Main configuration for the load test.
#[derive(Debug, Clone)]
pub struct Config {
    pub target_url: String,
    pub method: Method,
    pub request_body: Option<String>,
    pub content_type: String,
    pub num_concurrent_tasks: usize,
    pub test_duration: Duration,
    pub tick_period: Duration,
    pub token_wait: Duration,
    pub request_timeout: Option<Duration>,
    pub dispatch_mode: DispatchMode,
    pub load_model: LoadModel,
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
    pub resource_monitor: bool,
    pub metrics_port: Option<u16>,
    pub report_format: ReportFormat,
}

impl Config {
    /// Configuration with every optional value at its default: GET, phased
    /// model, one-second ticks, 30s request deadline, no monitor.
    pub fn new(
        target_url: impl Into<String>,
        max_qps: u64,
        test_duration: Duration,
        num_concurrent_tasks: usize,
    ) -> Self {
        Self {
            target_url: target_url.into(),
            method: Method::GET,
            request_body: None,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            num_concurrent_tasks,
            test_duration,
            tick_period: Duration::from_secs(1),
            token_wait: Duration::from_secs(1),
            request_timeout: Some(Duration::from_secs(30)),
            dispatch_mode: DispatchMode::Burst,
            load_model: LoadModel::Phased { max_qps },
            skip_tls_verify: false,
            custom_headers: None,
            resource_monitor: false,
            metrics_port: None,
            report_format: ReportFormat::Text,
        }
    }

    /// Loads configuration from `CONFIG_FILE` (if set) and environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match env_string("CONFIG_FILE") {
            Some(path) => {
                info!(path = %path, "Loading YAML configuration");
                FileConfig::from_path(path)?
            }
            None => FileConfig::default(),
        };
        Self::from_file_with_env_overrides(file)
    }

    /// Builds a config from a parsed YAML file, letting env vars override it.
    pub fn from_file_with_env_overrides(file: FileConfig) -> Result<Self, ConfigError> {
        let target_url = env_string("TARGET_URL")
            .or(file.target_url)
            .ok_or(ConfigError::Missing("TARGET_URL"))?;

        let method_str = env_string("REQUEST_TYPE")
            .or(file.method)
            .unwrap_or_else(|| "GET".to_string());
        let method = parse_method(&method_str)?;

        let request_body = env_string("REQUEST_BODY").or(file.body);
        let content_type = env_string("CONTENT_TYPE")
            .or(file.content_type)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let max_qps = env_parse::<u64>("MAX_QPS")?.or(file.max_qps).unwrap_or(10);

        let num_concurrent_tasks = env_parse::<usize>("NUM_CONCURRENT_TASKS")?
            .or(file.workers)
            .unwrap_or(1);

        let test_duration = duration_setting("TEST_DURATION", file.duration.as_ref())?
            .unwrap_or(Duration::from_secs(30));
        let tick_period =
            duration_setting("TICK_PERIOD", file.tick.as_ref())?.unwrap_or(Duration::from_secs(1));
        let token_wait = duration_setting("TOKEN_WAIT", file.token_wait.as_ref())?
            .unwrap_or(Duration::from_secs(1));

        // Zero disables the worker-side deadline.
        let request_timeout =
            match duration_setting("REQUEST_TIMEOUT", file.request_timeout.as_ref())? {
                Some(d) if d.is_zero() => None,
                Some(d) => Some(d),
                None => Some(Duration::from_secs(30)),
            };

        let dispatch_mode = match env_string("DISPATCH_MODE") {
            Some(s) => parse_dispatch_mode(&s)?,
            None => file.dispatch_mode.unwrap_or_default(),
        };

        let load_model = match env_string("LOAD_MODEL_TYPE") {
            Some(model_type) => Self::parse_load_model(&model_type, max_qps)?,
            None => match file.load {
                None | Some(YamlLoadModel::Phased) => LoadModel::Phased { max_qps },
                Some(YamlLoadModel::Constant { qps }) => LoadModel::Constant { qps },
                Some(YamlLoadModel::Ramp { min_qps }) => LoadModel::Ramp { min_qps, max_qps },
                Some(YamlLoadModel::Steps { steps }) => LoadModel::Steps(steps),
            },
        };

        let skip_tls_verify = env_bool("SKIP_TLS_VERIFY")
            .or(file.skip_tls_verify)
            .unwrap_or(false);
        let custom_headers = env_string("CUSTOM_HEADERS").or(file.custom_headers);
        let resource_monitor = env_bool("RESOURCE_MONITOR")
            .or(file.resource_monitor)
            .unwrap_or(true);
        let metrics_port = env_parse::<u16>("METRICS_PORT")?.or(file.metrics_port);

        let report_format = match env_string("REPORT_FORMAT") {
            Some(s) => s.parse().map_err(|message| ConfigError::InvalidValue {
                field: "REPORT_FORMAT",
                value: s.clone(),
                message,
            })?,
            None => file.report_format.unwrap_or_default(),
        };

        let config = Config {
            target_url,
            method,
            request_body,
            content_type,
            num_concurrent_tasks,
            test_duration,
            tick_period,
            token_wait,
            request_timeout,
            dispatch_mode,
            load_model,
            skip_tls_verify,
            custom_headers,
            resource_monitor,
            metrics_port,
            report_format,
        };
        config.validate()?;
        Ok(config)
    }

    fn parse_load_model(model_type: &str, max_qps: u64) -> Result<LoadModel, ConfigError> {
        match model_type.to_lowercase().as_str() {
            "phased" => Ok(LoadModel::Phased { max_qps }),
            "constant" => {
                let qps = env_parse::<u64>("TARGET_QPS")?
                    .ok_or(ConfigError::Missing("TARGET_QPS (Constant model)"))?;
                Ok(LoadModel::Constant { qps })
            }
            "ramp" => {
                let min_qps = env_parse::<u64>("MIN_QPS")?
                    .ok_or(ConfigError::Missing("MIN_QPS (Ramp model)"))?;
                Ok(LoadModel::Ramp { min_qps, max_qps })
            }
            _ => Err(ConfigError::InvalidValue {
                field: "LOAD_MODEL_TYPE",
                value: model_type.to_string(),
                message: "Expected one of: Phased, Constant, Ramp".to_string(),
            }),
        }
    }

    /// Rejects configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url(&self.target_url)?;

        if self.num_concurrent_tasks == 0 {
            return Err(ConfigError::invalid(
                "NUM_CONCURRENT_TASKS",
                "at least one worker is required",
            ));
        }
        if self.test_duration.is_zero() {
            return Err(ConfigError::invalid(
                "TEST_DURATION",
                "test duration must be positive",
            ));
        }
        if std::time::Instant::now()
            .checked_add(self.test_duration)
            .is_none()
        {
            return Err(ConfigError::invalid(
                "TEST_DURATION",
                "test duration is too long to schedule",
            ));
        }
        if self.tick_period.is_zero() {
            return Err(ConfigError::invalid(
                "TICK_PERIOD",
                "tick period must be positive",
            ));
        }
        if self.token_wait.is_zero() {
            return Err(ConfigError::invalid(
                "TOKEN_WAIT",
                "token wait must be positive",
            ));
        }
        if let LoadModel::Steps(steps) = &self.load_model {
            if steps.is_empty() {
                return Err(ConfigError::invalid("load.steps", "at least one step is required"));
            }
            if steps.windows(2).any(|w| w[0].until_fraction >= w[1].until_fraction) {
                return Err(ConfigError::invalid(
                    "load.steps",
                    "until_fraction must be strictly increasing",
                ));
            }
        }

        Ok(())
    }

    /// POST gets the configured body or the default form body; GET sends none.
    pub fn effective_body(&self) -> Option<String> {
        if self.method == Method::POST {
            Some(
                self.request_body
                    .clone()
                    .unwrap_or_else(|| DEFAULT_POST_BODY.to_string()),
            )
        } else {
            None
        }
    }

    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            skip_tls_verify: self.skip_tls_verify,
            custom_headers: self.custom_headers.clone(),
            request_timeout: self.request_timeout,
            ..ClientConfig::default()
        }
    }

    pub fn to_worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            method: self.method.clone(),
            url: self.target_url.clone(),
            body: self.effective_body(),
            token_wait: self.token_wait,
            request_timeout: self.request_timeout,
        }
    }

    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            total_duration: self.test_duration,
            tick: self.tick_period,
            mode: self.dispatch_mode,
        }
    }

    /// Logs the configuration summary.
    pub fn print_summary(&self) {
        info!(
            target_url = %self.target_url,
            method = %self.method,
            workers = self.num_concurrent_tasks,
            duration_secs = self.test_duration.as_secs_f64(),
            tick_ms = self.tick_period.as_millis() as u64,
            load_model = ?self.load_model,
            peak_qps = self.load_model.peak_qps(),
            dispatch_mode = ?self.dispatch_mode,
            request_timeout = ?self.request_timeout,
            skip_tls_verify = self.skip_tls_verify,
            custom_headers = self.custom_headers.is_some(),
            "Starting load test with {} requests",
            self.method
        );
    }
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    if url.is_empty() {
        return Err(ConfigError::invalid("TARGET_URL", "URL cannot be empty"));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::invalid(
            "TARGET_URL",
            format!("URL must start with http:// or https://, got: {}", url),
        ));
    }
    if url.contains(' ') {
        return Err(ConfigError::invalid("TARGET_URL", "URL cannot contain spaces"));
    }
    Ok(())
}

fn parse_method(s: &str) -> Result<Method, ConfigError> {
    Method::from_bytes(s.trim().to_uppercase().as_bytes()).map_err(|e| ConfigError::InvalidValue {
        field: "REQUEST_TYPE",
        value: s.to_string(),
        message: e.to_string(),
    })
}

fn parse_dispatch_mode(s: &str) -> Result<DispatchMode, ConfigError> {
    match s.trim().to_lowercase().as_str() {
        "burst" => Ok(DispatchMode::Burst),
        "spread" => Ok(DispatchMode::Spread),
        _ => Err(ConfigError::InvalidValue {
            field: "DISPATCH_MODE",
            value: s.to_string(),
            message: "Expected 'burst' or 'spread'".to_string(),
        }),
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    env_string(name).map(|v| v.trim().eq_ignore_ascii_case("true"))
}

fn env_parse<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    env_string(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                field: name,
                value: raw.clone(),
                message: e.to_string(),
            })
        })
        .transpose()
}

fn duration_setting(
    name: &'static str,
    file_value: Option<&YamlDuration>,
) -> Result<Option<Duration>, ConfigError> {
    if let Some(raw) = env_string(name) {
        return parse_duration_string(&raw)
            .map(Some)
            .map_err(|message| ConfigError::InvalidValue {
                field: name,
                value: raw,
                message,
            });
    }
    file_value.map(|d| d.resolve(name)).transpose()
}
