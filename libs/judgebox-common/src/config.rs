//! Service configuration loaded from the environment.
//!
//! Every knob has a default so a bare `judgebox-api` starts against a local
//! Docker daemon with an in-memory store.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0:3000";
pub const DEFAULT_QUEUE_DEPTH: usize = 64;
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 50;
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub bind_addr: String,
    /// Collaborator stores live in Redis when set, in memory otherwise
    pub redis_url: Option<String>,
    pub max_concurrency: usize,
    pub queue_depth: usize,
    /// Parent directory for per-execution workspaces (system temp dir if unset)
    pub workspace_root: Option<PathBuf>,
    pub sample_interval: Duration,
    pub output_limit_bytes: usize,
    /// Optional `languages.json` overriding the built-in language profiles
    pub languages_path: Option<PathBuf>,
    /// Optional JSON fixtures seeding the in-memory store
    pub fixtures_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.to_string(),
            redis_url: None,
            max_concurrency: default_concurrency(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            workspace_root: None,
            sample_interval: Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS),
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            languages_path: None,
            fixtures_path: None,
            log_format: LogFormat::Pretty,
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(bind) = get("JUDGEBOX_BIND") {
            config.bind_addr = bind;
        }
        config.redis_url = get("REDIS_URL");

        if let Some(raw) = get("JUDGEBOX_MAX_CONCURRENCY") {
            config.max_concurrency = parse_positive("JUDGEBOX_MAX_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = get("JUDGEBOX_QUEUE_DEPTH") {
            config.queue_depth = parse_number("JUDGEBOX_QUEUE_DEPTH", &raw)?;
        }
        if let Some(raw) = get("JUDGEBOX_SAMPLE_INTERVAL_MS") {
            let ms: u64 = parse_positive("JUDGEBOX_SAMPLE_INTERVAL_MS", &raw)?;
            config.sample_interval = Duration::from_millis(ms);
        }
        if let Some(raw) = get("JUDGEBOX_OUTPUT_LIMIT_BYTES") {
            config.output_limit_bytes = parse_positive("JUDGEBOX_OUTPUT_LIMIT_BYTES", &raw)?;
        }

        config.workspace_root = get("JUDGEBOX_WORKSPACE_ROOT").map(PathBuf::from);
        config.languages_path = get("JUDGEBOX_LANGUAGES").map(PathBuf::from);
        config.fixtures_path = get("JUDGEBOX_FIXTURES").map(PathBuf::from);

        if let Some(raw) = get("JUDGEBOX_LOG_FORMAT") {
            config.log_format = match raw.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "JUDGEBOX_LOG_FORMAT",
                        value: raw,
                        reason: "expected `json` or `pretty`".to_string(),
                    })
                }
            };
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_positive<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value: T = parse_number(var, raw)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
