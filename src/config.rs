// Settings for the whole tool, read once at startup from environment
// variables (a `.env` file next to the binary is loaded first by `main`).
// Components never read the environment themselves; each one gets its own
// immutable slice of these settings when it is constructed.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::api::ClientConfig;
use crate::pool::PoolConfig;
use crate::retry::{Backoff, RetryPolicy};

pub const DEFAULT_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_LOG_FILE: &str = "label_studio_tool.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Full,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(LogFormat::Full),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => bail!("unknown log format `{other}` (expected full, compact or json)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub file: PathBuf,
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub url: String,
    pub token: String,
    pub timeout: Duration,
    pub page_size: usize,

    pub api_max_retries: u32,
    pub api_retry_delay: Duration,
    pub api_retry_backoff: u32,
    pub api_retry_max_delay: Duration,
    pub upload_attempts: u32,

    pub num_workers: usize,
    pub worker_start_delay: Duration,
    pub upload_min_delay: Duration,
    pub upload_max_delay: Duration,
    pub upload_max_retries: u32,
    pub upload_retry_delay: Duration,
    pub redrive_passes: usize,

    pub strict_lookup: bool,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup. Missing keys fall back
    /// to defaults; only the token is required.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let token = match get("LABEL_STUDIO_TOKEN") {
            Some(t) => t.trim().to_string(),
            None => bail!("LABEL_STUDIO_TOKEN is not set"),
        };

        let settings = Settings {
            url: get("LABEL_STUDIO_URL").unwrap_or_else(|| DEFAULT_URL.into()),
            token,
            timeout: Duration::from_secs(parse_or(&get, "LABEL_STUDIO_TIMEOUT_SECS", 30)?),
            page_size: parse_or(&get, "LABEL_STUDIO_PAGE_SIZE", 100)?,

            api_max_retries: parse_or(&get, "API_MAX_RETRIES", 5)?,
            api_retry_delay: millis_or(&get, "API_RETRY_DELAY_MS", 1_000)?,
            api_retry_backoff: parse_or(&get, "API_RETRY_BACKOFF", 2)?,
            api_retry_max_delay: millis_or(&get, "API_RETRY_MAX_DELAY_MS", 60_000)?,
            upload_attempts: parse_or(&get, "UPLOAD_ATTEMPTS", 3)?,

            num_workers: parse_or(&get, "UPLOAD_WORKERS", 15)?,
            worker_start_delay: millis_or(&get, "WORKER_START_DELAY_MS", 600)?,
            upload_min_delay: millis_or(&get, "UPLOAD_MIN_DELAY_MS", 50)?,
            upload_max_delay: millis_or(&get, "UPLOAD_MAX_DELAY_MS", 250)?,
            upload_max_retries: parse_or(&get, "UPLOAD_MAX_RETRIES", 5)?,
            upload_retry_delay: millis_or(&get, "UPLOAD_RETRY_DELAY_MS", 2_000)?,
            redrive_passes: parse_or(&get, "UPLOAD_REDRIVE_PASSES", 1)?,

            strict_lookup: parse_or(&get, "STRICT_PROJECT_LOOKUP", false)?,
            logging: LoggingSettings {
                file: get("LOG_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
                level: get("LOG_LEVEL").unwrap_or_else(|| "info".into()),
                format: match get("LOG_FORMAT") {
                    Some(v) => v.parse()?,
                    None => LogFormat::Full,
                },
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            bail!("UPLOAD_WORKERS must be at least 1");
        }
        if self.page_size == 0 {
            bail!("LABEL_STUDIO_PAGE_SIZE must be at least 1");
        }
        if self.upload_min_delay > self.upload_max_delay {
            bail!(
                "UPLOAD_MIN_DELAY_MS ({}) is greater than UPLOAD_MAX_DELAY_MS ({})",
                self.upload_min_delay.as_millis(),
                self.upload_max_delay.as_millis()
            );
        }
        Ok(())
    }

    /// Exponential policy for project and task calls.
    pub fn api_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.api_max_retries,
            Backoff::Exponential {
                base: self.api_retry_delay,
                factor: self.api_retry_backoff,
                max: self.api_retry_max_delay,
            },
        )
    }

    /// Jittered policy for a single file import.
    pub fn upload_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.upload_attempts,
            Backoff::Jitter {
                min: self.upload_min_delay,
                max: self.upload_max_delay,
            },
        )
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.url.clone(),
            token: self.token.clone(),
            timeout: self.timeout,
            page_size: self.page_size,
            retry: self.api_retry(),
            upload_retry: self.upload_retry(),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.num_workers,
            start_delay: self.worker_start_delay,
            min_delay: self.upload_min_delay,
            max_delay: self.upload_max_delay,
            max_retries: self.upload_max_retries,
            retry_delay: self.upload_retry_delay,
            redrive_passes: self.redrive_passes,
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: `{raw}`")),
        None => Ok(default),
    }
}

fn millis_or<G>(get: &G, key: &str, default: u64) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default).map(Duration::from_millis)
}
