// src/config/bot.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::ingest::http::{BasicAuth, FetchPolicy};
use crate::notify::slack::DEFAULT_CHANNEL;
use crate::notify::SendPolicy;
use crate::scheduler::SchedulerConfig;

pub const ENV_CONFIG_PATH: &str = "BOT_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/bot.toml";
/// Upper bound for `retention_days` (ten years).
pub const MAX_RETENTION_DAYS: i64 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" | "" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow!("unknown log format {other:?}")),
        }
    }
}

/// Runtime settings. Precedence: defaults < TOML file < environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub slack_token: Option<String>,
    pub slack_channel: String,
    pub slack_api_base: Option<String>,
    /// Sign-up form linked from the "Find teammates" button.
    pub team_form_url: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub kaggle_username: Option<String>,
    pub kaggle_key: Option<String>,
    pub poll_interval_secs: u64,
    pub failure_wait_secs: u64,
    pub snapshot_path: PathBuf,
    /// Append-only log file; `None` logs to the console only.
    pub log_file: Option<PathBuf>,
    pub log_format: LogFormat,
    pub http_timeout_secs: u64,
    /// Attempts per request, first try included.
    pub http_max_retries: u8,
    pub request_spacing_ms: u64,
    pub kaggle_fetch_images: bool,
    pub dacon_fetch_periods: bool,
    pub silent_first_run: bool,
    pub retention_days: i64,
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            slack_token: None,
            slack_channel: DEFAULT_CHANNEL.to_string(),
            slack_api_base: None,
            team_form_url: None,
            discord_webhook_url: None,
            kaggle_username: None,
            kaggle_key: None,
            poll_interval_secs: 60,
            failure_wait_secs: 60,
            snapshot_path: PathBuf::from("data/main/competition_data.json"),
            log_file: Some(PathBuf::from("data/main/competition_bot.log")),
            log_format: LogFormat::Compact,
            http_timeout_secs: 10,
            http_max_retries: 3,
            request_spacing_ms: 1000,
            kaggle_fetch_images: false,
            dacon_fetch_periods: true,
            silent_first_run: false,
            retention_days: 7,
            metrics_addr: None,
        }
    }
}

impl BotConfig {
    /// Load using `$BOT_CONFIG_PATH` (must exist if set), else `config/bot.toml`
    /// when present, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
                }
                Self::load_from_file(&pb)?
            }
            Err(_) => {
                let p = Path::new(DEFAULT_CONFIG_PATH);
                if p.exists() {
                    Self::load_from_file(p)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env(|k| std::env::var(k).ok())?;
        Ok(cfg.sanitized())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Override fields from `lookup` (normally the process environment).
    /// An empty value clears optional settings.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let opt = |k: &str| lookup(k).map(|v| v.trim().to_string());

        set_opt_string(&mut self.slack_token, opt("SLACK_TOKEN"));
        if let Some(v) = opt("SLACK_CHANNEL").filter(|v| !v.is_empty()) {
            self.slack_channel = v;
        }
        set_opt_string(&mut self.slack_api_base, opt("SLACK_API_BASE"));
        set_opt_string(&mut self.team_form_url, opt("TEAM_FORM_URL"));
        set_opt_string(&mut self.discord_webhook_url, opt("DISCORD_WEBHOOK_URL"));
        set_opt_string(&mut self.kaggle_username, opt("KAGGLE_USERNAME"));
        set_opt_string(&mut self.kaggle_key, opt("KAGGLE_KEY"));

        if let Some(v) = parse_env(&opt, "POLL_INTERVAL_SECS")? {
            self.poll_interval_secs = v;
        }
        if let Some(v) = parse_env(&opt, "FAILURE_WAIT_SECS")? {
            self.failure_wait_secs = v;
        }
        if let Some(v) = opt("SNAPSHOT_PATH").filter(|v| !v.is_empty()) {
            self.snapshot_path = PathBuf::from(v);
        }
        if let Some(v) = opt("LOG_FILE") {
            self.log_file = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = parse_env(&opt, "LOG_FORMAT")? {
            self.log_format = v;
        }
        if let Some(v) = parse_env(&opt, "HTTP_TIMEOUT_SECS")? {
            self.http_timeout_secs = v;
        }
        if let Some(v) = parse_env(&opt, "HTTP_MAX_RETRIES")? {
            self.http_max_retries = v;
        }
        if let Some(v) = parse_env(&opt, "REQUEST_SPACING_MS")? {
            self.request_spacing_ms = v;
        }
        if let Some(v) = parse_flag(&opt, "KAGGLE_FETCH_IMAGES")? {
            self.kaggle_fetch_images = v;
        }
        if let Some(v) = parse_flag(&opt, "DACON_FETCH_PERIODS")? {
            self.dacon_fetch_periods = v;
        }
        if let Some(v) = parse_flag(&opt, "SILENT_FIRST_RUN")? {
            self.silent_first_run = v;
        }
        if let Some(v) = parse_env(&opt, "RETENTION_DAYS")? {
            self.retention_days = v;
        }
        if let Some(v) = opt("METRICS_ADDR") {
            self.metrics_addr = if v.is_empty() {
                None
            } else {
                Some(v.parse().with_context(|| format!("invalid METRICS_ADDR {v:?}"))?)
            };
        }
        Ok(())
    }

    /// Clamp values that would stall or spin the loop.
    pub fn sanitized(mut self) -> Self {
        self.poll_interval_secs = self.poll_interval_secs.max(1);
        self.failure_wait_secs = self.failure_wait_secs.max(1);
        self.http_timeout_secs = self.http_timeout_secs.max(1);
        self.http_max_retries = self.http_max_retries.clamp(1, 10);
        self.retention_days = self.retention_days.clamp(0, MAX_RETENTION_DAYS);
        self
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            timeout: Duration::from_secs(self.http_timeout_secs),
            max_attempts: self.http_max_retries,
            min_spacing: Duration::from_millis(self.request_spacing_ms),
            ..FetchPolicy::default()
        }
    }

    pub fn send_policy(&self) -> SendPolicy {
        SendPolicy {
            timeout: Duration::from_secs(self.http_timeout_secs),
            max_attempts: self.http_max_retries,
            ..SendPolicy::default()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            failure_wait: Duration::from_secs(self.failure_wait_secs),
            retention: chrono::Duration::days(self.retention_days.clamp(0, MAX_RETENTION_DAYS)),
            silent_first_run: self.silent_first_run,
        }
    }

    pub fn kaggle_auth(&self) -> Option<BasicAuth> {
        crate::ingest::providers::kaggle::resolve_credentials(
            self.kaggle_username.clone(),
            self.kaggle_key.clone(),
        )
    }
}

fn set_opt_string(slot: &mut Option<String>, v: Option<String>) {
    if let Some(v) = v {
        *slot = (!v.is_empty()).then_some(v);
    }
}

fn parse_env<T, F>(opt: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match opt(key).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid {key} {v:?}: {e}")),
    }
}

fn parse_flag<F>(opt: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    match opt(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(anyhow!("invalid {key} {v:?}: expected a boolean")),
        },
    }
}
