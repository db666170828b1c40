use anyhow::Context;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::jobs::{Backoff, DispatcherConfig, RetryPolicy};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// A static API key and the principal it authenticates as.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub token: String,
    pub organization_id: Uuid,
    pub subject: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub processor_api_url: String,
    pub processor_secret_key: String,
    pub processor_webhook_secret: String,
    pub webhook_tolerance_secs: i64,
    pub account_sync_ttl_secs: i64,
    pub job_concurrency: usize,
    pub job_max_attempts: u32,
    pub job_backoff_base_ms: u64,
    pub job_backoff_max_ms: u64,
    pub job_poll_interval_ms: u64,
    pub currency: String,
    pub api_keys: Vec<ApiKey>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env_or("SERVER_PORT", 3000)?,
            database_url: required("DATABASE_URL")?,
            processor_api_url: env::var("PROCESSOR_API_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            processor_secret_key: required("PROCESSOR_SECRET_KEY")?,
            processor_webhook_secret: required("PROCESSOR_WEBHOOK_SECRET")?,
            webhook_tolerance_secs: env_or("WEBHOOK_TOLERANCE_SECS", 300)?,
            account_sync_ttl_secs: env_or("ACCOUNT_SYNC_TTL_SECS", 300)?,
            job_concurrency: env_or("JOB_CONCURRENCY", 4)?,
            job_max_attempts: env_or("JOB_MAX_ATTEMPTS", 5)?,
            job_backoff_base_ms: env_or("JOB_BACKOFF_BASE_MS", 1_000)?,
            job_backoff_max_ms: env_or("JOB_BACKOFF_MAX_MS", 300_000)?,
            job_poll_interval_ms: env_or("JOB_POLL_INTERVAL_MS", 500)?,
            currency: env::var("CURRENCY")
                .unwrap_or_else(|_| "usd".to_string())
                .to_lowercase(),
            api_keys: parse_api_keys(&env::var("API_KEYS").unwrap_or_default())?,
            log_format: parse_log_format(&env::var("LOG_FORMAT").unwrap_or_default()),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.job_max_attempts,
            Backoff::Exponential {
                base: Duration::from_millis(self.job_backoff_base_ms),
                max: Duration::from_millis(self.job_backoff_max_ms),
            },
        )
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            concurrency: self.job_concurrency.max(1),
            poll_interval: Duration::from_millis(self.job_poll_interval_ms),
            ..DispatcherConfig::default()
        }
    }

    pub fn account_sync_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.account_sync_ttl_secs)
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).with_context(|| format!("{} must be set", key))
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

fn parse_log_format(raw: &str) -> LogFormat {
    if raw.trim().eq_ignore_ascii_case("json") {
        LogFormat::Json
    } else {
        LogFormat::Text
    }
}

/// `token:organization_id[:subject]`, comma separated.
fn parse_api_keys(raw: &str) -> anyhow::Result<Vec<ApiKey>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let mut parts = entry.splitn(3, ':');
            let token = parts.next().unwrap_or_default().trim();
            let organization = parts
                .next()
                .with_context(|| "API_KEYS entries must be token:organization_id[:subject]")?;
            if token.is_empty() {
                anyhow::bail!("API_KEYS entry has an empty token");
            }
            let organization_id = Uuid::parse_str(organization.trim())
                .with_context(|| format!("API_KEYS has an invalid organization id '{}'", organization))?;
            let subject = parts
                .next()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "api-key".to_string());
            Ok(ApiKey {
                token: token.to_string(),
                organization_id,
                subject,
            })
        })
        .collect()
}
