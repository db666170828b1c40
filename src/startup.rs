use crate::config::Config;
use anyhow::{Context, Result};
use sqlx::PgPool;
use std::time::Duration;

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub processor: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// The processor being unreachable degrades the service but does not
    /// stop it from accepting webhooks.
    pub fn is_valid(&self) -> bool {
        self.environment && self.database
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Processor Reachable:   {}", status(self.processor));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }
        if !self.warnings.is_empty() {
            println!("\nWarnings:");
            for warning in &self.warnings {
                println!("  ⚠️  {}", warning);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        processor: true,
        errors: Vec::new(),
        warnings: env_warnings(config),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    if let Err(e) = validate_processor(&config.processor_api_url).await {
        report.processor = false;
        report.errors.push(format!("Processor: {}", e));
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.processor_secret_key.is_empty() {
        anyhow::bail!("PROCESSOR_SECRET_KEY is empty");
    }
    if config.processor_webhook_secret.is_empty() {
        anyhow::bail!("PROCESSOR_WEBHOOK_SECRET is empty");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.webhook_tolerance_secs <= 0 {
        anyhow::bail!("WEBHOOK_TOLERANCE_SECS must be greater than 0");
    }
    if config.job_backoff_base_ms > config.job_backoff_max_ms {
        anyhow::bail!("JOB_BACKOFF_BASE_MS must not exceed JOB_BACKOFF_MAX_MS");
    }
    if config.currency.len() != 3 || !config.currency.chars().all(|c| c.is_ascii_alphabetic()) {
        anyhow::bail!("CURRENCY must be a three-letter ISO code");
    }

    url::Url::parse(&config.processor_api_url)
        .context("PROCESSOR_API_URL is not a valid URL")?;

    Ok(())
}

fn env_warnings(config: &Config) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.api_keys.is_empty() {
        warnings.push("API_KEYS is empty; authenticated endpoints will reject every request".to_string());
    }
    if config.account_sync_ttl_secs <= 0 {
        warnings.push("ACCOUNT_SYNC_TTL_SECS <= 0; every status check will call the processor".to_string());
    }
    warnings
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

/// Any HTTP response counts as reachable; only transport failures fail.
async fn validate_processor(api_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let response = client
        .get(api_url)
        .send()
        .await
        .context("Failed to connect to processor API")?;

    if response.status().is_server_error() {
        anyhow::bail!("Processor API returned status: {}", response.status());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;

    fn config() -> Config {
        Config {
            server_port: 3000,
            database_url: "postgres://localhost:5432/test".to_string(),
            processor_api_url: "https://api.stripe.com".to_string(),
            processor_secret_key: "sk_test_123".to_string(),
            processor_webhook_secret: "whsec_123".to_string(),
            webhook_tolerance_secs: 300,
            account_sync_ttl_secs: 300,
            job_concurrency: 4,
            job_max_attempts: 5,
            job_backoff_base_ms: 1_000,
            job_backoff_max_ms: 300_000,
            job_poll_interval_ms: 500,
            currency: "usd".to_string(),
            api_keys: Vec::new(),
            log_format: LogFormat::Text,
        }
    }

    #[test]
    fn test_validate_env_vars_accepts_defaults() {
        assert!(validate_env_vars(&config()).is_ok());
    }

    #[test]
    fn test_validate_env_vars_empty_database_url() {
        let config = Config {
            database_url: String::new(),
            ..config()
        };
        assert!(validate_env_vars(&config).is_err());
    }

    #[test]
    fn test_validate_env_vars_invalid_url() {
        let config = Config {
            processor_api_url: "not-a-url".to_string(),
            ..config()
        };
        assert!(validate_env_vars(&config).is_err());
    }

    #[test]
    fn test_validate_env_vars_inverted_backoff() {
        let config = Config {
            job_backoff_base_ms: 10_000,
            job_backoff_max_ms: 1_000,
            ..config()
        };
        assert!(validate_env_vars(&config).is_err());
    }

    #[test]
    fn test_missing_api_keys_is_a_warning() {
        let warnings = env_warnings(&config());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("API_KEYS"));
    }

    #[tokio::test]
    async fn test_validate_processor_reachable() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/").with_status(404).create_async().await;

        assert!(validate_processor(&server.url()).await.is_ok());
        mock.assert_async().await;
    }
}
