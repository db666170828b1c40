use clap::{Parser, Subcommand};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::adapters::postgres::PostgresMerchantAccountRepository;
use crate::config::Config;
use crate::jobs::{JobQueue, PgJobQueue};
use crate::processor::HttpProcessorClient;
use crate::realtime::RealtimeHub;
use crate::services::AccountSyncService;

#[derive(Parser)]
#[command(name = "tillsync")]
#[command(about = "Tillsync - payment reconciliation and fund distribution", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and job workers (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Dead-letter queue commands
    #[command(subcommand)]
    Jobs(JobCommands),

    /// Merchant account commands
    #[command(subcommand)]
    Accounts(AccountCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum JobCommands {
    /// List dead-lettered jobs, most recent first
    ListDead {
        #[arg(short, long, default_value_t = 50)]
        limit: i64,
    },

    /// Put a dead job back on its queue with a fresh attempt budget
    Requeue {
        #[arg(value_name = "JOB_ID")]
        job_id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Pull the organization's merchant account from the processor now
    Sync {
        #[arg(value_name = "ORGANIZATION_ID")]
        organization_id: Uuid,
    },
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

pub async fn handle_jobs_list_dead(pool: &PgPool, limit: i64) -> anyhow::Result<()> {
    let queue = PgJobQueue::new(pool.clone());
    let jobs = queue.list_dead(limit.max(1)).await?;

    if jobs.is_empty() {
        println!("No dead jobs");
        return Ok(());
    }

    println!("{:<38} {:<16} {:<9} {:<20} {}", "Job", "Queue", "Attempts", "Failed at", "Last error");
    println!("{}", "-".repeat(110));
    for job in jobs {
        println!(
            "{:<38} {:<16} {:<9} {:<20} {}",
            job.id,
            job.queue,
            format!("{}/{}", job.attempts, job.max_attempts),
            job.updated_at.format("%Y-%m-%d %H:%M:%S"),
            job.last_error.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

pub async fn handle_jobs_requeue(pool: &PgPool, job_id: Uuid) -> anyhow::Result<()> {
    let queue = PgJobQueue::new(pool.clone());
    if !queue.requeue_dead(job_id).await? {
        tracing::warn!(job_id = %job_id, "Dead job not found");
        anyhow::bail!("Dead job {} not found", job_id);
    }

    tracing::info!(job_id = %job_id, "Dead job requeued");
    println!("✓ Job {} requeued", job_id);
    Ok(())
}

pub async fn handle_accounts_sync(
    config: &Config,
    pool: &PgPool,
    organization_id: Uuid,
) -> anyhow::Result<()> {
    let processor = HttpProcessorClient::new(
        config.processor_api_url.clone(),
        config.processor_secret_key.clone(),
    )?;
    let service = AccountSyncService::new(
        Arc::new(PostgresMerchantAccountRepository::new(pool.clone())),
        Arc::new(processor),
        RealtimeHub::default(),
        config.account_sync_ttl(),
    );

    let status = service.get_status(organization_id, true).await?;
    let account = &status.account;
    println!("✓ Merchant account synced:");
    println!("  Processor account: {}", account.processor_account_id);
    println!("  Onboarding state:  {}", account.onboarding_state);
    println!(
        "  Payout health:     {}",
        account.payout_health.status.as_deref().unwrap_or("none")
    );
    println!("  Charges enabled:   {}", account.charges_enabled);
    println!("  Payouts enabled:   {}", account.payouts_enabled);

    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Processor API URL: {}", config.processor_api_url);
    println!("  Processor Secret Key: {}", mask_secret(&config.processor_secret_key));
    println!("  Webhook Secret: {}", mask_secret(&config.processor_webhook_secret));
    println!("  Webhook Tolerance: {}s", config.webhook_tolerance_secs);
    println!("  Account Sync TTL: {}s", config.account_sync_ttl_secs);
    println!(
        "  Jobs: concurrency {}, max attempts {}, backoff {}ms..{}ms",
        config.job_concurrency,
        config.job_max_attempts,
        config.job_backoff_base_ms,
        config.job_backoff_max_ms
    );
    println!("  Currency: {}", config.currency);
    println!("  API Keys: {}", config.api_keys.len());

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

/// Keeps a recognisable prefix such as `sk_test_`.
fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(8).collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}
