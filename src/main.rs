use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tillsync::adapters::LogNotificationSink;
use tillsync::cli::{AccountCommands, Cli, Commands, DbCommands, JobCommands};
use tillsync::config::{Config, LogFormat};
use tillsync::health::{DependencyChecker, PostgresChecker, ProcessorChecker};
use tillsync::middleware::ApiKeyPrincipals;
use tillsync::processor::{HttpProcessorClient, PaymentProcessor};
use tillsync::{build_dispatcher, cli, create_app, db, startup, AppState, Settings, Stores};

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_logging(config.log_format);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Jobs(command) => {
            let pool = db::create_pool(&config).await?;
            match command {
                JobCommands::ListDead { limit } => cli::handle_jobs_list_dead(&pool, limit).await,
                JobCommands::Requeue { job_id } => cli::handle_jobs_requeue(&pool, job_id).await,
            }
        }
        Commands::Accounts(AccountCommands::Sync { organization_id }) => {
            let pool = db::create_pool(&config).await?;
            cli::handle_accounts_sync(&config, &pool, organization_id).await
        }
        Commands::Config => {
            cli::handle_config_validate(&config)?;
            let pool = db::create_pool(&config).await?;
            let report = startup::validate_environment(&config, &pool).await?;
            report.print();
            if !report.is_valid() {
                anyhow::bail!("Startup validation failed");
            }
            Ok(())
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let report = startup::validate_environment(&config, &pool).await?;
    if !report.is_valid() {
        report.print();
        anyhow::bail!("Startup validation failed");
    }
    for error in &report.errors {
        tracing::warn!(error = %error, "Startup check failed");
    }
    for warning in &report.warnings {
        tracing::warn!(warning = %warning, "Startup warning");
    }

    let processor: Arc<dyn PaymentProcessor> = Arc::new(HttpProcessorClient::new(
        config.processor_api_url.clone(),
        config.processor_secret_key.clone(),
    )?);
    tracing::info!(base_url = %config.processor_api_url, "Processor client initialized");

    let stores = Stores::postgres(pool.clone());
    let principals = ApiKeyPrincipals::new(&config.api_keys);
    tracing::info!(api_keys = principals.len(), "Loaded API keys");

    let health_checks: Vec<Arc<dyn DependencyChecker>> = vec![
        Arc::new(PostgresChecker::new(pool.clone())),
        Arc::new(ProcessorChecker::new(processor.clone())),
    ];
    let state = AppState::new(
        &stores,
        processor.clone(),
        Arc::new(principals),
        Settings::from_config(&config),
        health_checks,
    );

    let dispatcher = build_dispatcher(
        &stores,
        processor,
        Arc::new(LogNotificationSink),
        config.dispatcher_config(),
    )
    .spawn();
    tracing::info!(concurrency = config.job_concurrency, "Job dispatcher started");

    let app = create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.shutdown().await;
    pool.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining");
}
