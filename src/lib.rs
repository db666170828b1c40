pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod distribution;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod jobs;
pub mod middleware;
pub mod ports;
pub mod processor;
pub mod realtime;
pub mod services;
pub mod startup;
pub mod webhook;

use axum::{
    extract::FromRef,
    http::Method,
    routing::{get, post},
    Json, Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;

use crate::adapters::postgres::{
    PostgresMerchantAccountRepository, PostgresOrderRepository, PostgresPayoutRepository,
    PostgresRevenueSplitRepository, PostgresTipPoolRepository, PostgresWebhookEventRepository,
};
use crate::adapters::MemoryStore;
use crate::config::Config;
use crate::health::DependencyChecker;
use crate::jobs::{
    Dispatcher, DispatcherConfig, EnqueueOptions, JobQueue, NotificationHandler, PgJobQueue,
    TransferHandler, NOTIFICATIONS_QUEUE, TRANSFERS_QUEUE,
};
use crate::middleware::{request_logger_middleware, PrincipalVerifier};
use crate::ports::{
    MerchantAccountRepository, NotificationSink, OrderRepository, PayoutRepository,
    RevenueSplitRepository, TipPoolRepository, WebhookEventRepository,
};
use crate::processor::PaymentProcessor;
use crate::realtime::RealtimeHub;
use crate::services::{
    AccountSyncService, OrderService, PayoutService, RevenueReportService, TipPoolService,
};
use crate::webhook::{register_handlers, WebhookGateway};

/// One implementation of every storage port.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderRepository>,
    pub payouts: Arc<dyn PayoutRepository>,
    pub accounts: Arc<dyn MerchantAccountRepository>,
    pub webhook_events: Arc<dyn WebhookEventRepository>,
    pub revenue_splits: Arc<dyn RevenueSplitRepository>,
    pub tip_pools: Arc<dyn TipPoolRepository>,
    pub jobs: Arc<dyn JobQueue>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            orders: Arc::new(PostgresOrderRepository::new(pool.clone())),
            payouts: Arc::new(PostgresPayoutRepository::new(pool.clone())),
            accounts: Arc::new(PostgresMerchantAccountRepository::new(pool.clone())),
            webhook_events: Arc::new(PostgresWebhookEventRepository::new(pool.clone())),
            revenue_splits: Arc::new(PostgresRevenueSplitRepository::new(pool.clone())),
            tip_pools: Arc::new(PostgresTipPoolRepository::new(pool.clone())),
            jobs: Arc::new(PgJobQueue::new(pool)),
        }
    }

    /// In-process stores, for tests and local runs without a database.
    pub fn memory(store: Arc<MemoryStore>, jobs: Arc<dyn JobQueue>) -> Self {
        Self {
            orders: store.clone(),
            payouts: store.clone(),
            accounts: store.clone(),
            webhook_events: store.clone(),
            revenue_splits: store.clone(),
            tip_pools: store,
            jobs,
        }
    }
}

/// Runtime knobs the services need, lifted out of `Config`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,
    pub account_sync_ttl: chrono::Duration,
    pub currency: String,
    pub job_options: EnqueueOptions,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            webhook_secret: config.processor_webhook_secret.clone(),
            webhook_tolerance_secs: config.webhook_tolerance_secs,
            account_sync_ttl: config.account_sync_ttl(),
            currency: config.currency.clone(),
            job_options: EnqueueOptions::with_policy(config.retry_policy()),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<WebhookGateway>,
    pub account_sync: Arc<AccountSyncService>,
    pub tip_pools: Arc<TipPoolService>,
    pub revenue_reports: Arc<RevenueReportService>,
    pub jobs: Arc<dyn JobQueue>,
    pub realtime: RealtimeHub,
    pub principals: Arc<dyn PrincipalVerifier>,
    pub health_checks: Arc<Vec<Arc<dyn DependencyChecker>>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        stores: &Stores,
        processor: Arc<dyn PaymentProcessor>,
        principals: Arc<dyn PrincipalVerifier>,
        settings: Settings,
        health_checks: Vec<Arc<dyn DependencyChecker>>,
    ) -> Self {
        let realtime = RealtimeHub::default();

        let orders = Arc::new(OrderService::new(
            stores.orders.clone(),
            stores.revenue_splits.clone(),
            stores.jobs.clone(),
            realtime.clone(),
            settings.job_options,
        ));
        let account_sync = Arc::new(AccountSyncService::new(
            stores.accounts.clone(),
            processor,
            realtime.clone(),
            settings.account_sync_ttl,
        ));
        let payouts = Arc::new(PayoutService::new(
            stores.payouts.clone(),
            stores.accounts.clone(),
            realtime.clone(),
        ));

        let gateway = register_handlers(
            WebhookGateway::new(
                settings.webhook_secret,
                settings.webhook_tolerance_secs,
                stores.webhook_events.clone(),
            ),
            orders,
            account_sync.clone(),
            payouts,
        );

        Self {
            gateway: Arc::new(gateway),
            account_sync,
            tip_pools: Arc::new(TipPoolService::new(
                stores.tip_pools.clone(),
                stores.orders.clone(),
                stores.jobs.clone(),
                settings.currency,
                settings.job_options,
            )),
            revenue_reports: Arc::new(RevenueReportService::new(
                stores.orders.clone(),
                stores.revenue_splits.clone(),
            )),
            jobs: stores.jobs.clone(),
            realtime,
            principals,
            health_checks: Arc::new(health_checks),
            start_time: Instant::now(),
        }
    }
}

impl FromRef<AppState> for Arc<dyn PrincipalVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.principals.clone()
    }
}

/// Worker pool serving the notification and transfer queues.
pub fn build_dispatcher(
    stores: &Stores,
    processor: Arc<dyn PaymentProcessor>,
    sink: Arc<dyn NotificationSink>,
    config: DispatcherConfig,
) -> Dispatcher {
    Dispatcher::new(stores.jobs.clone(), config)
        .register(NOTIFICATIONS_QUEUE, Arc::new(NotificationHandler::new(sink)))
        .register(
            TRANSFERS_QUEUE,
            Arc::new(TransferHandler::new(processor, stores.payouts.clone())),
        )
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::webhook::receive_processor_event,
        handlers::merchant_account::account_status,
        handlers::merchant_account::create_onboarding_link,
        handlers::tip_pools::create_pool,
        handlers::tip_pools::get_pool,
        handlers::tip_pools::add_member,
        handlers::tip_pools::calculate,
        handlers::tip_pools::finalize,
        handlers::reports::revenue_report,
        handlers::dlq::list_dead_jobs,
        handlers::dlq::requeue_dead_job,
    ),
    components(schemas(
        health::HealthResponse,
        health::DependencyStatus,
        handlers::webhook::WebhookAck,
        handlers::merchant_account::OnboardingLinkRequest,
        handlers::merchant_account::OnboardingLinkResponse,
        domain::TipPool,
        domain::TipPoolMember,
        domain::TipPoolStatus,
        services::NewTipPool,
        services::NewTipPoolMember,
        services::TipPoolDetails,
        services::RevenueReport,
        services::revenue_report::RevenueSplitLine,
    ))
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api-docs/openapi.json", get(openapi_json))
        .route(
            "/webhooks/processor",
            post(handlers::webhook::receive_processor_event),
        )
        .route(
            "/organizations/:org_id/merchant-account/status",
            get(handlers::merchant_account::account_status),
        )
        .route(
            "/organizations/:org_id/merchant-account/onboarding-link",
            post(handlers::merchant_account::create_onboarding_link),
        )
        .route("/tip-pools", post(handlers::tip_pools::create_pool))
        .route("/tip-pools/:id", get(handlers::tip_pools::get_pool))
        .route("/tip-pools/:id/members", post(handlers::tip_pools::add_member))
        .route("/tip-pools/:id/calculate", post(handlers::tip_pools::calculate))
        .route("/tip-pools/:id/finalize", post(handlers::tip_pools::finalize))
        .route(
            "/catalogs/:id/revenue-report",
            get(handlers::reports::revenue_report),
        )
        .route("/dlq/jobs", get(handlers::dlq::list_dead_jobs))
        .route("/dlq/jobs/:id/requeue", post(handlers::dlq::requeue_dead_job))
        .route("/ws", get(handlers::ws::ws_handler))
        .layer(axum::middleware::from_fn(request_logger_middleware))
        .layer(cors)
        .with_state(state)
}
