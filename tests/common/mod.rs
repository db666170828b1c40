#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

use tillsync::adapters::MemoryStore;
use tillsync::domain::{AccountSnapshot, Order, Requirements};
use tillsync::jobs::{EnqueueOptions, MemoryJobQueue};
use tillsync::middleware::ApiKeyPrincipals;
use tillsync::ports::OrderRepository;
use tillsync::processor::{PaymentProcessor, ProcessorError, TransferReceipt, TransferRequest};
use tillsync::webhook::{sign_payload, SIGNATURE_HEADER};
use tillsync::{create_app, AppState, Settings, Stores};

pub const SECRET: &str = "whsec_test_secret";
pub const TOKEN: &str = "key-org-a";
pub const OTHER_TOKEN: &str = "key-org-b";

/// Processor double: serves a configurable account snapshot and records
/// every transfer request.
pub struct StubProcessor {
    pub snapshot: Mutex<Option<AccountSnapshot>>,
    pub transfers: Mutex<Vec<TransferRequest>>,
    pub reject_transfers: Mutex<bool>,
}

impl StubProcessor {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(None),
            transfers: Mutex::new(Vec::new()),
            reject_transfers: Mutex::new(false),
        }
    }

    pub fn set_snapshot(&self, snapshot: Option<AccountSnapshot>) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    pub fn reject_transfers(&self) {
        *self.reject_transfers.lock().unwrap() = true;
    }

    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.transfers.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProcessor for StubProcessor {
    async fn retrieve_account(&self, _id: &str) -> Result<AccountSnapshot, ProcessorError> {
        self.snapshot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ProcessorError::CircuitBreakerOpen("processor down".to_string()))
    }

    async fn create_account(&self, _organization_id: Uuid) -> Result<AccountSnapshot, ProcessorError> {
        Ok(snapshot("acct_created", false, false, false, &[]))
    }

    async fn create_account_link(
        &self,
        processor_account_id: &str,
        _refresh_url: &str,
        _return_url: &str,
    ) -> Result<String, ProcessorError> {
        Ok(format!("https://connect.processor.test/setup/{}", processor_account_id))
    }

    async fn create_transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, ProcessorError> {
        if *self.reject_transfers.lock().unwrap() {
            return Err(ProcessorError::Api {
                status: 400,
                message: "destination account cannot receive transfers".to_string(),
            });
        }
        let mut transfers = self.transfers.lock().unwrap();
        transfers.push(request.clone());
        Ok(TransferReceipt {
            transfer_id: format!("tr_{}", transfers.len()),
            amount: request.amount,
            currency: request.currency.clone(),
            destination: request.destination.clone(),
        })
    }
}

pub fn snapshot(
    id: &str,
    details_submitted: bool,
    charges_enabled: bool,
    payouts_enabled: bool,
    currently_due: &[&str],
) -> AccountSnapshot {
    AccountSnapshot {
        processor_account_id: id.to_string(),
        charges_enabled,
        payouts_enabled,
        details_submitted,
        requirements: Requirements {
            currently_due: currently_due.iter().map(|s| s.to_string()).collect(),
            ..Requirements::default()
        },
        external_account: None,
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub jobs: Arc<MemoryJobQueue>,
    pub processor: Arc<StubProcessor>,
    pub stores: Stores,
    pub state: AppState,
    pub org: Uuid,
    pub other_org: Uuid,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let jobs = Arc::new(MemoryJobQueue::new());
        let processor = Arc::new(StubProcessor::new());
        let stores = Stores::memory(store.clone(), jobs.clone());
        let org = Uuid::new_v4();
        let other_org = Uuid::new_v4();

        let principals = ApiKeyPrincipals::default()
            .with_key(TOKEN, org)
            .with_key(OTHER_TOKEN, other_org);
        let settings = Settings {
            webhook_secret: SECRET.to_string(),
            webhook_tolerance_secs: 300,
            account_sync_ttl: chrono::Duration::seconds(300),
            currency: "usd".to_string(),
            job_options: EnqueueOptions::default(),
        };
        let state = AppState::new(&stores, processor.clone(), Arc::new(principals), settings, Vec::new());

        Self {
            store,
            jobs,
            processor,
            stores,
            state,
            org,
            other_org,
        }
    }

    pub fn router(&self) -> Router {
        create_app(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap()).await
    }

    /// Delivers an event signed with the shared secret.
    pub async fn deliver(&self, event: &Value) -> (StatusCode, Value) {
        let payload = event.to_string();
        let signature = sign_payload(payload.as_bytes(), SECRET, chrono::Utc::now().timestamp()).unwrap();
        self.deliver_raw(payload, Some(signature)).await
    }

    pub async fn deliver_raw(&self, payload: String, signature: Option<String>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/webhooks/processor")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        self.send(builder.body(Body::from(payload)).unwrap()).await
    }

    /// A pending order awaiting payment intent `pi`.
    pub async fn seed_order(&self, catalog_id: Option<Uuid>, pi: &str, subtotal: i64, tip: i64) -> Order {
        let mut order = Order::new(self.org, catalog_id, subtotal, 0, tip, "usd", Some(pi.to_string()));
        order.customer_email = Some("guest@example.com".to_string());
        OrderRepository::insert(self.store.as_ref(), &order).await.unwrap()
    }

    pub fn order(&self, id: Uuid) -> Order {
        self.store
            .orders()
            .into_iter()
            .find(|o| o.id == id)
            .expect("order exists")
    }
}

pub fn event(id: &str, event_type: &str, object: Value) -> Value {
    json!({
        "id": id,
        "type": event_type,
        "created": chrono::Utc::now().timestamp(),
        "data": { "object": object }
    })
}

pub fn account_event(id: &str, event_type: &str, account: &str, object: Value) -> Value {
    let mut event = event(id, event_type, object);
    event["account"] = json!(account);
    event
}
