use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::types::{AccountLinkObject, AccountObject, ApiErrorEnvelope, TransferObject, TransferRequest};
use super::{PaymentProcessor, TransferReceipt};
use crate::domain::AccountSnapshot;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Processor returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Invalid response from processor: {0}")]
    InvalidResponse(String),
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
}

impl ProcessorError {
    /// Whether retrying the same request later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProcessorError::RequestError(_) | ProcessorError::CircuitBreakerOpen(_) => true,
            ProcessorError::Api { status, .. } => *status == 429 || *status >= 500,
            ProcessorError::NotFound(_) | ProcessorError::InvalidResponse(_) => false,
        }
    }
}

/// Upper bound on a single processor call, body included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the processor API, guarded by a circuit breaker.
#[derive(Clone)]
pub struct HttpProcessorClient {
    client: Client,
    base_url: String,
    secret_key: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl HttpProcessorClient {
    pub fn new(base_url: String, secret_key: String) -> Result<Self, ProcessorError> {
        Self::with_circuit_breaker(base_url, secret_key, 3, 60)
    }

    /// Creates a client with custom circuit breaker configuration
    pub fn with_circuit_breaker(
        base_url: String,
        secret_key: String,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Result<Self, ProcessorError> {
        Self::build(
            base_url,
            secret_key,
            failure_threshold,
            reset_timeout_secs,
            REQUEST_TIMEOUT,
        )
    }

    fn build(
        base_url: String,
        secret_key: String,
        failure_threshold: u32,
        reset_timeout_secs: u64,
        timeout: Duration,
    ) -> Result<Self, ProcessorError> {
        let client = Client::builder().timeout(timeout).build()?;

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Ok(HttpProcessorClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
            circuit_breaker,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
    }

    /// Runs a request through the breaker. Only transient failures count
    /// towards opening it; a 404 or a validation error does not.
    async fn guarded<T, F>(&self, fut: F) -> Result<T, ProcessorError>
    where
        F: Future<Output = Result<T, ProcessorError>>,
    {
        let result = self
            .circuit_breaker
            .call_with(|e: &ProcessorError| e.is_transient(), fut)
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(ProcessorError::CircuitBreakerOpen(
                "processor API circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> Result<T, ProcessorError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ProcessorError::NotFound(what.to_string()));
    }
    if !status.is_success() {
        let message = response
            .json::<ApiErrorEnvelope>()
            .await
            .ok()
            .and_then(|envelope| envelope.error.message.or(envelope.error.code))
            .unwrap_or_else(|| status.to_string());
        return Err(ProcessorError::Api {
            status: status.as_u16(),
            message,
        });
    }
    // A body that fails to arrive is a transport error; one that arrives
    // and does not parse is not.
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| ProcessorError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl PaymentProcessor for HttpProcessorClient {
    async fn retrieve_account(&self, processor_account_id: &str) -> Result<AccountSnapshot, ProcessorError> {
        let request = self.request(
            reqwest::Method::GET,
            &format!("/v1/accounts/{}", processor_account_id),
        );
        let what = format!("account {}", processor_account_id);

        let account: AccountObject = self
            .guarded(async move { read_json(request.send().await?, &what).await })
            .await?;
        Ok(account.into_snapshot())
    }

    async fn create_account(&self, organization_id: Uuid) -> Result<AccountSnapshot, ProcessorError> {
        let params = [
            ("type", "express".to_string()),
            ("metadata[organization_id]", organization_id.to_string()),
        ];
        let request = self.request(reqwest::Method::POST, "/v1/accounts").form(&params);

        let account: AccountObject = self
            .guarded(async move { read_json(request.send().await?, "account").await })
            .await?;
        tracing::info!(
            organization_id = %organization_id,
            processor_account_id = %account.id,
            "Created connected account"
        );
        Ok(account.into_snapshot())
    }

    async fn create_account_link(
        &self,
        processor_account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<String, ProcessorError> {
        let params = [
            ("account", processor_account_id.to_string()),
            ("refresh_url", refresh_url.to_string()),
            ("return_url", return_url.to_string()),
            ("type", "account_onboarding".to_string()),
        ];
        let request = self
            .request(reqwest::Method::POST, "/v1/account_links")
            .form(&params);
        let what = format!("account {}", processor_account_id);

        let link: AccountLinkObject = self
            .guarded(async move { read_json(request.send().await?, &what).await })
            .await?;
        Ok(link.url)
    }

    async fn create_transfer(&self, transfer: &TransferRequest) -> Result<TransferReceipt, ProcessorError> {
        let mut params = vec![
            ("amount", transfer.amount.to_string()),
            ("currency", transfer.currency.clone()),
            ("destination", transfer.destination.clone()),
        ];
        if let Some(group) = &transfer.source_ref {
            params.push(("transfer_group", group.clone()));
        }
        let request = self
            .request(reqwest::Method::POST, "/v1/transfers")
            .header("Idempotency-Key", &transfer.idempotency_key)
            .form(&params);
        let what = format!("destination {}", transfer.destination);

        let object: TransferObject = self
            .guarded(async move { read_json(request.send().await?, &what).await })
            .await?;
        Ok(TransferReceipt {
            transfer_id: object.id,
            amount: object.amount,
            currency: object.currency,
            destination: object.destination,
        })
    }

    fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(server: &mockito::Server) -> HttpProcessorClient {
        HttpProcessorClient::new(server.url(), "sk_test_123".to_string()).unwrap()
    }

    #[test]
    fn test_client_creation_trims_base_url() {
        let client =
            HttpProcessorClient::new("https://api.processor.test/".to_string(), "sk".to_string())
                .unwrap();
        assert_eq!(client.base_url(), "https://api.processor.test");
        assert_eq!(client.circuit_state(), "closed");
    }

    #[tokio::test]
    async fn test_retrieve_account_with_mock() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/accounts/acct_123")
            .match_header("authorization", "Bearer sk_test_123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "id": "acct_123",
                    "charges_enabled": true,
                    "payouts_enabled": true,
                    "details_submitted": true,
                    "requirements": {"currently_due": [], "past_due": []},
                    "external_accounts": {"data": [{"id": "ba_1", "object": "bank_account", "last4": "4242"}]}
                }"#,
            )
            .create_async()
            .await;

        let snapshot = client(&server).retrieve_account("acct_123").await.unwrap();
        assert_eq!(snapshot.processor_account_id, "acct_123");
        assert!(snapshot.charges_enabled);
        assert_eq!(snapshot.external_account.unwrap().id, "ba_1");
    }

    #[tokio::test]
    async fn test_retrieve_account_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/accounts/acct_missing")
            .with_status(404)
            .create_async()
            .await;

        let result = client(&server).retrieve_account("acct_missing").await;
        assert!(matches!(result, Err(ProcessorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_create_transfer_sends_idempotency_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/transfers")
            .match_header("idempotency-key", "tip:pool:member")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("amount".into(), "4000".into()),
                mockito::Matcher::UrlEncoded("destination".into(), "acct_dest".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"id": "tr_1", "amount": 4000, "currency": "usd", "destination": "acct_dest"}"#)
            .create_async()
            .await;

        let receipt = client(&server)
            .create_transfer(&TransferRequest {
                amount: 4000,
                currency: "usd".to_string(),
                destination: "acct_dest".to_string(),
                idempotency_key: "tip:pool:member".to_string(),
                source_ref: None,
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(receipt.transfer_id, "tr_1");
        assert_eq!(receipt.amount, 4000);
    }

    #[tokio::test]
    async fn test_api_error_message_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/account_links")
            .with_status(400)
            .with_body(r#"{"error": {"message": "No such account", "code": "resource_missing"}}"#)
            .create_async()
            .await;

        let err = client(&server)
            .create_account_link("acct_x", "https://r", "https://b")
            .await
            .unwrap_err();
        match err {
            ProcessorError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "No such account");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_circuit_opens_after_consecutive_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/accounts/acct_1")
            .with_status(503)
            .create_async()
            .await;

        let client = HttpProcessorClient::with_circuit_breaker(server.url(), "sk".to_string(), 2, 60).unwrap();
        for _ in 0..2 {
            let err = client.retrieve_account("acct_1").await.unwrap_err();
            assert!(err.is_transient());
        }

        let err = client.retrieve_account("acct_1").await.unwrap_err();
        assert!(matches!(err, ProcessorError::CircuitBreakerOpen(_)));
        assert_eq!(client.circuit_state(), "open");
    }

    #[tokio::test]
    async fn test_not_found_does_not_trip_breaker() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/accounts/acct_gone")
            .with_status(404)
            .create_async()
            .await;

        let client = HttpProcessorClient::with_circuit_breaker(server.url(), "sk".to_string(), 1, 60).unwrap();
        for _ in 0..3 {
            let err = client.retrieve_account("acct_gone").await.unwrap_err();
            assert!(matches!(err, ProcessorError::NotFound(_)));
        }
        assert_eq!(client.circuit_state(), "closed");
    }

    #[tokio::test]
    async fn test_slow_response_hits_request_timeout() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/accounts/acct_slow")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_chunked_body(|w| {
                use std::io::Write;
                std::thread::sleep(Duration::from_millis(1_000));
                w.write_all(br#"{"id": "acct_slow"}"#)
            })
            .create_async()
            .await;

        let client = HttpProcessorClient::build(
            server.url(),
            "sk".to_string(),
            3,
            60,
            Duration::from_millis(100),
        )
        .unwrap();
        let err = client.retrieve_account("acct_slow").await.unwrap_err();
        assert!(matches!(err, ProcessorError::RequestError(ref e) if e.is_timeout()));
        assert!(err.is_transient());
    }
}
