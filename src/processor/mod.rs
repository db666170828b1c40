pub mod client;
pub mod types;

pub use client::{HttpProcessorClient, ProcessorError};
pub use types::{AccountObject, PayoutObject, TransferObject, TransferRequest};

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::AccountSnapshot;

/// Result of a transfer the processor accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub transfer_id: String,
    pub amount: i64,
    pub currency: String,
    pub destination: String,
}

/// Outbound port to the payment processor.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn retrieve_account(&self, processor_account_id: &str) -> Result<AccountSnapshot, ProcessorError>;

    /// Creates a connected account tagged with the organization id.
    async fn create_account(&self, organization_id: Uuid) -> Result<AccountSnapshot, ProcessorError>;

    /// Hosted onboarding URL for the account.
    async fn create_account_link(
        &self,
        processor_account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<String, ProcessorError>;

    async fn create_transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, ProcessorError>;

    /// `closed` or `open`, for health reporting.
    fn circuit_state(&self) -> String {
        "closed".to_string()
    }
}
