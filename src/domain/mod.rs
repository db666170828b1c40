//! Domain entities for the reconciliation core.
//! Framework-agnostic; persistence lives in `adapters`.

pub mod merchant_account;
pub mod order;
pub mod payout;
pub mod revenue_split;
pub mod tip_pool;

use thiserror::Error;

pub use merchant_account::{
    derive_onboarding_state, AccountSnapshot, ExternalAccount, MerchantAccount, OnboardingState,
    Requirements,
};
pub use order::{Order, OrderKey, OrderStatus, OrderTransition};
pub use payout::{payout_health, Payout, PayoutHealth, PayoutKind, PayoutStatus, PayoutUpsert};
pub use revenue_split::RevenueSplit;
pub use tip_pool::{TipPool, TipPoolMember, TipPoolStatus};

/// A stored status string that does not map to any known variant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown {entity} status '{value}'")]
pub struct UnknownStatus {
    pub entity: &'static str,
    pub value: String,
}

impl UnknownStatus {
    pub fn new(entity: &'static str, value: &str) -> Self {
        Self {
            entity,
            value: value.to_string(),
        }
    }
}
