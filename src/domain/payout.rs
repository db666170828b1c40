//! Payouts: funds leaving the platform, either as processor payouts to an
//! external account or as transfers to a connected account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Paid,
    Failed,
}

impl PayoutStatus {
    pub const ALL: [PayoutStatus; 4] = [
        PayoutStatus::Pending,
        PayoutStatus::Processing,
        PayoutStatus::Paid,
        PayoutStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Paid => "paid",
            PayoutStatus::Failed => "failed",
        }
    }

    /// Maps the processor's payout status vocabulary.
    pub fn from_processor(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(PayoutStatus::Pending),
            "in_transit" => Some(PayoutStatus::Processing),
            "paid" => Some(PayoutStatus::Paid),
            "failed" | "canceled" => Some(PayoutStatus::Failed),
            _ => None,
        }
    }

    /// Same-status writes are allowed so field updates land; a paid payout
    /// may still fail later (bank return), a failed one never recovers.
    pub fn allowed_predecessors(&self) -> &'static [PayoutStatus] {
        match self {
            PayoutStatus::Pending => &[PayoutStatus::Pending],
            PayoutStatus::Processing => &[PayoutStatus::Pending, PayoutStatus::Processing],
            PayoutStatus::Paid => &[
                PayoutStatus::Pending,
                PayoutStatus::Processing,
                PayoutStatus::Paid,
            ],
            PayoutStatus::Failed => &[
                PayoutStatus::Pending,
                PayoutStatus::Processing,
                PayoutStatus::Paid,
                PayoutStatus::Failed,
            ],
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PayoutStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus::new("payout", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutKind {
    Payout,
    Transfer,
}

impl PayoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutKind::Payout => "payout",
            PayoutKind::Transfer => "transfer",
        }
    }
}

impl FromStr for PayoutKind {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payout" => Ok(PayoutKind::Payout),
            "transfer" => Ok(PayoutKind::Transfer),
            other => Err(UnknownStatus::new("payout kind", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub processor_account_id: Option<String>,
    pub processor_ref: Option<String>,
    pub kind: PayoutKind,
    pub amount: i64,
    pub currency: String,
    pub status: PayoutStatus,
    pub destination: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub source_ref: Option<String>,
    /// When the processor created the payout, if it told us.
    pub processor_created_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payout {
    /// Recency used to pick the latest payout. Events can arrive out of
    /// order, so the processor's timestamp wins over our insert time.
    pub fn recency(&self) -> DateTime<Utc> {
        self.processor_created_at.unwrap_or(self.created_at)
    }
}

/// Upsert keyed by `processor_ref`. Applied only if the stored status allows
/// the move to `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutUpsert {
    pub processor_ref: String,
    pub kind: PayoutKind,
    pub organization_id: Option<Uuid>,
    pub processor_account_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: PayoutStatus,
    pub destination: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub source_ref: Option<String>,
    pub processor_created_at: Option<DateTime<Utc>>,
}

impl PayoutUpsert {
    pub fn into_new_payout(self) -> Payout {
        let now = Utc::now();
        Payout {
            id: Uuid::new_v4(),
            organization_id: self.organization_id,
            processor_account_id: self.processor_account_id,
            processor_ref: Some(self.processor_ref),
            kind: self.kind,
            amount: self.amount,
            currency: self.currency,
            status: self.status,
            destination: self.destination,
            failure_code: self.failure_code,
            failure_message: self.failure_message,
            source_ref: self.source_ref,
            processor_created_at: self.processor_created_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// In-memory counterpart of the guarded `ON CONFLICT DO UPDATE`.
    pub fn apply_to(&self, payout: &mut Payout) -> bool {
        if !self.status.allowed_predecessors().contains(&payout.status) {
            return false;
        }
        payout.status = self.status;
        payout.amount = self.amount;
        payout.currency = self.currency.clone();
        payout.destination = self.destination.clone().or(payout.destination.take());
        payout.failure_code = self.failure_code.clone();
        payout.failure_message = self.failure_message.clone();
        if payout.organization_id.is_none() {
            payout.organization_id = self.organization_id;
        }
        if payout.processor_account_id.is_none() {
            payout.processor_account_id = self.processor_account_id.clone();
        }
        if payout.source_ref.is_none() {
            payout.source_ref = self.source_ref.clone();
        }
        if self.processor_created_at.is_some() {
            payout.processor_created_at = self.processor_created_at;
        }
        payout.updated_at = Utc::now();
        true
    }
}

/// Health of the most recent payout as shown on the merchant account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutHealth {
    /// `pending`, `processing`, `paid`, `undeliverable`, or `None`.
    pub status: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
}

pub const UNDELIVERABLE: &str = "undeliverable";

impl PayoutHealth {
    pub fn none() -> Self {
        Self {
            status: None,
            failure_code: None,
            failure_message: None,
        }
    }

    pub fn is_undeliverable(&self) -> bool {
        self.status.as_deref() == Some(UNDELIVERABLE)
    }
}

/// Flags `undeliverable` only when the latest payout failed and went to the
/// external account currently on file. A failure against a replaced account
/// is stale and clears.
pub fn payout_health(latest: Option<&Payout>, current_external_account: Option<&str>) -> PayoutHealth {
    let Some(payout) = latest else {
        return PayoutHealth::none();
    };

    match payout.status {
        PayoutStatus::Failed => {
            let same_destination = match (payout.destination.as_deref(), current_external_account) {
                (Some(dest), Some(current)) => dest == current,
                _ => false,
            };
            if same_destination {
                PayoutHealth {
                    status: Some(UNDELIVERABLE.to_string()),
                    failure_code: payout.failure_code.clone(),
                    failure_message: payout.failure_message.clone(),
                }
            } else {
                PayoutHealth::none()
            }
        }
        status => PayoutHealth {
            status: Some(status.as_str().to_string()),
            failure_code: None,
            failure_message: None,
        },
    }
}
