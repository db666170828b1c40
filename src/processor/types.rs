//! Processor wire objects. Only the fields the core reads are modelled;
//! everything else in the payload is ignored.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::{AccountSnapshot, ExternalAccount, Requirements};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RequirementsObject {
    #[serde(default)]
    pub currently_due: Vec<String>,
    #[serde(default)]
    pub eventually_due: Vec<String>,
    #[serde(default)]
    pub past_due: Vec<String>,
    #[serde(default)]
    pub disabled_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExternalAccountObject {
    pub id: String,
    /// `bank_account` or `card`.
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub last4: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub default_for_currency: Option<bool>,
}

impl From<ExternalAccountObject> for ExternalAccount {
    fn from(obj: ExternalAccountObject) -> Self {
        ExternalAccount {
            id: obj.id,
            last4: obj.last4,
            account_type: obj.object,
            status: obj.status,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListObject<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountObject {
    pub id: String,
    #[serde(default)]
    pub charges_enabled: bool,
    #[serde(default)]
    pub payouts_enabled: bool,
    #[serde(default)]
    pub details_submitted: bool,
    #[serde(default)]
    pub requirements: Option<RequirementsObject>,
    #[serde(default)]
    pub external_accounts: Option<ListObject<ExternalAccountObject>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl AccountObject {
    /// Organization the account was created for, if we tagged it.
    pub fn organization_id(&self) -> Option<Uuid> {
        self.metadata
            .get("organization_id")
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }

    /// The payout destination: the default external account, else the first.
    fn primary_external_account(external: Vec<ExternalAccountObject>) -> Option<ExternalAccountObject> {
        let mut accounts = external.into_iter();
        let first = accounts.next()?;
        if first.default_for_currency == Some(true) {
            return Some(first);
        }
        accounts
            .find(|acct| acct.default_for_currency == Some(true))
            .or(Some(first))
    }

    pub fn into_snapshot(self) -> AccountSnapshot {
        let requirements = self.requirements.unwrap_or_default();
        let external_account = self
            .external_accounts
            .and_then(|list| Self::primary_external_account(list.data))
            .map(ExternalAccount::from);

        AccountSnapshot {
            processor_account_id: self.id,
            charges_enabled: self.charges_enabled,
            payouts_enabled: self.payouts_enabled,
            details_submitted: self.details_submitted,
            requirements: Requirements {
                currently_due: requirements.currently_due,
                eventually_due: requirements.eventually_due,
                past_due: requirements.past_due,
                disabled_reason: requirements.disabled_reason,
            },
            external_account,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountLinkObject {
    pub url: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayoutObject {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub failure_code: Option<String>,
    #[serde(default)]
    pub failure_message: Option<String>,
    /// Unix seconds at which the processor created the payout.
    #[serde(default)]
    pub created: Option<i64>,
}

impl PayoutObject {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created.and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransferObject {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub destination: String,
    #[serde(default)]
    pub amount_reversed: i64,
    #[serde(default)]
    pub reversed: bool,
    #[serde(default)]
    pub transfer_group: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// Outbound money movement to a connected account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub amount: i64,
    pub currency: String,
    pub destination: String,
    pub idempotency_key: String,
    /// Grouping reference, e.g. the tip pool or order the money came from.
    pub source_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_account_object_into_snapshot() {
        let org = Uuid::new_v4();
        let account: AccountObject = serde_json::from_value(json!({
            "id": "acct_123",
            "object": "account",
            "charges_enabled": true,
            "payouts_enabled": false,
            "details_submitted": true,
            "requirements": {
                "currently_due": ["external_account"],
                "past_due": [],
                "disabled_reason": null
            },
            "external_accounts": {
                "object": "list",
                "data": [
                    {"id": "ba_old", "object": "bank_account", "last4": "1111"},
                    {"id": "ba_new", "object": "bank_account", "last4": "6789", "default_for_currency": true}
                ]
            },
            "metadata": {"organization_id": org.to_string()}
        }))
        .unwrap();

        assert_eq!(account.organization_id(), Some(org));
        let snapshot = account.into_snapshot();
        assert_eq!(snapshot.processor_account_id, "acct_123");
        assert_eq!(snapshot.requirements.currently_due, vec!["external_account"]);
        let external = snapshot.external_account.unwrap();
        assert_eq!(external.id, "ba_new");
        assert_eq!(external.last4.as_deref(), Some("6789"));
        assert_eq!(external.account_type.as_deref(), Some("bank_account"));
    }

    #[test]
    fn test_sparse_account_object_defaults() {
        let account: AccountObject = serde_json::from_value(json!({"id": "acct_1"})).unwrap();
        assert_eq!(account.organization_id(), None);
        let snapshot = account.into_snapshot();
        assert!(!snapshot.details_submitted);
        assert!(snapshot.external_account.is_none());
        assert_eq!(snapshot.requirements, Requirements::default());
    }

    #[test]
    fn test_payout_object_keeps_processor_created_time() {
        let payout: PayoutObject = serde_json::from_value(json!({
            "id": "po_1",
            "amount": 4200,
            "currency": "usd",
            "status": "paid",
            "created": 1_700_000_000
        }))
        .unwrap();
        assert_eq!(payout.created_at().map(|t| t.timestamp()), Some(1_700_000_000));

        let bare: PayoutObject = serde_json::from_value(json!({
            "id": "po_2", "amount": 1, "currency": "usd", "status": "pending"
        }))
        .unwrap();
        assert_eq!(bare.created_at(), None);
    }
}
