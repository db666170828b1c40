//! Processor event envelope and the typed objects carried inside it.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

use crate::processor::types::ExternalAccountObject;
use crate::processor::{AccountObject, PayoutObject, TransferObject};

/// Event types this service acts on. Anything else is acknowledged and
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PaymentSucceeded,
    PaymentFailed,
    PaymentProcessing,
    ChargeRefunded,
    AccountUpdated,
    ExternalAccountCreated,
    ExternalAccountUpdated,
    ExternalAccountDeleted,
    PayoutCreated,
    PayoutUpdated,
    PayoutPaid,
    PayoutFailed,
    TransferReversed,
}

impl EventKind {
    pub const ALL: [EventKind; 13] = [
        EventKind::PaymentSucceeded,
        EventKind::PaymentFailed,
        EventKind::PaymentProcessing,
        EventKind::ChargeRefunded,
        EventKind::AccountUpdated,
        EventKind::ExternalAccountCreated,
        EventKind::ExternalAccountUpdated,
        EventKind::ExternalAccountDeleted,
        EventKind::PayoutCreated,
        EventKind::PayoutUpdated,
        EventKind::PayoutPaid,
        EventKind::PayoutFailed,
        EventKind::TransferReversed,
    ];

    pub const PAYMENT: [EventKind; 4] = [
        EventKind::PaymentSucceeded,
        EventKind::PaymentFailed,
        EventKind::PaymentProcessing,
        EventKind::ChargeRefunded,
    ];

    pub const ACCOUNT: [EventKind; 4] = [
        EventKind::AccountUpdated,
        EventKind::ExternalAccountCreated,
        EventKind::ExternalAccountUpdated,
        EventKind::ExternalAccountDeleted,
    ];

    pub const PAYOUT: [EventKind; 5] = [
        EventKind::PayoutCreated,
        EventKind::PayoutUpdated,
        EventKind::PayoutPaid,
        EventKind::PayoutFailed,
        EventKind::TransferReversed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PaymentSucceeded => "payment_intent.succeeded",
            EventKind::PaymentFailed => "payment_intent.payment_failed",
            EventKind::PaymentProcessing => "payment_intent.processing",
            EventKind::ChargeRefunded => "charge.refunded",
            EventKind::AccountUpdated => "account.updated",
            EventKind::ExternalAccountCreated => "account.external_account.created",
            EventKind::ExternalAccountUpdated => "account.external_account.updated",
            EventKind::ExternalAccountDeleted => "account.external_account.deleted",
            EventKind::PayoutCreated => "payout.created",
            EventKind::PayoutUpdated => "payout.updated",
            EventKind::PayoutPaid => "payout.paid",
            EventKind::PayoutFailed => "payout.failed",
            EventKind::TransferReversed => "transfer.reversed",
        }
    }

    pub fn from_type(event_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == event_type)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Connected account the event belongs to, when it is not the platform's.
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl Envelope {
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_type(&self.event_type)
    }
}

/// `latest_charge` arrives either as an id or as the expanded object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChargeRef {
    Id(String),
    Expanded { id: String },
}

impl ChargeRef {
    pub fn id(&self) -> &str {
        match self {
            ChargeRef::Id(id) | ChargeRef::Expanded { id } => id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentErrorObject {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub latest_charge: Option<ChargeRef>,
    #[serde(default)]
    pub last_payment_error: Option<PaymentErrorObject>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentIntentObject {
    pub fn charge_id(&self) -> Option<String> {
        self.latest_charge.as_ref().map(|c| c.id().to_string())
    }

    /// The processor's message, falling back to its error code.
    pub fn failure_message(&self) -> Option<String> {
        let error = self.last_payment_error.as_ref()?;
        error.message.clone().or_else(|| error.code.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeObject {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub amount_refunded: i64,
    #[serde(default)]
    pub refunded: bool,
}

/// `data.object` decoded according to the event kind.
#[derive(Debug, Clone)]
pub enum ProcessorEvent {
    PaymentSucceeded(PaymentIntentObject),
    PaymentFailed(PaymentIntentObject),
    PaymentProcessing(PaymentIntentObject),
    ChargeRefunded(ChargeObject),
    AccountUpdated(AccountObject),
    ExternalAccountChanged(ExternalAccountObject),
    PayoutChanged(PayoutObject),
    TransferReversed(TransferObject),
}

impl ProcessorEvent {
    pub fn decode(kind: EventKind, object: serde_json::Value) -> Result<Self, serde_json::Error> {
        use serde_json::from_value;

        Ok(match kind {
            EventKind::PaymentSucceeded => ProcessorEvent::PaymentSucceeded(from_value(object)?),
            EventKind::PaymentFailed => ProcessorEvent::PaymentFailed(from_value(object)?),
            EventKind::PaymentProcessing => ProcessorEvent::PaymentProcessing(from_value(object)?),
            EventKind::ChargeRefunded => ProcessorEvent::ChargeRefunded(from_value(object)?),
            EventKind::AccountUpdated => ProcessorEvent::AccountUpdated(from_value(object)?),
            EventKind::ExternalAccountCreated
            | EventKind::ExternalAccountUpdated
            | EventKind::ExternalAccountDeleted => {
                ProcessorEvent::ExternalAccountChanged(from_value(object)?)
            }
            EventKind::PayoutCreated
            | EventKind::PayoutUpdated
            | EventKind::PayoutPaid
            | EventKind::PayoutFailed => ProcessorEvent::PayoutChanged(from_value(object)?),
            EventKind::TransferReversed => ProcessorEvent::TransferReversed(from_value(object)?),
        })
    }
}

/// A verified, classified event ready for dispatch.
#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub id: String,
    pub kind: EventKind,
    pub account: Option<String>,
    pub event: ProcessorEvent,
}
