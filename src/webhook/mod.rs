//! Webhook gateway: signature verification, event classification,
//! deduplication and dispatch.

pub mod event;
pub mod handlers;
pub mod router;
pub mod signature;

pub use event::{Envelope, EventKind, ParsedEvent, ProcessorEvent};
pub use handlers::{register_handlers, AccountEventHandler, PaymentEventHandler, PayoutEventHandler};
pub use router::{GatewayError, GatewayOutcome, HandlerOutcome, WebhookEventHandler, WebhookGateway};
pub use signature::{sign_payload, verify_signature, SignatureError, DEFAULT_TOLERANCE_SECS, SIGNATURE_HEADER};
