//! Postgres implementations of the storage ports.
//!
//! Every status change is a single conditional write; the guard sets come
//! from the domain types so SQL and in-memory behaviour cannot drift apart.

mod accounts;
mod orders;
mod tip_pools;
mod webhook_events;

pub use accounts::{PostgresMerchantAccountRepository, PostgresPayoutRepository};
pub use orders::{PostgresOrderRepository, PostgresRevenueSplitRepository};
pub use tip_pools::PostgresTipPoolRepository;
pub use webhook_events::PostgresWebhookEventRepository;

use crate::ports::RepositoryError;

/// Maps unique-constraint violations to `Conflict`, everything else to
/// `Database`.
fn map_unique(e: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return RepositoryError::Conflict(what.to_string());
        }
    }
    RepositoryError::from(e)
}

fn status_strings<S: Copy>(statuses: &[S], as_str: impl Fn(&S) -> &'static str) -> Vec<String> {
    statuses.iter().map(|s| as_str(s).to_string()).collect()
}
