pub mod account_sync;
pub mod orders;
pub mod payouts;
pub mod revenue_report;
pub mod tip_pools;

pub use account_sync::{AccountStatus, AccountSyncService, SyncError};
pub use orders::OrderService;
pub use payouts::PayoutService;
pub use revenue_report::{ReportError, RevenueReport, RevenueReportService};
pub use tip_pools::{NewTipPool, NewTipPoolMember, TipPoolDetails, TipPoolError, TipPoolService};
