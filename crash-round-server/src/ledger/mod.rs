//! Bet Ledger
//!
//! Accounts, bets and per-round analytics, all changed through atomic
//! store transactions.
//!
//! - [`model`]: persisted records
//! - [`store`]: the transactional store seam and its in-memory implementation
//! - [`transactions`]: bet, cashout, settlement and refund operations

pub mod model;
pub mod store;
pub mod transactions;

pub use model::{
    Account, AccountStatus, Bet, BetStatus, RefundDetail, RefundStatus, RefundSummary, RoundAnalytics, RoundOutcome,
};
pub use store::{MemoryStore, Store, StoreView, Transaction};
pub use transactions::{
    with_retry, AnalyticsOutcome, BetReceipt, CashoutReceipt, Ledger, RetryPolicy, Settlement,
};
