//! # settlement-engine
//!
//! Concurrent settlement of shared trip expenses.
//!
//! A member who owes a share of an expense pays it by moving funds from
//! their account into the expense owner's account. Many such transfers can
//! hit the same accounts at once, so the engine offers two concurrency
//! strategies over a transactional store and a harness that compares them.
//!
//! ## Architecture
//!
//! - **core**: Accounts, expenses, settlement notes and transfer requests
//! - **store**: Unit-of-work gateway and an in-memory transactional store
//! - **settlement**: Pessimistic and optimistic executors, retry policy,
//!   lock ordering and expense completion
//! - **simulation**: Scenario generation and the contention comparison
//! - **config** / **error**: Engine tuning and the error taxonomy

pub mod config;
pub mod core;
pub mod error;
pub mod settlement;
pub mod simulation;
pub mod store;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::core::account::Account;
    pub use crate::core::expense::{Expense, SettlementNote, TransferRequest};
    pub use crate::core::ids::{AccountId, ExpenseId, MemberId, NoteId};
    pub use crate::error::{ErrorKind, SettlementError, StoreError};
    pub use crate::settlement::retry::{CancellationToken, Jitter, RetryPolicy};
    pub use crate::settlement::service::{SettlementService, Strategy};
    pub use crate::store::{MemoryStore, SettlementStore, UnitOfWork};
}
