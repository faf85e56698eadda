//! Persistence gateway consumed by the transfer executors.
//!
//! A [`SettlementStore`] opens units of work; everything an executor reads or
//! writes goes through one [`UnitOfWork`], and nothing it writes is visible to
//! anyone else until [`UnitOfWork::commit`] returns. Dropping a unit without
//! committing rolls it back and releases whatever it locked.

pub mod memory;

use crate::core::account::Account;
use crate::core::expense::{Expense, SettlementNote};
use crate::core::ids::{ExpenseId, MemberId};
use crate::error::StoreError;
use rust_decimal::Decimal;

pub use memory::MemoryStore;

/// Opens units of work. Shared between worker threads.
pub trait SettlementStore: Send + Sync {
    type Unit: UnitOfWork;

    fn begin(&self) -> Result<Self::Unit, StoreError>;
}

/// Parameters of the version-checked two-row balance update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionedTransfer {
    pub sender: MemberId,
    pub receiver: MemberId,
    pub amount: Decimal,
    pub sender_version: u64,
    pub receiver_version: u64,
}

/// One atomic unit of work against the store.
pub trait UnitOfWork {
    /// Plain read, no lock taken.
    fn find_account(&mut self, member: MemberId) -> Result<Option<Account>, StoreError>;

    /// Read that takes an exclusive lock on the row, held until the unit
    /// ends. Lock waits surface as [`StoreError::LockTimeout`] or
    /// [`StoreError::Deadlock`].
    fn find_account_for_update(&mut self, member: MemberId)
        -> Result<Option<Account>, StoreError>;

    /// Debit the sender and credit the receiver, each only if its row still
    /// carries the given version. Returns the number of rows changed.
    fn update_balances_if_version(&mut self, transfer: &VersionedTransfer)
        -> Result<u64, StoreError>;

    /// Debit the sender and credit the receiver unconditionally.
    fn transfer_balance(
        &mut self,
        sender: MemberId,
        receiver: MemberId,
        amount: Decimal,
    ) -> Result<(), StoreError>;

    fn find_expense(&mut self, expense: ExpenseId) -> Result<Option<Expense>, StoreError>;

    fn mark_expense_completed(&mut self, expense: ExpenseId) -> Result<(), StoreError>;

    /// Flag the debtor's unpaid note on the expense as paid. Returns the
    /// number of notes changed; an already paid note is left alone.
    fn mark_note_paid(&mut self, expense: ExpenseId, debtor: MemberId) -> Result<u64, StoreError>;

    fn list_notes(&mut self, expense: ExpenseId) -> Result<Vec<SettlementNote>, StoreError>;

    fn commit(self) -> Result<(), StoreError>;
}

impl<S: SettlementStore + ?Sized> SettlementStore for std::sync::Arc<S> {
    type Unit = S::Unit;

    fn begin(&self) -> Result<Self::Unit, StoreError> {
        (**self).begin()
    }
}
