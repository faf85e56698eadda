use crate::core::expense::SettlementNote;
use crate::core::ids::ExpenseId;
use crate::error::StoreError;
use crate::store::UnitOfWork;
use log::info;

/// Whether a set of notes settles its expense: non-empty, all paid.
///
/// # Examples
///
/// ```
/// use settlement_engine::core::expense::SettlementNote;
/// use settlement_engine::core::ids::{ExpenseId, MemberId, NoteId};
/// use settlement_engine::settlement::aggregator::all_paid;
/// use rust_decimal_macros::dec;
///
/// let note = |id, paid| {
///     SettlementNote::new(NoteId::new(id), ExpenseId::new(1), MemberId::new(id), dec!(10))
///         .with_paid(Some(paid))
/// };
/// assert!(all_paid(&[note(1, true), note(2, true)]));
/// assert!(!all_paid(&[note(1, true), note(2, false)]));
/// assert!(!all_paid(&[]));
/// ```
pub fn all_paid(notes: &[SettlementNote]) -> bool {
    !notes.is_empty() && notes.iter().all(SettlementNote::is_paid)
}

/// Rolls note payments up into the expense's completion flag.
///
/// Runs inside the caller's unit of work so the flag commits together with
/// the transfer that paid the last note.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettlementAggregator;

impl SettlementAggregator {
    pub fn is_fully_settled<U: UnitOfWork>(
        &self,
        unit: &mut U,
        expense: ExpenseId,
    ) -> Result<bool, StoreError> {
        let notes = unit.list_notes(expense)?;
        Ok(all_paid(&notes))
    }

    /// Set the completion flag. A no-op when it is already set.
    pub fn mark_completed<U: UnitOfWork>(
        &self,
        unit: &mut U,
        expense: ExpenseId,
    ) -> Result<(), StoreError> {
        match unit.find_expense(expense)? {
            Some(current) if current.is_settlement_completed() => Ok(()),
            Some(_) => unit.mark_expense_completed(expense),
            None => Err(StoreError::MissingRow(format!("expense {expense}"))),
        }
    }

    /// Mark the expense completed if every note is paid. Returns whether the
    /// expense is now fully settled.
    pub fn reconcile<U: UnitOfWork>(
        &self,
        unit: &mut U,
        expense: ExpenseId,
    ) -> Result<bool, StoreError> {
        if !self.is_fully_settled(unit, expense)? {
            return Ok(false);
        }
        self.mark_completed(unit, expense)?;
        info!("expense {expense}: every note paid, settlement completed");
        Ok(true)
    }
}
