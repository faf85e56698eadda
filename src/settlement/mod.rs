//! The concurrent transfer engine.
//!
//! Two executors move a debtor's share into the expense owner's account:
//!
//! - [`pessimistic::PessimisticExecutor`] locks both account rows in
//!   [`lock_order::LockOrder`] and retries on lock contention;
//! - [`optimistic::OptimisticExecutor`] reads without locking and commits
//!   through a version-checked update, retrying on version conflicts.
//!
//! Both pay the debtor's note and let the
//! [`aggregator::SettlementAggregator`] close the expense inside the same
//! unit of work, and both back off according to a [`retry::RetryPolicy`].

pub mod aggregator;
pub mod lock_order;
pub mod optimistic;
pub mod pessimistic;
pub mod retry;
pub mod service;

use crate::core::account::Account;
use crate::core::expense::{SettlementNote, TransferRequest};
use crate::core::money;
use crate::error::{SettlementError, StoreError};
use crate::store::UnitOfWork;
use log::{debug, error, warn};
use rust_decimal::Decimal;

fn ensure_positive(request: &TransferRequest) -> Result<Decimal, SettlementError> {
    let amount = request.amount();
    if !money::is_positive(amount) {
        warn!("[{}] rejected: amount {amount} is not positive", request.request_id());
        return Err(SettlementError::InvalidAmount(amount));
    }
    Ok(amount)
}

/// Business checks on the two accounts, run once both are in hand.
fn check_accounts(
    request: &TransferRequest,
    sender: &Account,
    receiver: &Account,
) -> Result<Decimal, SettlementError> {
    let amount = ensure_positive(request)?;
    for account in [sender, receiver] {
        if !account.is_active() {
            warn!("[{}] rejected: account of {} is inactive", request.request_id(), account.member());
            return Err(SettlementError::AccountInactive(account.member()));
        }
    }
    if money::remaining_after_debit(sender.balance(), amount).is_none() {
        warn!(
            "[{}] rejected: insufficient balance, member={} balance={} amount={}",
            request.request_id(),
            sender.member(),
            sender.balance(),
            amount
        );
        return Err(SettlementError::InsufficientBalance {
            member: sender.member(),
            balance: sender.balance(),
            amount,
        });
    }
    Ok(amount)
}

/// The debtor must hold an unpaid note on the expense.
fn check_note(request: &TransferRequest, notes: &[SettlementNote]) -> Result<(), SettlementError> {
    let (expense, debtor) = (request.expense(), request.debtor());
    match notes.iter().find(|n| n.debtor() == debtor) {
        None => {
            warn!("[{}] rejected: {debtor} has no note on {expense}", request.request_id());
            Err(SettlementError::NoteNotFound { expense, debtor })
        }
        Some(note) if note.is_paid() => {
            warn!("[{}] rejected: note {} already paid", request.request_id(), note.id());
            Err(SettlementError::AlreadyPaid { expense, debtor })
        }
        Some(_) => Ok(()),
    }
}

fn mark_note_paid<U: UnitOfWork>(
    unit: &mut U,
    request: &TransferRequest,
) -> Result<(), SettlementError> {
    let (expense, debtor) = (request.expense(), request.debtor());
    let changed = unit
        .mark_note_paid(expense, debtor)
        .map_err(|e| persistence(request, "marking note paid", e))?;
    if changed == 0 {
        warn!("[{}] note of {debtor} on {expense} was paid concurrently", request.request_id());
        return Err(SettlementError::AlreadyPaid { expense, debtor });
    }
    debug!("[{}] note of {debtor} on {expense} marked paid", request.request_id());
    Ok(())
}

fn persistence(request: &TransferRequest, step: &str, err: StoreError) -> SettlementError {
    error!("[{}] {step} failed: {err}", request.request_id());
    SettlementError::Persistence(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::{AccountId, ExpenseId, MemberId, NoteId};
    use rust_decimal_macros::dec;

    fn request(amount: Decimal) -> TransferRequest {
        TransferRequest::new(MemberId::new(2), ExpenseId::new(1), amount)
    }

    fn account(member: u64, balance: Decimal) -> Account {
        Account::new(AccountId::new(member), MemberId::new(member), balance)
    }

    #[test]
    fn test_full_balance_rejected() {
        let err = check_accounts(&request(dec!(500)), &account(2, dec!(500)), &account(1, dec!(0)))
            .unwrap_err();
        assert!(matches!(err, SettlementError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_zero_and_negative_rejected() {
        for amount in [dec!(0), dec!(-10)] {
            let err = check_accounts(&request(amount), &account(2, dec!(500)), &account(1, dec!(0)))
                .unwrap_err();
            assert_eq!(err, SettlementError::InvalidAmount(amount));
        }
    }

    #[test]
    fn test_inactive_receiver_rejected() {
        let err = check_accounts(
            &request(dec!(10)),
            &account(2, dec!(500)),
            &account(1, dec!(0)).deactivated(),
        )
        .unwrap_err();
        assert_eq!(err, SettlementError::AccountInactive(MemberId::new(1)));
    }

    #[test]
    fn test_note_checks() {
        let note = SettlementNote::new(NoteId::new(1), ExpenseId::new(1), MemberId::new(2), dec!(10));
        assert!(check_note(&request(dec!(10)), &[note.clone()]).is_ok());
        assert!(matches!(
            check_note(&request(dec!(10)), &[note.with_paid(Some(true))]),
            Err(SettlementError::AlreadyPaid { .. })
        ));
        assert!(matches!(
            check_note(&request(dec!(10)), &[]),
            Err(SettlementError::NoteNotFound { .. })
        ));
    }
}
