//! Pessimistic transfer: lock both account rows, then move the money.

use super::aggregator::SettlementAggregator;
use super::lock_order::LockOrder;
use super::retry::{CancellationToken, RetryPolicy};
use super::{check_accounts, check_note, ensure_positive, mark_note_paid, persistence};
use crate::core::account::Account;
use crate::core::expense::TransferRequest;
use crate::core::ids::MemberId;
use crate::error::SettlementError;
use crate::store::{SettlementStore, UnitOfWork};
use log::{debug, info, warn};

/// Settles a note while holding exclusive locks on both accounts.
///
/// Each attempt is one unit of work: resolve the expense, lock the sender
/// and the receiver in [`LockOrder`], validate, move the funds, pay the note
/// and reconcile the expense, commit. Only lock contention is retried; every
/// other failure is returned as is.
#[derive(Debug, Clone)]
pub struct PessimisticExecutor<S> {
    store: S,
    policy: RetryPolicy,
    cancel: CancellationToken,
    aggregator: SettlementAggregator,
}

impl<S: SettlementStore> PessimisticExecutor<S> {
    pub fn new(store: S, policy: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            cancel: CancellationToken::new(),
            aggregator: SettlementAggregator,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run the transfer, returning how many retries it took.
    pub fn transfer(&self, request: &TransferRequest) -> Result<u32, SettlementError> {
        info!(
            "[{}] pessimistic settle: {} pays {} on {}",
            request.request_id(),
            request.debtor(),
            request.amount(),
            request.expense()
        );
        ensure_positive(request)?;
        let outcome = self.policy.run(
            &self.cancel,
            "pessimistic settle",
            SettlementError::is_lock_contention,
            |_| self.attempt(request),
        )?;
        info!(
            "[{}] pessimistic settle committed after {} retries",
            request.request_id(),
            outcome.retries
        );
        Ok(outcome.retries)
    }

    fn attempt(&self, request: &TransferRequest) -> Result<(), SettlementError> {
        let mut unit = self
            .store
            .begin()
            .map_err(|e| persistence(request, "opening unit of work", e))?;

        let expense = unit
            .find_expense(request.expense())
            .map_err(|e| persistence(request, "reading expense", e))?
            .ok_or_else(|| {
                warn!("[{}] expense {} not found", request.request_id(), request.expense());
                SettlementError::ExpenseNotFound(request.expense())
            })?;
        let sender_id = request.debtor();
        let receiver_id = expense.owner();
        if sender_id == receiver_id {
            return Err(SettlementError::SelfSettlement(sender_id));
        }

        let order = LockOrder::of(sender_id, receiver_id);
        let first = self.lock_account(&mut unit, request, order.first())?;
        let second = self.lock_account(&mut unit, request, order.second())?;
        let (sender, receiver) = match order.unorder(first, second) {
            (Some(sender), Some(receiver)) => (sender, receiver),
            (sender, _) => {
                let missing = if sender.is_none() { sender_id } else { receiver_id };
                warn!("[{}] no linked account for {missing}", request.request_id());
                return Err(SettlementError::AccountNotFound(missing));
            }
        };

        let amount = check_accounts(request, &sender, &receiver)?;
        let notes = unit
            .list_notes(request.expense())
            .map_err(|e| persistence(request, "reading notes", e))?;
        check_note(request, &notes)?;

        unit.transfer_balance(sender_id, receiver_id, amount)
            .map_err(|e| persistence(request, "moving funds", e))?;
        debug!(
            "[{}] moved {amount} from {sender_id} to {receiver_id}",
            request.request_id()
        );

        mark_note_paid(&mut unit, request)?;
        self.aggregator
            .reconcile(&mut unit, request.expense())
            .map_err(|e| persistence(request, "reconciling expense", e))?;
        unit.commit()
            .map_err(|e| persistence(request, "committing", e))
    }

    fn lock_account(
        &self,
        unit: &mut S::Unit,
        request: &TransferRequest,
        member: MemberId,
    ) -> Result<Option<Account>, SettlementError> {
        unit.find_account_for_update(member).map_err(|e| {
            if e.is_lock_contention() {
                debug!("[{}] lock on account of {member} not granted: {e}", request.request_id());
                SettlementError::LockContention(e)
            } else {
                persistence(request, "locking account", e)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::account::Account;
    use crate::core::expense::{Expense, SettlementNote};
    use crate::core::ids::{AccountId, ExpenseId, NoteId};
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn m(id: u64) -> MemberId {
        MemberId::new(id)
    }

    fn setup() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_account(Account::new(AccountId::new(1), m(1), dec!(1000000)));
        store.insert_account(Account::new(AccountId::new(2), m(2), dec!(1000000)));
        store.insert_expense(Expense::new(ExpenseId::new(1), m(2), dec!(2000)));
        store.insert_note(SettlementNote::new(NoteId::new(1), ExpenseId::new(1), m(1), dec!(1000)));
        store
    }

    fn executor(store: &MemoryStore) -> PessimisticExecutor<MemoryStore> {
        PessimisticExecutor::new(store.clone(), RetryPolicy::new(5, Duration::from_millis(1)))
    }

    #[test]
    fn test_moves_funds_and_pays_note() {
        let store = setup();
        let request = TransferRequest::new(m(1), ExpenseId::new(1), dec!(1000));
        assert_eq!(executor(&store).transfer(&request).unwrap(), 0);

        assert_eq!(store.account(m(1)).unwrap().balance(), dec!(999000));
        assert_eq!(store.account(m(2)).unwrap().balance(), dec!(1001000));
        assert!(store.notes(ExpenseId::new(1))[0].is_paid());
        assert!(store.expense(ExpenseId::new(1)).unwrap().is_settlement_completed());
        assert_eq!(store.locked_rows(), 0);
    }

    #[test]
    fn test_missing_expense_is_internal() {
        let store = setup();
        let request = TransferRequest::new(m(1), ExpenseId::new(9), dec!(1000));
        assert_eq!(
            executor(&store).transfer(&request).unwrap_err(),
            SettlementError::ExpenseNotFound(ExpenseId::new(9))
        );
    }

    #[test]
    fn test_missing_sender_account() {
        let store = setup();
        store.insert_note(SettlementNote::new(NoteId::new(2), ExpenseId::new(1), m(7), dec!(5)));
        let request = TransferRequest::new(m(7), ExpenseId::new(1), dec!(5));
        assert_eq!(
            executor(&store).transfer(&request).unwrap_err(),
            SettlementError::AccountNotFound(m(7))
        );
        assert_eq!(store.locked_rows(), 0);
    }

    #[test]
    fn test_owner_cannot_settle_own_expense() {
        let store = setup();
        let request = TransferRequest::new(m(2), ExpenseId::new(1), dec!(5));
        assert_eq!(
            executor(&store).transfer(&request).unwrap_err(),
            SettlementError::SelfSettlement(m(2))
        );
    }

    #[test]
    fn test_insufficient_balance_leaves_state_untouched() {
        let store = setup();
        let request = TransferRequest::new(m(1), ExpenseId::new(1), dec!(1000000));
        assert!(matches!(
            executor(&store).transfer(&request),
            Err(SettlementError::InsufficientBalance { .. })
        ));
        assert_eq!(store.account(m(1)).unwrap().balance(), dec!(1000000));
        assert!(!store.notes(ExpenseId::new(1))[0].is_paid());
    }

    #[test]
    fn test_second_payment_rejected() {
        let store = setup();
        let exec = executor(&store);
        exec.transfer(&TransferRequest::new(m(1), ExpenseId::new(1), dec!(1000)))
            .unwrap();
        assert_eq!(
            exec.transfer(&TransferRequest::new(m(1), ExpenseId::new(1), dec!(1000)))
                .unwrap_err(),
            SettlementError::AlreadyPaid {
                expense: ExpenseId::new(1),
                debtor: m(1)
            }
        );
        assert_eq!(store.account(m(1)).unwrap().balance(), dec!(999000));
    }

    #[test]
    fn test_contention_exhausts_into_overload() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(5));
        store.insert_account(Account::new(AccountId::new(1), m(1), dec!(100)));
        store.insert_account(Account::new(AccountId::new(2), m(2), dec!(100)));
        store.insert_expense(Expense::new(ExpenseId::new(1), m(2), dec!(20)));
        store.insert_note(SettlementNote::new(NoteId::new(1), ExpenseId::new(1), m(1), dec!(10)));

        let mut blocker = store.begin().unwrap();
        blocker.find_account_for_update(m(2)).unwrap();

        let exec = PessimisticExecutor::new(store.clone(), RetryPolicy::new(3, Duration::from_millis(1)));
        let err = exec
            .transfer(&TransferRequest::new(m(1), ExpenseId::new(1), dec!(10)))
            .unwrap_err();
        assert_eq!(err, SettlementError::Overload { attempts: 3 });
        drop(blocker);
        assert_eq!(store.account(m(1)).unwrap().balance(), dec!(100));
    }
}
