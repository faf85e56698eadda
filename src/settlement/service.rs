use super::optimistic::OptimisticExecutor;
use super::pessimistic::PessimisticExecutor;
use super::retry::CancellationToken;
use crate::config::EngineConfig;
use crate::core::expense::TransferRequest;
use crate::error::SettlementError;
use crate::store::SettlementStore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Concurrency-control strategy used for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Pessimistic,
    Optimistic,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Pessimistic => write!(f, "Pessimistic"),
            Strategy::Optimistic => write!(f, "Optimistic"),
        }
    }
}

/// Entry point for callers: both strategies over one shared store.
///
/// # Examples
///
/// ```
/// use settlement_engine::prelude::*;
/// use rust_decimal_macros::dec;
///
/// let store = MemoryStore::new();
/// store.insert_account(Account::new(AccountId::new(1), MemberId::new(1), dec!(1000000)));
/// store.insert_account(Account::new(AccountId::new(2), MemberId::new(2), dec!(1000000)));
/// store.insert_expense(Expense::new(ExpenseId::new(1), MemberId::new(2), dec!(2000)));
/// store.insert_note(SettlementNote::new(NoteId::new(1), ExpenseId::new(1), MemberId::new(1), dec!(1000)));
///
/// let service = SettlementService::new(store.clone(), &EngineConfig::default());
/// let request = TransferRequest::new(MemberId::new(1), ExpenseId::new(1), dec!(1000));
/// assert_eq!(service.transfer_optimistic(&request).unwrap(), 0);
/// assert_eq!(store.account(MemberId::new(1)).unwrap().balance(), dec!(999000));
/// ```
#[derive(Debug, Clone)]
pub struct SettlementService<S> {
    pessimistic: PessimisticExecutor<S>,
    optimistic: OptimisticExecutor<S>,
}

impl<S: SettlementStore + Clone> SettlementService<S> {
    pub fn new(store: S, config: &EngineConfig) -> Self {
        Self {
            pessimistic: PessimisticExecutor::new(store.clone(), config.pessimistic_policy()),
            optimistic: OptimisticExecutor::new(store, config.optimistic_policy()),
        }
    }
}

impl<S: SettlementStore> SettlementService<S> {
    /// Route both executors' backoff through `cancel`.
    pub fn with_cancellation(self, cancel: CancellationToken) -> Self {
        Self {
            pessimistic: self.pessimistic.with_cancellation(cancel.clone()),
            optimistic: self.optimistic.with_cancellation(cancel),
        }
    }

    /// Settle under row locks. `Ok(true)` once committed; running out of
    /// attempts is an [`SettlementError::Overload`], never `Ok(false)`.
    pub fn transfer_pessimistic(&self, request: &TransferRequest) -> Result<bool, SettlementError> {
        self.pessimistic.transfer(request).map(|_| true)
    }

    /// Settle with version checks. Returns the number of retries used.
    pub fn transfer_optimistic(&self, request: &TransferRequest) -> Result<u32, SettlementError> {
        self.optimistic.transfer(request)
    }

    /// Settle with either strategy, returning the retries used.
    pub fn transfer(
        &self,
        strategy: Strategy,
        request: &TransferRequest,
    ) -> Result<u32, SettlementError> {
        match strategy {
            Strategy::Pessimistic => self.pessimistic.transfer(request),
            Strategy::Optimistic => self.optimistic.transfer(request),
        }
    }

    pub fn pessimistic(&self) -> &PessimisticExecutor<S> {
        &self.pessimistic
    }

    pub fn optimistic(&self) -> &OptimisticExecutor<S> {
        &self.optimistic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::account::Account;
    use crate::core::expense::{Expense, SettlementNote};
    use crate::core::ids::{AccountId, ExpenseId, MemberId, NoteId};
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn setup() -> MemoryStore {
        let store = MemoryStore::new();
        for member in 1..=3 {
            store.insert_account(Account::new(
                AccountId::new(member),
                MemberId::new(member),
                dec!(1000000),
            ));
        }
        store.insert_expense(Expense::new(ExpenseId::new(1), MemberId::new(1), dec!(3000)));
        for debtor in 2..=3 {
            store.insert_note(SettlementNote::new(
                NoteId::new(debtor),
                ExpenseId::new(1),
                MemberId::new(debtor),
                dec!(1000),
            ));
        }
        store
    }

    #[test]
    fn test_mixed_strategies_complete_expense() {
        let store = setup();
        let service = SettlementService::new(store.clone(), &EngineConfig::default());

        let first = TransferRequest::new(MemberId::new(2), ExpenseId::new(1), dec!(1000));
        assert!(service.transfer_pessimistic(&first).unwrap());
        assert!(!store.expense(ExpenseId::new(1)).unwrap().is_settlement_completed());

        let second = TransferRequest::new(MemberId::new(3), ExpenseId::new(1), dec!(1000));
        assert_eq!(service.transfer(Strategy::Optimistic, &second).unwrap(), 0);
        assert!(store.expense(ExpenseId::new(1)).unwrap().is_settlement_completed());
        assert_eq!(store.account(MemberId::new(1)).unwrap().balance(), dec!(1002000));
        assert_eq!(store.account(MemberId::new(1)).unwrap().version(), 2);
    }

    #[test]
    fn test_works_over_shared_arc_store() {
        let store = Arc::new(setup());
        let service = SettlementService::new(Arc::clone(&store), &EngineConfig::default());
        let request = TransferRequest::new(MemberId::new(2), ExpenseId::new(1), dec!(1000));
        assert!(service.transfer_pessimistic(&request).unwrap());
        assert_eq!(store.total_balance(), dec!(3000000));
    }

    #[test]
    fn test_strategy_display_and_serde() {
        assert_eq!(Strategy::Pessimistic.to_string(), "Pessimistic");
        assert_eq!(serde_json::to_string(&Strategy::Optimistic).unwrap(), "\"optimistic\"");
    }
}
