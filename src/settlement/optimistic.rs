//! Optimistic transfer: read freely, commit only if nothing changed.

use super::aggregator::SettlementAggregator;
use super::retry::{CancellationToken, RetryPolicy};
use super::{check_accounts, check_note, ensure_positive, mark_note_paid, persistence};
use crate::core::expense::TransferRequest;
use crate::error::SettlementError;
use crate::store::{SettlementStore, UnitOfWork, VersionedTransfer};
use log::{debug, info, warn};

/// Settles a note without holding locks across the read phase.
///
/// Each attempt opens its own unit of work, reads both accounts with their
/// version counters, validates, and writes both balances through one
/// version-checked update. Anything other than exactly two changed rows
/// means another writer got there first: the unit is dropped (rolled back)
/// and the attempt fails with [`SettlementError::VersionConflict`], which is
/// the only error retried here.
#[derive(Debug, Clone)]
pub struct OptimisticExecutor<S> {
    store: S,
    policy: RetryPolicy,
    cancel: CancellationToken,
    aggregator: SettlementAggregator,
}

impl<S: SettlementStore> OptimisticExecutor<S> {
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
            "[{}] optimistic settle: {} pays {} on {}",
            request.request_id(),
            request.debtor(),
            request.amount(),
            request.expense()
        );
        ensure_positive(request)?;
        let outcome = self.policy.run(
            &self.cancel,
            "optimistic settle",
            SettlementError::is_version_conflict,
            |_| self.attempt(request),
        )?;
        info!(
            "[{}] optimistic settle committed after {} retries",
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

        let sender = unit
            .find_account(sender_id)
            .map_err(|e| persistence(request, "reading sender account", e))?;
        let receiver = unit
            .find_account(receiver_id)
            .map_err(|e| persistence(request, "reading receiver account", e))?;
        let (sender, receiver) = match (sender, receiver) {
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

        let changed = unit
            .update_balances_if_version(&VersionedTransfer {
                sender: sender_id,
                receiver: receiver_id,
                amount,
                sender_version: sender.version(),
                receiver_version: receiver.version(),
            })
            .map_err(|e| persistence(request, "versioned balance update", e))?;
        if changed != 2 {
            debug!(
                "[{}] versioned update changed {changed} rows (sender v{}, receiver v{})",
                request.request_id(),
                sender.version(),
                receiver.version()
            );
            return Err(SettlementError::VersionConflict {
                sender: sender_id,
                receiver: receiver_id,
            });
        }
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
}
