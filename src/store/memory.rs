//! In-process implementation of the settlement store.
//!
//! Behaves like a row-locking database at read-committed isolation:
//!
//! - plain reads see committed rows plus the unit's own pending writes;
//! - writes are staged in the unit and applied together on commit;
//! - account rows carry exclusive locks, taken by for-update reads and by
//!   both balance updates, held until the unit commits or is dropped;
//! - a lock wait longer than the configured timeout fails with
//!   [`StoreError::LockTimeout`]. There is no deadlock detector, so a lock
//!   cycle shows up as timeouts on both sides.

use super::{SettlementStore, UnitOfWork, VersionedTransfer};
use crate::core::account::Account;
use crate::core::expense::{Expense, SettlementNote};
use crate::core::ids::{ExpenseId, MemberId, NoteId};
use crate::error::StoreError;
use log::{debug, trace};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<MemberId, Account>,
    expenses: HashMap<ExpenseId, Expense>,
    notes: BTreeMap<NoteId, SettlementNote>,
}

#[derive(Debug)]
struct Shared {
    tables: Mutex<Tables>,
    /// member -> id of the unit holding the row lock
    row_locks: Mutex<HashMap<MemberId, u64>>,
    released: Condvar,
    lock_timeout: Duration,
    next_unit: AtomicU64,
}

/// Shared handle to an in-memory store. Clones see the same data.
///
/// # Examples
///
/// ```
/// use settlement_engine::core::account::Account;
/// use settlement_engine::core::ids::{AccountId, MemberId};
/// use settlement_engine::store::{MemoryStore, SettlementStore, UnitOfWork};
/// use rust_decimal_macros::dec;
///
/// let store = MemoryStore::new();
/// store.insert_account(Account::new(AccountId::new(1), MemberId::new(1), dec!(100)));
/// store.insert_account(Account::new(AccountId::new(2), MemberId::new(2), dec!(100)));
///
/// let mut unit = store.begin().unwrap();
/// unit.transfer_balance(MemberId::new(1), MemberId::new(2), dec!(30)).unwrap();
/// assert_eq!(store.account(MemberId::new(1)).unwrap().balance(), dec!(100));
/// unit.commit().unwrap();
/// assert_eq!(store.account(MemberId::new(1)).unwrap().balance(), dec!(70));
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                released: Condvar::new(),
                lock_timeout,
                next_unit: AtomicU64::new(1),
            }),
        }
    }

    // --- Seeding ---

    /// Insert or replace the account of `account.member()`.
    pub fn insert_account(&self, account: Account) {
        self.shared
            .tables
            .lock()
            .accounts
            .insert(account.member(), account);
    }

    pub fn insert_expense(&self, expense: Expense) {
        self.shared
            .tables
            .lock()
            .expenses
            .insert(expense.id(), expense);
    }

    pub fn insert_note(&self, note: SettlementNote) {
        self.shared.tables.lock().notes.insert(note.id(), note);
    }

    // --- Committed state ---

    pub fn account(&self, member: MemberId) -> Option<Account> {
        self.shared.tables.lock().accounts.get(&member).cloned()
    }

    pub fn expense(&self, expense: ExpenseId) -> Option<Expense> {
        self.shared.tables.lock().expenses.get(&expense).cloned()
    }

    pub fn notes(&self, expense: ExpenseId) -> Vec<SettlementNote> {
        self.shared
            .tables
            .lock()
            .notes
            .values()
            .filter(|n| n.expense() == expense)
            .cloned()
            .collect()
    }

    /// Notes that are received and not yet paid, across all expenses.
    pub fn pending_notes(&self) -> Vec<SettlementNote> {
        self.shared
            .tables
            .lock()
            .notes
            .values()
            .filter(|n| n.is_eligible())
            .cloned()
            .collect()
    }

    pub fn total_balance(&self) -> Decimal {
        self.shared
            .tables
            .lock()
            .accounts
            .values()
            .map(|a| a.balance())
            .sum()
    }

    /// Number of account rows currently locked by open units.
    pub fn locked_rows(&self) -> usize {
        self.shared.row_locks.lock().len()
    }
}

impl SettlementStore for MemoryStore {
    type Unit = MemoryUnit;

    fn begin(&self) -> Result<MemoryUnit, StoreError> {
        let id = self.shared.next_unit.fetch_add(1, Ordering::Relaxed);
        trace!("unit {id}: begin");
        Ok(MemoryUnit {
            shared: Arc::clone(&self.shared),
            id,
            held: Vec::new(),
            staged: Staged::default(),
            done: false,
        })
    }
}

#[derive(Debug, Default)]
struct Staged {
    accounts: HashMap<MemberId, Account>,
    expenses: HashMap<ExpenseId, Expense>,
    notes: HashMap<NoteId, SettlementNote>,
}

impl Staged {
    fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.expenses.is_empty() && self.notes.is_empty()
    }
}

/// Unit of work over a [`MemoryStore`]. Rolls back on drop unless committed.
#[derive(Debug)]
pub struct MemoryUnit {
    shared: Arc<Shared>,
    id: u64,
    held: Vec<MemberId>,
    staged: Staged,
    done: bool,
}

impl MemoryUnit {
    fn lock_row(&mut self, member: MemberId) -> Result<(), StoreError> {
        if self.held.contains(&member) {
            return Ok(());
        }
        let deadline = Instant::now() + self.shared.lock_timeout;
        let mut locks = self.shared.row_locks.lock();
        while locks.contains_key(&member) {
            if self.shared.released.wait_until(&mut locks, deadline).timed_out()
                && locks.contains_key(&member)
            {
                debug!("unit {}: lock wait timeout on account of {member}", self.id);
                return Err(StoreError::LockTimeout { member });
            }
        }
        locks.insert(member, self.id);
        self.held.push(member);
        trace!("unit {}: locked account of {member}", self.id);
        Ok(())
    }

    fn lock_pair(&mut self, a: MemberId, b: MemberId) -> Result<(), StoreError> {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        self.lock_row(low)?;
        self.lock_row(high)
    }

    fn release_rows(&mut self) {
        if self.held.is_empty() {
            return;
        }
        {
            let mut locks = self.shared.row_locks.lock();
            for member in self.held.drain(..) {
                locks.remove(&member);
            }
        }
        self.shared.released.notify_all();
    }

    fn current_account(&self, member: MemberId) -> Option<Account> {
        if let Some(account) = self.staged.accounts.get(&member) {
            return Some(account.clone());
        }
        self.shared.tables.lock().accounts.get(&member).cloned()
    }

    fn adjusted_account(&self, member: MemberId, delta: Decimal) -> Result<Account, StoreError> {
        let account = self
            .current_account(member)
            .ok_or_else(|| StoreError::MissingRow(format!("account of member {member}")))?;
        account.adjusted(delta).ok_or_else(|| {
            StoreError::ConstraintViolation(format!(
                "balance of member {member} would become negative"
            ))
        })
    }

    fn current_expense(&self, expense: ExpenseId) -> Option<Expense> {
        if let Some(staged) = self.staged.expenses.get(&expense) {
            return Some(staged.clone());
        }
        self.shared.tables.lock().expenses.get(&expense).cloned()
    }

    fn current_notes(&self, expense: ExpenseId) -> Vec<SettlementNote> {
        let tables = self.shared.tables.lock();
        tables
            .notes
            .values()
            .filter(|n| n.expense() == expense)
            .map(|n| self.staged.notes.get(&n.id()).unwrap_or(n).clone())
            .collect()
    }
}

impl UnitOfWork for MemoryUnit {
    fn find_account(&mut self, member: MemberId) -> Result<Option<Account>, StoreError> {
        Ok(self.current_account(member))
    }

    fn find_account_for_update(
        &mut self,
        member: MemberId,
    ) -> Result<Option<Account>, StoreError> {
        self.lock_row(member)?;
        Ok(self.current_account(member))
    }

    fn update_balances_if_version(
        &mut self,
        transfer: &VersionedTransfer,
    ) -> Result<u64, StoreError> {
        self.lock_pair(transfer.sender, transfer.receiver)?;
        let rows = [
            (transfer.sender, transfer.sender_version, -transfer.amount),
            (transfer.receiver, transfer.receiver_version, transfer.amount),
        ];
        let mut changed = 0;
        for (member, expected, delta) in rows {
            let matches = self
                .current_account(member)
                .is_some_and(|a| a.version() == expected);
            if matches {
                let updated = self.adjusted_account(member, delta)?;
                self.staged.accounts.insert(member, updated);
                changed += 1;
            }
        }
        trace!("unit {}: versioned update changed {changed} rows", self.id);
        Ok(changed)
    }

    fn transfer_balance(
        &mut self,
        sender: MemberId,
        receiver: MemberId,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        self.lock_pair(sender, receiver)?;
        let debited = self.adjusted_account(sender, -amount)?;
        self.staged.accounts.insert(sender, debited);
        let credited = self.adjusted_account(receiver, amount)?;
        self.staged.accounts.insert(receiver, credited);
        Ok(())
    }

    fn find_expense(&mut self, expense: ExpenseId) -> Result<Option<Expense>, StoreError> {
        Ok(self.current_expense(expense))
    }

    fn mark_expense_completed(&mut self, expense: ExpenseId) -> Result<(), StoreError> {
        let current = self
            .current_expense(expense)
            .ok_or_else(|| StoreError::MissingRow(format!("expense {expense}")))?;
        self.staged.expenses.insert(expense, current.completed());
        Ok(())
    }

    fn mark_note_paid(&mut self, expense: ExpenseId, debtor: MemberId) -> Result<u64, StoreError> {
        let unpaid: Vec<SettlementNote> = self
            .current_notes(expense)
            .into_iter()
            .filter(|n| n.debtor() == debtor && !n.is_paid())
            .collect();
        let changed = unpaid.len() as u64;
        for note in unpaid {
            self.staged
                .notes
                .insert(note.id(), note.with_paid(Some(true)));
        }
        Ok(changed)
    }

    fn list_notes(&mut self, expense: ExpenseId) -> Result<Vec<SettlementNote>, StoreError> {
        Ok(self.current_notes(expense))
    }

    fn commit(mut self) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut self.staged);
        {
            let mut tables = self.shared.tables.lock();
            tables.accounts.extend(staged.accounts);
            tables.expenses.extend(staged.expenses);
            tables.notes.extend(staged.notes);
        }
        self.done = true;
        trace!("unit {}: committed", self.id);
        self.release_rows();
        Ok(())
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        if !self.done && !self.staged.is_empty() {
            debug!("unit {}: rolled back", self.id);
        }
        self.release_rows();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::AccountId;
    use rust_decimal_macros::dec;

    fn seeded(lock_timeout: Duration) -> MemoryStore {
        let store = MemoryStore::with_lock_timeout(lock_timeout);
        for member in 1..=3 {
            store.insert_account(Account::new(
                AccountId::new(member),
                MemberId::new(member),
                dec!(1000),
            ));
        }
        store.insert_expense(Expense::new(ExpenseId::new(1), MemberId::new(1), dec!(300)));
        store.insert_note(SettlementNote::new(
            NoteId::new(1),
            ExpenseId::new(1),
            MemberId::new(2),
            dec!(100),
        ));
        store.insert_note(SettlementNote::new(
            NoteId::new(2),
            ExpenseId::new(1),
            MemberId::new(3),
            dec!(100),
        ));
        store
    }

    fn m(id: u64) -> MemberId {
        MemberId::new(id)
    }

    #[test]
    fn test_uncommitted_writes_are_invisible() {
        let store = seeded(DEFAULT_LOCK_TIMEOUT);
        let mut unit = store.begin().unwrap();
        unit.transfer_balance(m(2), m(1), dec!(100)).unwrap();
        assert_eq!(unit.find_account(m(2)).unwrap().unwrap().balance(), dec!(900));

        let mut other = store.begin().unwrap();
        assert_eq!(other.find_account(m(2)).unwrap().unwrap().balance(), dec!(1000));
        assert_eq!(store.account(m(2)).unwrap().balance(), dec!(1000));
    }

    #[test]
    fn test_drop_rolls_back_and_unlocks() {
        let store = seeded(DEFAULT_LOCK_TIMEOUT);
        {
            let mut unit = store.begin().unwrap();
            unit.transfer_balance(m(2), m(1), dec!(100)).unwrap();
            unit.mark_note_paid(ExpenseId::new(1), m(2)).unwrap();
            assert_eq!(store.locked_rows(), 2);
        }
        assert_eq!(store.locked_rows(), 0);
        assert_eq!(store.account(m(2)).unwrap().balance(), dec!(1000));
        assert!(store.notes(ExpenseId::new(1)).iter().all(|n| !n.is_paid()));
    }

    #[test]
    fn test_commit_applies_everything() {
        let store = seeded(DEFAULT_LOCK_TIMEOUT);
        let mut unit = store.begin().unwrap();
        unit.transfer_balance(m(2), m(1), dec!(100)).unwrap();
        assert_eq!(unit.mark_note_paid(ExpenseId::new(1), m(2)).unwrap(), 1);
        unit.commit().unwrap();

        assert_eq!(store.account(m(1)).unwrap().balance(), dec!(1100));
        assert_eq!(store.account(m(2)).unwrap().balance(), dec!(900));
        assert_eq!(store.account(m(2)).unwrap().version(), 1);
        assert_eq!(store.total_balance(), dec!(3000));
        assert_eq!(store.locked_rows(), 0);
    }

    #[test]
    fn test_versioned_update_counts_matching_rows() {
        let store = seeded(DEFAULT_LOCK_TIMEOUT);
        let mut unit = store.begin().unwrap();
        let stale = VersionedTransfer {
            sender: m(2),
            receiver: m(1),
            amount: dec!(10),
            sender_version: 0,
            receiver_version: 7,
        };
        assert_eq!(unit.update_balances_if_version(&stale).unwrap(), 1);
        drop(unit);

        let mut unit = store.begin().unwrap();
        let fresh = VersionedTransfer {
            receiver_version: 0,
            ..stale
        };
        assert_eq!(unit.update_balances_if_version(&fresh).unwrap(), 2);
        unit.commit().unwrap();
        assert_eq!(store.account(m(1)).unwrap().version(), 1);
        assert_eq!(store.account(m(2)).unwrap().balance(), dec!(990));
    }

    #[test]
    fn test_lock_wait_times_out() {
        let store = seeded(Duration::from_millis(20));
        let mut holder = store.begin().unwrap();
        holder.find_account_for_update(m(1)).unwrap();

        let mut waiter = store.begin().unwrap();
        assert_eq!(
            waiter.find_account_for_update(m(1)).unwrap_err(),
            StoreError::LockTimeout { member: m(1) }
        );

        drop(holder);
        assert!(waiter.find_account_for_update(m(1)).unwrap().is_some());
    }

    #[test]
    fn test_locks_are_reentrant_within_unit() {
        let store = seeded(Duration::from_millis(20));
        let mut unit = store.begin().unwrap();
        unit.find_account_for_update(m(1)).unwrap();
        unit.find_account_for_update(m(1)).unwrap();
        unit.transfer_balance(m(2), m(1), dec!(5)).unwrap();
        assert_eq!(store.locked_rows(), 2);
    }

    #[test]
    fn test_overdraft_is_a_constraint_violation() {
        let store = seeded(DEFAULT_LOCK_TIMEOUT);
        let mut unit = store.begin().unwrap();
        let err = unit.transfer_balance(m(2), m(1), dec!(1000.01)).unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn test_mark_note_paid_is_idempotent() {
        let store = seeded(DEFAULT_LOCK_TIMEOUT);
        let mut unit = store.begin().unwrap();
        assert_eq!(unit.mark_note_paid(ExpenseId::new(1), m(2)).unwrap(), 1);
        assert_eq!(unit.mark_note_paid(ExpenseId::new(1), m(2)).unwrap(), 0);
        let notes = unit.list_notes(ExpenseId::new(1)).unwrap();
        assert_eq!(notes.len(), 2);
        assert!(notes[0].is_paid());
        assert!(!notes[1].is_paid());
    }

    #[test]
    fn test_mark_expense_completed_missing_row() {
        let store = seeded(DEFAULT_LOCK_TIMEOUT);
        let mut unit = store.begin().unwrap();
        assert!(matches!(
            unit.mark_expense_completed(ExpenseId::new(99)),
            Err(StoreError::MissingRow(_))
        ));
    }

    #[test]
    fn test_pending_notes_skip_unreceived() {
        let store = seeded(DEFAULT_LOCK_TIMEOUT);
        store.insert_note(
            SettlementNote::new(NoteId::new(3), ExpenseId::new(1), m(3), dec!(1))
                .with_received(false),
        );
        assert_eq!(store.pending_notes().len(), 2);
    }
}
