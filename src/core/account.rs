use crate::core::ids::{AccountId, MemberId};
use crate::core::money;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A member's linked bank account.
///
/// Accounts are plain values: the store hands out copies, and the transfer
/// executors compute new copies that the store writes back inside a unit of
/// work. A committed balance is never negative and `version` grows by one on
/// every committed balance change.
///
/// # Examples
///
/// ```
/// use settlement_engine::core::account::Account;
/// use settlement_engine::core::ids::{AccountId, MemberId};
/// use rust_decimal_macros::dec;
///
/// let account = Account::new(AccountId::new(1), MemberId::new(10), dec!(500));
/// assert!(account.can_debit(dec!(499)));
/// assert!(!account.can_debit(dec!(500)));
/// assert_eq!(account.version(), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    member: MemberId,
    balance: Decimal,
    active: bool,
    version: u64,
    updated_at: DateTime<Utc>,
}

impl Account {
    /// Create an active account at version 0.
    ///
    /// # Panics
    ///
    /// Panics if `balance` is negative.
    pub fn new(id: AccountId, member: MemberId, balance: Decimal) -> Self {
        assert!(
            balance >= Decimal::ZERO,
            "Account balance must not be negative, got {}",
            balance
        );
        Self {
            id,
            member,
            balance,
            active: true,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Start from a specific version counter.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Mark the account inactive.
    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn member(&self) -> MemberId {
        self.member
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Whether `amount` can leave this account under the strict debit rule.
    pub fn can_debit(&self, amount: Decimal) -> bool {
        money::is_positive(amount) && money::remaining_after_debit(self.balance, amount).is_some()
    }

    /// New copy with `delta` applied to the balance and the version bumped.
    ///
    /// Returns `None` when the result would be negative; the caller decides
    /// how to report that.
    pub fn adjusted(&self, delta: Decimal) -> Option<Self> {
        let balance = self.balance.checked_add(delta)?;
        if balance < Decimal::ZERO {
            return None;
        }
        Some(Self {
            balance,
            version: self.version + 1,
            updated_at: Utc::now(),
            ..self.clone()
        })
    }
}
