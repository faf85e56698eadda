//! Error types for the settlement engine.
//!
//! [`StoreError`] is what a persistence gateway reports. [`SettlementError`]
//! is what callers of the engine see; the retry drivers match on it to decide
//! between looping and propagating.

use crate::core::ids::{ExpenseId, MemberId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Failures reported by a [`crate::store::SettlementStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("lock wait timeout on account of member {member}")]
    LockTimeout { member: MemberId },

    #[error("deadlock detected by the lock manager")]
    Deadlock,

    #[error("row not found: {0}")]
    MissingRow(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Lock waits that the pessimistic path may retry.
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. } | StoreError::Deadlock)
    }
}

/// How a [`SettlementError`] should be treated by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or a business rule refused the transfer.
    Validation,
    /// Trusted data was inconsistent, storage failed, or the engine gave up.
    Internal,
    /// Transient contention; only ever seen inside a retry loop.
    Retryable,
}

/// Business-level failure of a settlement transfer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettlementError {
    // === Validation ===
    #[error("amount must be greater than zero, got {0}")]
    InvalidAmount(Decimal),

    #[error("member {0} owns the expense and cannot settle it")]
    SelfSettlement(MemberId),

    #[error("insufficient balance for member {member}: balance {balance}, amount {amount}")]
    InsufficientBalance {
        member: MemberId,
        balance: Decimal,
        amount: Decimal,
    },

    #[error("account of member {0} is inactive")]
    AccountInactive(MemberId),

    #[error("no linked account for member {0}")]
    AccountNotFound(MemberId),

    #[error("member {debtor} has no settlement note on expense {expense}")]
    NoteNotFound { expense: ExpenseId, debtor: MemberId },

    #[error("settlement note of member {debtor} on expense {expense} is already paid")]
    AlreadyPaid { expense: ExpenseId, debtor: MemberId },

    // === Internal ===
    #[error("expense {0} not found")]
    ExpenseNotFound(ExpenseId),

    #[error("temporary overload: gave up after {attempts} attempts")]
    Overload { attempts: u32 },

    #[error("interrupted while waiting to retry")]
    Interrupted,

    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u32 },

    #[error("persistence failure: {0}")]
    Persistence(#[source] StoreError),

    // === Retryable ===
    #[error("lock contention: {0}")]
    LockContention(#[source] StoreError),

    #[error("version conflict on accounts of members {sender} and {receiver}")]
    VersionConflict { sender: MemberId, receiver: MemberId },
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettlementError::InvalidAmount(_)
            | SettlementError::SelfSettlement(_)
            | SettlementError::InsufficientBalance { .. }
            | SettlementError::AccountInactive(_)
            | SettlementError::AccountNotFound(_)
            | SettlementError::NoteNotFound { .. }
            | SettlementError::AlreadyPaid { .. } => ErrorKind::Validation,
            SettlementError::ExpenseNotFound(_)
            | SettlementError::Overload { .. }
            | SettlementError::Interrupted
            | SettlementError::DeadlineExceeded { .. }
            | SettlementError::Persistence(_) => ErrorKind::Internal,
            SettlementError::LockContention(_) | SettlementError::VersionConflict { .. } => {
                ErrorKind::Retryable
            }
        }
    }

    pub fn is_lock_contention(&self) -> bool {
        matches!(self, SettlementError::LockContention(_))
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, SettlementError::VersionConflict { .. })
    }

    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::InvalidAmount(_) => "INVALID_AMOUNT",
            SettlementError::SelfSettlement(_) => "SELF_SETTLEMENT",
            SettlementError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            SettlementError::AccountInactive(_) => "ACCOUNT_INACTIVE",
            SettlementError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            SettlementError::NoteNotFound { .. } => "NOTE_NOT_FOUND",
            SettlementError::AlreadyPaid { .. } => "ALREADY_PAID",
            SettlementError::ExpenseNotFound(_) => "EXPENSE_NOT_FOUND",
            SettlementError::Overload { .. } => "TEMPORARY_OVERLOAD",
            SettlementError::Interrupted => "INTERRUPTED",
            SettlementError::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            SettlementError::Persistence(_) => "PERSISTENCE_ERROR",
            SettlementError::LockContention(_) => "LOCK_CONTENTION",
            SettlementError::VersionConflict { .. } => "VERSION_CONFLICT",
        }
    }

    /// HTTP status code suggestion.
    pub fn http_status(&self) -> u16 {
        match self {
            SettlementError::Overload { .. } => 503,
            SettlementError::DeadlineExceeded { .. } => 504,
            _ => match self.kind() {
                ErrorKind::Validation => 400,
                ErrorKind::Internal => 500,
                ErrorKind::Retryable => 409,
            },
        }
    }
}
