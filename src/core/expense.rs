use crate::core::ids::{ExpenseId, MemberId, NoteId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A shared expense paid up front by its owner.
///
/// The owner is the creditor: every settlement transfer for this expense
/// moves money into the owner's account. `settlement_completed` flips to
/// true once every note of the expense is paid and never flips back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    id: ExpenseId,
    owner: MemberId,
    amount: Decimal,
    settlement_completed: bool,
}

impl Expense {
    pub fn new(id: ExpenseId, owner: MemberId, amount: Decimal) -> Self {
        Self {
            id,
            owner,
            amount,
            settlement_completed: false,
        }
    }

    /// Copy of this expense with the completion flag set.
    pub fn completed(mut self) -> Self {
        self.settlement_completed = true;
        self
    }

    pub fn id(&self) -> ExpenseId {
        self.id
    }

    pub fn owner(&self) -> MemberId {
        self.owner
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn is_settlement_completed(&self) -> bool {
        self.settlement_completed
    }
}

/// One debtor's share of one expense.
///
/// `paid` mirrors a nullable column: `None` means the flag was never
/// written and counts as unpaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementNote {
    id: NoteId,
    expense: ExpenseId,
    debtor: MemberId,
    share: Decimal,
    received: bool,
    #[serde(default)]
    paid: Option<bool>,
}

impl SettlementNote {
    /// Create an unpaid note whose request has been received by the debtor.
    pub fn new(id: NoteId, expense: ExpenseId, debtor: MemberId, share: Decimal) -> Self {
        Self {
            id,
            expense,
            debtor,
            share,
            received: true,
            paid: Some(false),
        }
    }

    /// Set the "received" acknowledgment flag.
    pub fn with_received(mut self, received: bool) -> Self {
        self.received = received;
        self
    }

    /// Set the raw paid flag.
    pub fn with_paid(mut self, paid: Option<bool>) -> Self {
        self.paid = paid;
        self
    }

    pub fn id(&self) -> NoteId {
        self.id
    }

    pub fn expense(&self) -> ExpenseId {
        self.expense
    }

    pub fn debtor(&self) -> MemberId {
        self.debtor
    }

    pub fn share(&self) -> Decimal {
        self.share
    }

    pub fn is_received(&self) -> bool {
        self.received
    }

    pub fn is_paid(&self) -> bool {
        self.paid == Some(true)
    }

    /// Whether a caller should offer this note for settlement.
    pub fn is_eligible(&self) -> bool {
        self.received && !self.is_paid()
    }

    /// The transfer that settles this note in full.
    pub fn to_request(&self) -> TransferRequest {
        TransferRequest::new(self.debtor, self.expense, self.share)
    }
}

/// A request to pay `amount` from `debtor` towards `expense`.
///
/// Ephemeral: validated by the executors, never stored.
///
/// # Examples
///
/// ```
/// use settlement_engine::core::expense::TransferRequest;
/// use settlement_engine::core::ids::{ExpenseId, MemberId};
/// use rust_decimal_macros::dec;
///
/// let request = TransferRequest::new(MemberId::new(3), ExpenseId::new(1), dec!(64333));
/// assert_eq!(request.amount(), dec!(64333));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    request_id: Uuid,
    debtor: MemberId,
    expense: ExpenseId,
    amount: Decimal,
}

impl TransferRequest {
    pub fn new(debtor: MemberId, expense: ExpenseId, amount: Decimal) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            debtor,
            expense,
            amount,
        }
    }

    /// Correlation id used in log lines.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn debtor(&self) -> MemberId {
        self.debtor
    }

    pub fn expense(&self) -> ExpenseId {
        self.expense
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_note() -> SettlementNote {
        SettlementNote::new(NoteId::new(1), ExpenseId::new(1), MemberId::new(3), dec!(64333))
    }

    #[test]
    fn test_unset_paid_flag_counts_as_unpaid() {
        let note = sample_note().with_paid(None);
        assert!(!note.is_paid());
        assert!(note.is_eligible());
    }

    #[test]
    fn test_unreceived_note_not_eligible() {
        assert!(!sample_note().with_received(false).is_eligible());
        assert!(!sample_note().with_paid(Some(true)).is_eligible());
    }

    #[test]
    fn test_note_to_request() {
        let request = sample_note().to_request();
        assert_eq!(request.debtor(), MemberId::new(3));
        assert_eq!(request.expense(), ExpenseId::new(1));
        assert_eq!(request.amount(), dec!(64333));
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = TransferRequest::new(MemberId::new(1), ExpenseId::new(1), dec!(1));
        let b = TransferRequest::new(MemberId::new(1), ExpenseId::new(1), dec!(1));
        assert_ne!(a.request_id(), b.request_id());
    }

    #[test]
    fn test_expense_completed() {
        let expense = Expense::new(ExpenseId::new(1), MemberId::new(1), dec!(193000));
        assert!(!expense.is_settlement_completed());
        assert!(expense.completed().is_settlement_completed());
    }
}
