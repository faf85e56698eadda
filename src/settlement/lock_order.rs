use crate::core::ids::MemberId;

/// The order in which the two accounts of a transfer get locked.
///
/// Accounts are always locked lowest member id first. Two transfers between
/// the same pair of members, whatever their direction, therefore request
/// the locks in the same sequence and can never wait on each other in a
/// cycle.
///
/// # Examples
///
/// ```
/// use settlement_engine::core::ids::MemberId;
/// use settlement_engine::settlement::lock_order::LockOrder;
///
/// let forward = LockOrder::of(MemberId::new(7), MemberId::new(3));
/// let backward = LockOrder::of(MemberId::new(3), MemberId::new(7));
/// assert_eq!(forward.sequence(), backward.sequence());
/// assert_eq!(forward.first(), MemberId::new(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOrder {
    first: MemberId,
    second: MemberId,
    sender_first: bool,
}

impl LockOrder {
    pub fn of(sender: MemberId, receiver: MemberId) -> Self {
        if sender <= receiver {
            Self {
                first: sender,
                second: receiver,
                sender_first: true,
            }
        } else {
            Self {
                first: receiver,
                second: sender,
                sender_first: false,
            }
        }
    }

    pub fn first(&self) -> MemberId {
        self.first
    }

    pub fn second(&self) -> MemberId {
        self.second
    }

    pub fn sequence(&self) -> [MemberId; 2] {
        [self.first, self.second]
    }

    /// Whether the sender's account is the one locked first.
    pub fn is_sender_first(&self) -> bool {
        self.sender_first
    }

    /// Put a pair fetched in lock order back into `(sender, receiver)` order.
    pub fn unorder<T>(&self, first: T, second: T) -> (T, T) {
        if self.sender_first {
            (first, second)
        } else {
            (second, first)
        }
    }
}
