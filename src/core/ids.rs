use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self::new(id)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a member taking part in a shared expense.
    ///
    /// Members are the unit of lock ordering: every account is looked up
    /// by its owning member, so the total order over `MemberId` is the
    /// order in which account rows get locked.
    ///
    /// # Examples
    ///
    /// ```
    /// use settlement_engine::core::ids::MemberId;
    ///
    /// assert!(MemberId::new(3) < MemberId::new(7));
    /// assert_eq!(MemberId::new(3).to_string(), "M-3");
    /// ```
    MemberId,
    "M"
);

numeric_id!(
    /// Identifier of an account row.
    AccountId,
    "A"
);

numeric_id!(
    /// Identifier of an expense.
    ExpenseId,
    "E"
);

numeric_id!(
    /// Identifier of a settlement note.
    NoteId,
    "N"
);
