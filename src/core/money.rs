//! Arithmetic and comparison rules over monetary amounts.
//!
//! Amounts are `rust_decimal::Decimal` everywhere; floating point never
//! touches a balance.

use rust_decimal::Decimal;

/// Whether `amount` can be transferred at all.
pub fn is_positive(amount: Decimal) -> bool {
    amount > Decimal::ZERO
}

/// Balance left after debiting `amount`, if the debit is allowed.
///
/// The rule is strict: the remaining balance must stay above zero, so a
/// debit of the full balance is refused just like an overdraft.
///
/// # Examples
///
/// ```
/// use settlement_engine::core::money::remaining_after_debit;
/// use rust_decimal_macros::dec;
///
/// assert_eq!(remaining_after_debit(dec!(100), dec!(40)), Some(dec!(60)));
/// assert_eq!(remaining_after_debit(dec!(100), dec!(100)), None);
/// assert_eq!(remaining_after_debit(dec!(100), dec!(101)), None);
/// ```
pub fn remaining_after_debit(balance: Decimal, amount: Decimal) -> Option<Decimal> {
    let remaining = balance.checked_sub(amount)?;
    (remaining > Decimal::ZERO).then_some(remaining)
}
