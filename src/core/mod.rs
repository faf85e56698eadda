//! Foundational types: identifiers, money rules, accounts, expenses.

pub mod account;
pub mod expense;
pub mod ids;
pub mod money;
