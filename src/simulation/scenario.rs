//! Random trip scenarios for exercising the engine.
//!
//! A scenario is a set of members with funded accounts and a number of
//! expenses, each paid by one member and split across some of the others.

use crate::core::account::Account;
use crate::core::expense::{Expense, SettlementNote};
use crate::core::ids::{AccountId, ExpenseId, MemberId, NoteId};
use crate::store::MemoryStore;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;

/// Configuration for generating a random scenario.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Number of members, each with one account.
    pub member_count: u64,
    /// Number of expenses.
    pub expense_count: u64,
    /// Opening balance of every account.
    pub initial_balance: Decimal,
    /// Smallest share a debtor can owe.
    pub min_share: Decimal,
    /// Largest share a debtor can owe.
    pub max_share: Decimal,
    /// Probability that a note's request was acknowledged by the debtor.
    pub received_ratio: f64,
    /// Row lock wait timeout of the generated store.
    pub lock_timeout: Duration,
    /// Fixes the random draw; the same seed always yields the same scenario.
    pub seed: Option<u64>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            member_count: 4,
            expense_count: 20,
            initial_balance: Decimal::from(1_000_000),
            min_share: Decimal::from(1_000),
            max_share: Decimal::from(100_000),
            received_ratio: 1.0,
            lock_timeout: Duration::from_secs(5),
            seed: None,
        }
    }
}

/// A seeded store plus what went into it.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub store: MemoryStore,
    pub members: Vec<MemberId>,
    pub expenses: Vec<ExpenseId>,
}

impl Scenario {
    pub fn note_count(&self) -> usize {
        self.expenses
            .iter()
            .map(|&e| self.store.notes(e).len())
            .sum()
    }
}

/// Generate and seed a random scenario.
pub fn generate_scenario(config: &ScenarioConfig) -> Scenario {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let store = MemoryStore::with_lock_timeout(config.lock_timeout);

    let members: Vec<MemberId> = (1..=config.member_count).map(MemberId::new).collect();
    for &member in &members {
        store.insert_account(Account::new(
            AccountId::new(member.get()),
            member,
            config.initial_balance,
        ));
    }

    let mut expenses = Vec::new();
    let mut next_note = 1;
    if members.len() < 2 {
        return Scenario {
            store,
            members,
            expenses,
        };
    }

    for e in 1..=config.expense_count {
        let expense = ExpenseId::new(e);
        let owner = members[rng.gen_range(0..members.len())];

        let mut debtors: Vec<MemberId> = members.iter().copied().filter(|&m| m != owner).collect();
        debtors.shuffle(&mut rng);
        debtors.truncate(rng.gen_range(1..=debtors.len()));

        let mut total = Decimal::ZERO;
        for debtor in debtors {
            let share = random_share(&mut rng, config.min_share, config.max_share);
            let received = rng.gen::<f64>() < config.received_ratio;
            store.insert_note(
                SettlementNote::new(NoteId::new(next_note), expense, debtor, share)
                    .with_received(received),
            );
            next_note += 1;
            total += share;
        }
        store.insert_expense(Expense::new(expense, owner, total));
        expenses.push(expense);
    }

    Scenario {
        store,
        members,
        expenses,
    }
}

/// Whole-unit share between `min` and `max`, inclusive.
fn random_share<R: Rng>(rng: &mut R, min: Decimal, max: Decimal) -> Decimal {
    let low = min.trunc().max(Decimal::ONE);
    let high = max.trunc().max(low);
    let span = (high - low).to_u64().unwrap_or(0);
    low + Decimal::from(rng.gen_range(0..=span))
}
