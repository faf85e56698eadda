//! Settling one shared expense with both strategies.
//!
//! Three friends split a dinner paid by Ana. Bruno settles his share under
//! row locks, Carla settles hers with a version-checked write, and the
//! expense flips to settled once the last share lands.

use rust_decimal_macros::dec;
use settlement_engine::prelude::*;

fn main() {
    println!("╔══════════════════════════════════════════════╗");
    println!("║  settlement-engine: Single Expense Example   ║");
    println!("╚══════════════════════════════════════════════╝\n");

    let ana = MemberId::new(1);
    let bruno = MemberId::new(2);
    let carla = MemberId::new(3);
    let dinner = ExpenseId::new(1);

    let store = MemoryStore::new();
    store.insert_account(Account::new(AccountId::new(1), ana, dec!(500_000)));
    store.insert_account(Account::new(AccountId::new(2), bruno, dec!(200_000)));
    store.insert_account(Account::new(AccountId::new(3), carla, dec!(150_000)));
    store.insert_expense(Expense::new(dinner, ana, dec!(96_000)));
    store.insert_note(SettlementNote::new(NoteId::new(1), dinner, bruno, dec!(32_000)));
    store.insert_note(SettlementNote::new(NoteId::new(2), dinner, carla, dec!(32_000)));

    let service = SettlementService::new(store.clone(), &EngineConfig::default());

    // --- Step 1: pessimistic ---
    println!("━━━ Step 1: Bruno pays under row locks ━━━\n");
    let request = TransferRequest::new(bruno, dinner, dec!(32_000));
    match service.transfer_pessimistic(&request) {
        Ok(_) => println!("Bruno settled 32000 (request {})", request.request_id()),
        Err(e) => println!("Bruno failed: {} [{}]", e, e.code()),
    }
    print_balances(&store, &[ana, bruno, carla]);
    println!("Settled: {}\n", is_settled(&store, dinner));

    // --- Step 2: optimistic ---
    println!("━━━ Step 2: Carla pays with a version check ━━━\n");
    let request = TransferRequest::new(carla, dinner, dec!(32_000));
    match service.transfer_optimistic(&request) {
        Ok(retries) => println!("Carla settled 32000 after {} retries", retries),
        Err(e) => println!("Carla failed: {} [{}]", e, e.code()),
    }
    print_balances(&store, &[ana, bruno, carla]);
    println!("Settled: {}\n", is_settled(&store, dinner));

    // --- Step 3: a second payment is refused ---
    println!("━━━ Step 3: Bruno tries to pay again ━━━\n");
    let err = service
        .transfer(Strategy::Optimistic, &TransferRequest::new(bruno, dinner, dec!(32_000)))
        .err();
    match err {
        Some(e) => println!("Refused: {} (HTTP {})", e, e.http_status()),
        None => println!("Unexpectedly accepted"),
    }
    println!("Total money in the system: {}", store.total_balance());
}

fn print_balances(store: &MemoryStore, members: &[MemberId]) {
    for &member in members {
        if let Some(account) = store.account(member) {
            println!(
                "  {}  balance {:>8}  version {}",
                member,
                account.balance(),
                account.version()
            );
        }
    }
}

fn is_settled(store: &MemoryStore, expense: ExpenseId) -> bool {
    store
        .expense(expense)
        .map(|e| e.is_settlement_completed())
        .unwrap_or(false)
}
