use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rust_decimal_macros::dec;
use settlement_engine::prelude::*;
use settlement_engine::simulation::scenario::{generate_scenario, ScenarioConfig};

fn single_note_store() -> (MemoryStore, TransferRequest) {
    let store = MemoryStore::new();
    store.insert_account(Account::new(AccountId::new(1), MemberId::new(1), dec!(1000000)));
    store.insert_account(Account::new(AccountId::new(2), MemberId::new(2), dec!(1000000)));
    store.insert_expense(Expense::new(ExpenseId::new(1), MemberId::new(2), dec!(1000)));
    let note = SettlementNote::new(NoteId::new(1), ExpenseId::new(1), MemberId::new(1), dec!(1000));
    let request = note.to_request();
    store.insert_note(note);
    (store, request)
}

fn bench_single_transfer(c: &mut Criterion) {
    let engine = EngineConfig::default();
    for strategy in [Strategy::Pessimistic, Strategy::Optimistic] {
        c.bench_function(&format!("single_transfer_{}", strategy), |b| {
            b.iter_batched(
                single_note_store,
                |(store, request)| {
                    let service = SettlementService::new(store, &engine);
                    service.transfer(strategy, black_box(&request))
                },
                BatchSize::SmallInput,
            )
        });
    }
}

fn bench_settle_scenario(c: &mut Criterion) {
    let engine = EngineConfig::default();
    let config = ScenarioConfig {
        member_count: 10,
        expense_count: 50,
        ..Default::default()
    };
    for strategy in [Strategy::Pessimistic, Strategy::Optimistic] {
        c.bench_function(&format!("settle_50_expenses_{}", strategy), |b| {
            b.iter_batched(
                || generate_scenario(&config),
                |scenario| {
                    let service = SettlementService::new(scenario.store.clone(), &engine);
                    for note in scenario.store.pending_notes() {
                        let _ = service.transfer(strategy, black_box(&note.to_request()));
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, bench_single_transfer, bench_settle_scenario);
criterion_main!(benches);
