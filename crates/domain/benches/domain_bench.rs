use chrono::{Duration, Utc};
use common::{GatewayReference, IdempotencyKey, Money, TransactionId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{LineItem, Transaction, TransactionEvent};

fn line_items(count: u32) -> Vec<LineItem> {
    (1..=count)
        .map(|n| {
            LineItem::new(
                format!("SKU-{n:03}"),
                "WH-1",
                n,
                Money::from_cents(100 * i64::from(n)),
            )
        })
        .collect()
}

fn new_transaction(items: Vec<LineItem>) -> Transaction {
    let now = Utc::now();
    Transaction::create(
        TransactionId::new(),
        IdempotencyKey::new("bench"),
        items,
        now + Duration::minutes(15),
        now,
    )
    .unwrap()
}

fn bench_create_transaction(c: &mut Criterion) {
    let items = line_items(10);

    c.bench_function("domain/create_transaction_10_items", |b| {
        b.iter(|| new_transaction(items.clone()));
    });
}

fn bench_full_lifecycle(c: &mut Criterion) {
    let items = line_items(10);

    c.bench_function("domain/reserve_pay_complete", |b| {
        b.iter(|| {
            let now = Utc::now();
            let mut tx = new_transaction(items.clone());
            tx.mark_stock_reserved(now).unwrap();
            tx.await_payment(GatewayReference::new("PAY-BENCH"), now)
                .unwrap();
            tx.mark_paid(now).unwrap();
            tx.complete(now).unwrap()
        });
    });
}

fn bench_event_serialization(c: &mut Criterion) {
    let mut tx = new_transaction(line_items(50));
    let now = Utc::now();
    tx.mark_stock_reserved(now).unwrap();
    tx.await_payment(GatewayReference::new("PAY-BENCH"), now)
        .unwrap();
    tx.mark_paid(now).unwrap();
    let event = tx.complete(now).unwrap();

    c.bench_function("domain/serialize_completed_50_items", |b| {
        b.iter(|| serde_json::to_value(&event).unwrap());
    });

    let json = serde_json::to_value(&event).unwrap();
    c.bench_function("domain/deserialize_completed_50_items", |b| {
        b.iter(|| serde_json::from_value::<TransactionEvent>(json.clone()).unwrap());
    });
}

criterion_group!(
    benches,
    bench_create_transaction,
    bench_full_lifecycle,
    bench_event_serialization,
);
criterion_main!(benches);
