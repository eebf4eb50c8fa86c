use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use matching_engine::orderbook::OrderBook;
use matching_engine::orders::Side;

fn setup_order_book(depth: u64, orders_per_level: u64) -> OrderBook {
    let mut ob = OrderBook::new();
    for step in 1..=depth {
        for _ in 0..orders_per_level {
            ob.place_limit_order(Side::Sell, 1_000 + step, 1, 0).unwrap();
            ob.place_limit_order(Side::Buy, 1_000 - step, 1, 0).unwrap();
        }
    }
    ob
}

fn bench_match_order(c: &mut Criterion) {
    let depth = 100;
    let orders_per_level = 10;

    c.bench_function("market order sweeping half the asks", |b| {
        b.iter_batched(
            || setup_order_book(depth, orders_per_level),
            |mut ob| {
                ob.place_market_order(Side::Buy, depth * orders_per_level / 2, 99)
                    .unwrap()
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("crossing limit order sweeping all bids", |b| {
        b.iter_batched(
            || setup_order_book(depth, orders_per_level),
            |mut ob| {
                ob.place_limit_order(Side::Sell, 1_000 - depth, depth * orders_per_level, 99)
                    .unwrap()
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_match_order);
criterion_main!(benches);
