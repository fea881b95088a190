//! Benchmarks for snapshot folding and event dispatch

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use market_feed::{Candle, EventBus, EventFlags, MarketEvent, Quote, SnapshotAssembler};
use rust_decimal::Decimal;

const MINUTE_MS: u64 = 60_000;

/// Newest-first candle history, the way the feed streams it
fn create_history(count: u64) -> Vec<MarketEvent> {
    (0..count)
        .rev()
        .map(|i| {
            let mut candle = Candle::new("AAPL{=1m}", (i + 1) * MINUTE_MS, 0);
            candle.close = Decimal::from(150 + i % 10);
            candle.into()
        })
        .collect()
}

fn benchmark_fold(c: &mut Criterion) {
    let history = create_history(1_000);

    c.bench_function("fold_1000_candles", |b| {
        b.iter(|| {
            let assembler = SnapshotAssembler::<Candle>::new("AAPL{=1m}", MINUTE_MS, u64::MAX);
            for event in &history {
                assembler.apply(black_box(event));
            }
            black_box(assembler.result());
        })
    });

    let mut removal = Candle::new("AAPL{=1m}", 500 * MINUTE_MS, 0);
    removal.flags = EventFlags::REMOVE_EVENT;
    let removal: MarketEvent = removal.into();

    c.bench_function("fold_update_and_remove", |b| {
        let assembler = SnapshotAssembler::<Candle>::new("AAPL{=1m}", 0, u64::MAX);
        let update: MarketEvent = Candle::new("AAPL{=1m}", 500 * MINUTE_MS, 0).into();
        b.iter(|| {
            assembler.apply(black_box(&update));
            assembler.apply(black_box(&removal));
        })
    });
}

fn benchmark_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("runtime");

    let bus = EventBus::<MarketEvent>::new();
    for _ in 0..4 {
        bus.add(|event| {
            black_box(event.symbol());
        });
    }
    let quote: MarketEvent = Quote::new("AAPL").into();

    c.bench_function("dispatch_100_events_4_listeners", |b| {
        b.iter(|| {
            rt.block_on(async {
                for _ in 0..100 {
                    let _ = bus.dispatch(quote.clone()).await;
                }
                bus.drain().await;
            })
        })
    });
}

criterion_group!(benches, benchmark_fold, benchmark_dispatch);
criterion_main!(benches);
