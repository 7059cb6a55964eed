//! Throughput benchmarks for fan-out and bulk change detection.
//!
//! Run with: `cargo bench --bench throughput`

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_decimal::Decimal;
use std::sync::Arc;

use api_server::{Broadcaster, OverflowPolicy, Subscription};
use async_trait::async_trait;
use auth::{Authenticator, SessionManager};
use exchange_core::api::{MarketBookBatch, MarketBookSource, SessionToken};
use exchange_core::config::PollerConfig;
use exchange_core::db::InMemoryResultsSink;
use exchange_core::market_set::StaticMarketSet;
use exchange_core::types::{
    ExchangePrices, MarketBook, MarketStatus, PriceSize, Runner, RunnerStatus, UpdateEvent,
};
use market_poller::{fingerprint, ChangeDetector, Poller};

fn generate_market(market_id: &str, runners: usize, seed: i64) -> MarketBook {
    let runners = (0..runners)
        .map(|i| {
            let price = Decimal::new(150 + seed + i as i64 * 20, 2);
            Runner {
                selection_id: 1000 + i as i64,
                status: RunnerStatus::Active,
                last_price_traded: Some(price),
                total_matched: None,
                ex: ExchangePrices {
                    available_to_back: vec![PriceSize {
                        price,
                        size: Decimal::new(250, 0),
                    }],
                    available_to_lay: vec![PriceSize {
                        price: price + Decimal::new(2, 2),
                        size: Decimal::new(180, 0),
                    }],
                },
                sp: None,
            }
        })
        .collect();

    MarketBook {
        market_id: market_id.to_string(),
        status: MarketStatus::Open,
        inplay: false,
        runners,
        version: None,
        last_match_time: None,
        total_matched: None,
    }
}

fn generate_market_batch(count: usize, seed: i64) -> Vec<MarketBook> {
    (0..count)
        .map(|i| generate_market(&format!("1.{}", 200_000 + i), 10, seed))
        .collect()
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    let book = generate_market("1.500", 10, 0);

    for subscribers in [1, 10, 100, 500].iter() {
        let broadcaster = Broadcaster::new(1024, OverflowPolicy::DropOldest);
        let subs: Vec<Subscription> = (0..*subscribers)
            .filter_map(|_| broadcaster.subscribe())
            .collect();

        group.throughput(Throughput::Elements(*subscribers as u64));
        group.bench_with_input(
            BenchmarkId::new("publish", subscribers),
            &broadcaster,
            |b, broadcaster| {
                b.iter(|| {
                    let report = broadcaster.publish(UpdateEvent::market_update(&book, Utc::now()));
                    // Keep queues from saturating.
                    for sub in &subs {
                        while sub.try_recv().is_some() {}
                    }
                    black_box(report)
                })
            },
        );
    }

    group.finish();
}

fn bench_bulk_change_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_change_detection");

    for count in [40, 200, 1000].iter() {
        let steady = generate_market_batch(*count, 0);
        let moved = generate_market_batch(*count, 1);

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("steady", count), &steady, |b, books| {
            let mut detector = ChangeDetector::new();
            b.iter(|| {
                let changed = books
                    .iter()
                    .filter(|book| detector.has_changed(&book.market_id, fingerprint(book)))
                    .count();
                black_box(changed)
            })
        });
        group.bench_with_input(BenchmarkId::new("alternating", count), count, |b, _| {
            let mut detector = ChangeDetector::new();
            let mut flip = false;
            b.iter(|| {
                flip = !flip;
                let books = if flip { &moved } else { &steady };
                let changed = books
                    .iter()
                    .filter(|book| detector.has_changed(&book.market_id, fingerprint(book)))
                    .count();
                black_box(changed)
            })
        });
    }

    group.finish();
}

struct FixedLogin;

#[async_trait]
impl Authenticator for FixedLogin {
    async fn login(&self) -> auth::Result<SessionToken> {
        Ok(SessionToken::new("bench"))
    }
}

/// Returns the requested markets from a prebuilt table.
struct PrebuiltSource {
    books: Vec<MarketBook>,
}

#[async_trait]
impl MarketBookSource for PrebuiltSource {
    async fn list_market_books(
        &self,
        _token: &SessionToken,
        market_ids: &[String],
    ) -> exchange_core::Result<MarketBookBatch> {
        let books = self
            .books
            .iter()
            .filter(|book| market_ids.contains(&book.market_id))
            .cloned()
            .collect();
        Ok(MarketBookBatch {
            books,
            malformed: Vec::new(),
        })
    }
}

fn bench_poll_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("poll_tick");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for count in [40, 200].iter() {
        let books = generate_market_batch(*count, 0);
        let ids: Vec<String> = books.iter().map(|b| b.market_id.clone()).collect();
        let broadcaster = Broadcaster::new(16, OverflowPolicy::DropNewest);

        let mut poller = Poller::new(
            PollerConfig::default(),
            Arc::new(SessionManager::new(Arc::new(FixedLogin))),
            Arc::new(PrebuiltSource { books }),
            Arc::new(StaticMarketSet::new(ids)),
            Arc::new(InMemoryResultsSink::new()),
            Arc::new(broadcaster),
        );
        // Prime the detector so each measured tick is the unchanged path.
        runtime.block_on(poller.tick());

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_function(BenchmarkId::new("unchanged", count), |b| {
            b.iter(|| black_box(runtime.block_on(poller.tick())))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_fan_out,
    bench_bulk_change_detection,
    bench_poll_tick,
);

criterion_main!(benches);
