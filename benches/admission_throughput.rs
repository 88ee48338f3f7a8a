//! Benchmarks for the hot paths of command handling and admission

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::{Duration, Instant};
use trivia_quorum::admission::AdmissionQueue;
use trivia_quorum::commands::format_rank_text;
use trivia_quorum::metrics::MetricsCollector;
use trivia_quorum::rate_limit::RateLimiter;
use trivia_quorum::types::RankEntry;
use trivia_quorum::utils::command_key;

fn bench_rate_limiter(c: &mut Criterion) {
    let limiter = RateLimiter::new();
    let keys: Vec<String> = (0..1_000)
        .map(|i| command_key("score", &format!("-100{}", i)))
        .collect();
    let cooldown = Duration::from_secs(30);

    c.bench_function("rate_limiter_allow_1000_keys", |b| {
        b.iter(|| {
            let now = Instant::now();
            for key in &keys {
                black_box(limiter.allow_at(key, cooldown, now));
            }
        })
    });

    c.bench_function("rate_limiter_cleanup", |b| {
        b.iter(|| {
            let limiter = RateLimiter::new();
            for key in &keys {
                limiter.allow(key, cooldown);
            }
            black_box(limiter.cleanup(Duration::ZERO))
        })
    });
}

fn bench_admission_fast_path(c: &mut Criterion) {
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let queue = AdmissionQueue::new(100, metrics);

    c.bench_function("admission_try_acquire_release", |b| {
        b.iter(|| {
            let slot = queue.try_acquire();
            black_box(slot.is_some())
        })
    });

    c.bench_function("admission_fill_and_drain", |b| {
        b.iter(|| {
            let slots: Vec<_> = (0..100).filter_map(|_| queue.try_acquire()).collect();
            black_box(queue.try_acquire().is_none());
            drop(slots);
        })
    });
}

fn bench_rank_formatting(c: &mut Criterion) {
    let ranking: Vec<RankEntry> = (1..=20)
        .map(|position| RankEntry {
            position: if position > 10 { position + 5 } else { position },
            score: 500 - position as i64 * 7,
            name: format!("Player <{}>", position),
        })
        .collect();

    c.bench_function("format_rank_text_20", |b| {
        b.iter(|| black_box(format_rank_text(black_box(&ranking))))
    });
}

criterion_group!(
    benches,
    bench_rate_limiter,
    bench_admission_fast_path,
    bench_rank_formatting
);
criterion_main!(benches);
