//! Aggregation benchmarks
//!
//! Grouping cost is what a window pays on every cycle after the fetch:
//! - whole-range totals per user
//! - per-date amounts per user

use chrono::{Days, NaiveDate};
use costgauge_billing::metering::{aggregate, by_date_and_group_key, by_group_key};
use costgauge_common::CostRecord;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_decimal::Decimal;
use std::time::Duration;

/// `days` daily buckets for `users` users
fn records(days: u64, users: usize) -> Vec<CostRecord> {
    let start = NaiveDate::from_ymd_opt(2024, 5, 5).unwrap();
    (0..days)
        .flat_map(|d| {
            let day = start.checked_add_days(Days::new(d)).unwrap();
            (0..users).map(move |u| {
                CostRecord::new(day, format!("user-{}", u), Decimal::new(1234 + u as i64, 2)).unwrap()
            })
        })
        .collect()
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    group.measurement_time(Duration::from_secs(5));

    for days in [1u64, 7, 30].iter() {
        let input = records(*days, 200);
        group.throughput(Throughput::Elements(input.len() as u64));

        group.bench_with_input(BenchmarkId::new("by_group_key", days), &input, |b, input| {
            b.iter(|| aggregate(black_box(input), by_group_key));
        });

        group.bench_with_input(
            BenchmarkId::new("by_date_and_group_key", days),
            &input,
            |b, input| {
                b.iter(|| aggregate(black_box(input), by_date_and_group_key));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_aggregate);
criterion_main!(benches);
