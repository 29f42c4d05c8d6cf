//! Benchmarks for keyword matching and routing.
//!
//! Run with: cargo bench --bench matcher

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use smsdispatch::config::{MappingConfig, PatternConfig, PatternFlag};
use smsdispatch::router::{PatternMatcher, RouteDecision, RouteTable};

fn patterns(count: usize) -> Vec<PatternConfig> {
    (0..count)
        .map(|i| PatternConfig {
            pattern: format!(r"KEYWORD{i}(\s+.*)?"),
            flags: vec![PatternFlag::CaseInsensitive, PatternFlag::DotAll],
        })
        .collect()
}

fn bench_match_body(c: &mut Criterion) {
    let mut group = c.benchmark_group("matcher/match_body");
    group.throughput(Throughput::Elements(1));

    for count in [1usize, 10, 100] {
        let matcher = PatternMatcher::compile(&patterns(count)).unwrap();
        let last = format!("keyword{} please stop", count - 1);

        group.bench_with_input(BenchmarkId::new("first", count), &count, |b, _| {
            b.iter(|| black_box(matcher.match_body(black_box("KEYWORD0 hello"))))
        });
        group.bench_with_input(BenchmarkId::new("last", count), &count, |b, _| {
            b.iter(|| black_box(matcher.match_body(black_box(&last))))
        });
        group.bench_with_input(BenchmarkId::new("miss", count), &count, |b, _| {
            b.iter(|| black_box(matcher.match_body(black_box("nothing to see here"))))
        });
    }

    group.finish();
}

fn bench_decide(c: &mut Criterion) {
    let matcher = PatternMatcher::compile(&patterns(10)).unwrap();
    let mappings: Vec<MappingConfig> = (0..1000)
        .map(|i| MappingConfig {
            number: format!("3{i:04}"),
            endpoint: i % 4,
        })
        .collect();
    let routes = RouteTable::build(&mappings, 4).unwrap();

    c.bench_function("router/decide", |b| {
        b.iter(|| black_box(RouteDecision::decide(&matcher, &routes, "keyword5 now", "30500")))
    });
}

criterion_group!(benches, bench_match_body, bench_decide);
criterion_main!(benches);
