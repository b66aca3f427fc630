use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ragforge_runtime::metrics::Histogram;
use ragforge_runtime::rate_limiter::{RateLimiter, RateLimiterPolicy};
use ragforge_runtime::tracer::Tracer;

fn bench_histogram_observe(c: &mut Criterion) {
    let histogram = Histogram::new(10_000);
    c.bench_function("histogram_observe", |b| {
        b.iter(|| histogram.observe(black_box(42.5)));
    });
}

fn bench_histogram_percentiles(c: &mut Criterion) {
    let histogram = Histogram::new(10_000);
    for i in 0..1000 {
        histogram.observe((i % 500) as f64);
    }
    c.bench_function("histogram_get_percentiles", |b| {
        b.iter(|| histogram.get_percentiles(black_box(&[50.0, 95.0, 99.0])));
    });
}

fn bench_tracer_span_lifecycle(c: &mut Criterion) {
    let tracer = Tracer::new(1000);
    c.bench_function("tracer_start_and_end_span", |b| {
        b.iter(|| {
            let span_id = tracer.start_span("embedder.call");
            tracer.end_span(&span_id);
        });
    });
}

fn bench_rate_limiter_allow_request(c: &mut Criterion) {
    let limiter = RateLimiter::new(RateLimiterPolicy::default());
    c.bench_function("rate_limiter_allow_request", |b| {
        b.iter(|| limiter.allow_request(black_box("benchmark-caller")));
    });
}

criterion_group!(
    benches,
    bench_histogram_observe,
    bench_histogram_percentiles,
    bench_tracer_span_lifecycle,
    bench_rate_limiter_allow_request
);
criterion_main!(benches);
