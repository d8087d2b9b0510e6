//! Benchmark for the effect driver.
//!
//! Measures bind chains, ability requests answered by the handler stack,
//! scoped handlers, the error channel, and memoized calls.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use stateless::error::ErrNil;
use stateless::{Ability, Effect, Runtime, errors, handler_fn, memoize, need};
use std::hint::black_box;

struct Tick;

impl Ability for Tick {
    type Output = u64;
    const NAME: &'static str = "Tick";
}

#[derive(Debug)]
struct Stop;

fn bind_chain(length: u64) -> Effect<ErrNil, u64> {
    (0..length).fold(Effect::pure(0), |effect, _| effect.flat_map(|value| Effect::pure(value + 1)))
}

fn tick_chain(length: u64) -> Effect<ErrNil, u64> {
    (0..length).fold(Effect::pure(0), |effect, _| {
        effect.flat_map(|total| Effect::perform(Tick).fmap(move |tick| total + tick))
    })
}

// =============================================================================
// 1. Pure Binds
// =============================================================================

fn benchmark_bind_chain(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("bind_chain");
    let runtime = Runtime::empty();

    for length in [10, 100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("flat_map", length), &length, |bencher, &length| {
            bencher.iter(|| black_box(runtime.run(bind_chain(black_box(length)))));
        });
    }

    group.bench_function("fmap_100", |bencher| {
        bencher.iter(|| {
            let effect = (0..100).fold(Effect::<ErrNil, u64>::pure(0), |effect, _| effect.fmap(|value| value + 1));
            black_box(runtime.run(effect))
        });
    });

    group.finish();
}

// =============================================================================
// 2. Ability Requests
// =============================================================================

fn benchmark_requests(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("requests");

    let shallow = Runtime::empty().with_handler(handler_fn(|_: Tick| 1));
    let deep = (0_u32..16).fold(Runtime::empty().with_handler(handler_fn(|_: Tick| 1)), |runtime, index| {
        runtime.supply(index)
    });

    for length in [10, 100, 1_000] {
        group.bench_with_input(BenchmarkId::new("top_of_stack", length), &length, |bencher, &length| {
            bencher.iter(|| black_box(shallow.run(tick_chain(black_box(length)))));
        });
        group.bench_with_input(BenchmarkId::new("under_16_handlers", length), &length, |bencher, &length| {
            bencher.iter(|| black_box(deep.run(tick_chain(black_box(length)))));
        });
    }

    group.bench_function("scoped_handler_100", |bencher| {
        bencher.iter(|| {
            let effect = tick_chain(100).handle(handler_fn(|_: Tick| 2));
            black_box(Runtime::empty().run(effect))
        });
    });

    group.bench_function("need_100", |bencher| {
        let runtime = Runtime::empty().supply(String::from("dependency"));
        bencher.iter(|| {
            let effect = Effect::sequence((0..100).map(|_| need::<String, ErrNil>().fmap(|value| value.len())));
            black_box(runtime.run(effect))
        });
    });

    group.finish();
}

// =============================================================================
// 3. Error Channel
// =============================================================================

fn benchmark_errors(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("errors");
    let runtime = Runtime::empty();

    for depth in [10, 100, 1_000] {
        group.bench_with_input(BenchmarkId::new("fail_then_catch", depth), &depth, |bencher, &depth| {
            bencher.iter(|| {
                let failing: Effect<errors![Stop], u64> = (0..depth)
                    .fold(Effect::fail(Stop), |effect, _| effect.fmap(|value: u64| value + 1));
                black_box(runtime.run(failing.catch::<Stop, _>()))
            });
        });
    }

    group.finish();
}

// =============================================================================
// 4. Memoization
// =============================================================================

fn benchmark_memoize(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("memoize");
    let runtime = Runtime::empty();
    let memo = memoize(|key: u64| bind_chain(key % 64));

    group.bench_function("cached_hit", |bencher| {
        let _ = runtime.run(memo.call(7));
        bencher.iter(|| black_box(runtime.run(memo.call(black_box(7)))));
    });

    group.bench_function("uncached_call", |bencher| {
        bencher.iter(|| black_box(runtime.run(bind_chain(black_box(7)))));
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_bind_chain,
    benchmark_requests,
    benchmark_errors,
    benchmark_memoize
);

criterion_main!(benches);
