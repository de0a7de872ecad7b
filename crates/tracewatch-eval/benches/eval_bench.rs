//! Per-step evaluation cost for the tracewatch evaluator.
//!
//! Benchmarks cover:
//! - Initial evaluation of formulas of increasing nesting depth
//! - Stepping a pending residual across admitted states
//! - The three combinators (`and`/`or`/`implies`) on fully-resolved operands
//!
//! These are latency-sensitive numbers: `spec.md` §5 treats evaluation and
//! stepping as synchronous, computation-only work on the hot admission
//! path, so a regression here is a regression a test run actually feels.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tracewatch_eval::{evaluate, step, test};
use tracewatch_formula::{always, and, eventually, implies, next, not, now, or, pure, Formula};
use tracewatch_runtime::Runtime;
use tracewatch_time::{Time, TimeUnit};

fn nested_always_eventually(depth: usize) -> Formula {
    if depth == 0 {
        pure(true)
    } else {
        always(eventually(nested_always_eventually(depth - 1)).within(1, TimeUnit::Seconds)).into()
    }
}

fn bench_initial_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");

    group.bench_function("pure", |b| {
        let f = pure(true);
        b.iter(|| evaluate(black_box(&f), Time::from_millis(0)));
    });

    group.bench_function("and_or_implies", |b| {
        let f = implies(
            and(pure(true), not(pure(false))),
            or(pure(false), pure(true)),
        );
        b.iter(|| evaluate(black_box(&f), Time::from_millis(0)));
    });

    for depth in [1usize, 4, 8] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("nested_modal", depth), &depth, |b, &depth| {
            let f = nested_always_eventually(depth);
            b.iter(|| evaluate(black_box(&f), Time::from_millis(0)));
        });
    }

    group.finish();
}

fn bench_stepping(c: &mut Criterion) {
    let mut group = c.benchmark_group("step");

    group.bench_function("always_over_long_trace", |b| {
        b.iter(|| {
            #[derive(Clone)]
            struct State {
                ok: bool,
            }
            let mut runtime: Runtime<State> = Runtime::new();
            let cell = runtime.extract(|s: &State| Ok(s.ok)).unwrap();
            let formula: Formula = always(now(move || Ok(cell.current().unwrap_or(false)))).into();

            let trace: Vec<(State, u64)> =
                (0..200).map(|i| (State { ok: true }, i * 10)).collect();
            black_box(test(&mut runtime, &formula, &trace).unwrap());
        });
    });

    group.bench_function("derived_next_passthrough", |b| {
        let residual = match evaluate(&next(pure(true)), Time::from_millis(0)).unwrap() {
            tracewatch_eval::Value::Residual { residual } => residual,
            _ => unreachable!(),
        };
        b.iter(|| step(black_box(&residual), Time::from_millis(10)));
    });

    group.finish();
}

criterion_group! {
    name = evaluation;
    config = Criterion::default();
    targets = bench_initial_evaluation, bench_stepping
}

criterion_main!(evaluation);
