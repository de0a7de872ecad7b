//! End-to-end scenarios driven entirely through the public `tracewatch`
//! facade, as opposed to `tracewatch-eval`'s internal unit tests which
//! exercise the same inputs against the lower-level `evaluate`/`step`
//! functions directly.

use tracewatch::{
    always, and, eventually, implies, now, pure, Runtime, TestResult, TimeUnit, Time,
    ViolationTree,
};

fn ms(n: u64) -> Time {
    Time::from_millis(n)
}

#[derive(Clone)]
struct Notifications {
    count: i64,
}

/// S1: max_notifications.
#[test]
fn s1_max_notifications_fails_at_the_violating_state() {
    let mut runtime: Runtime<Notifications> = Runtime::new();
    let count = runtime.extract(|s: &Notifications| Ok(s.count)).unwrap();
    let formula = always(now(move || Ok(count.current().unwrap_or(0) <= 5)));

    let trace = [
        (Notifications { count: 1 }, 0),
        (Notifications { count: 1 }, 1000),
        (Notifications { count: 6 }, 3000),
    ];
    let result = tracewatch::test(&mut runtime, &formula.into(), &trace).unwrap();
    match result {
        TestResult::Failed {
            violation: ViolationTree::Always { time, inner },
        } => {
            assert_eq!(time, ms(3000));
            assert!(matches!(*inner, ViolationTree::False { .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[derive(Clone)]
struct ErrorState {
    err: Option<&'static str>,
}

/// S2: error disappears: the outer `always` never terminates within the
/// trace, so the verdict stays `Inconclusive`.
#[test]
fn s2_error_eventually_clearing_stays_inconclusive() {
    let mut runtime: Runtime<ErrorState> = Runtime::new();
    let err = runtime
        .extract(|s: &ErrorState| Ok(s.err.map(str::to_owned)))
        .unwrap();
    let antecedent_err = err.clone();
    let consequent_err = err.clone();

    let formula = always(implies(
        now(move || Ok(antecedent_err.current().unwrap_or(None).is_some())),
        eventually(now(move || Ok(consequent_err.current().unwrap_or(None).is_none())))
            .within(5, TimeUnit::Seconds)
            .unwrap(),
    ));

    let trace = [
        (ErrorState { err: None }, 0),
        (ErrorState { err: Some("x") }, 1000),
        (ErrorState { err: None }, 3000),
    ];
    let result = tracewatch::test(&mut runtime, &formula.into(), &trace).unwrap();
    assert!(matches!(result, TestResult::Inconclusive { .. }));
}

#[derive(Clone)]
struct Flag {
    b: bool,
}

/// S3: eventually timeout.
#[test]
fn s3_eventually_times_out() {
    let mut runtime: Runtime<Flag> = Runtime::new();
    let b = runtime.extract(|s: &Flag| Ok(s.b)).unwrap();
    let formula = eventually(now(move || Ok(b.current().unwrap_or(false))))
        .within(2, TimeUnit::Seconds)
        .unwrap();

    let trace = [
        (Flag { b: false }, 0),
        (Flag { b: false }, 1000),
        (Flag { b: false }, 3000),
    ];
    let result = tracewatch::test(&mut runtime, &formula, &trace).unwrap();
    match result {
        TestResult::Failed {
            violation: ViolationTree::Eventually { time, .. },
        } => assert_eq!(time, ms(3000)),
        other => panic!("unexpected {other:?}"),
    }
}

/// S4: eventually satisfied within the deadline.
#[test]
fn s4_eventually_satisfied_within_deadline() {
    let mut runtime: Runtime<Flag> = Runtime::new();
    let b = runtime.extract(|s: &Flag| Ok(s.b)).unwrap();
    let formula = eventually(now(move || Ok(b.current().unwrap_or(false))))
        .within(2, TimeUnit::Seconds)
        .unwrap();

    let trace = [(Flag { b: false }, 0), (Flag { b: true }, 1500)];
    let result = tracewatch::test(&mut runtime, &formula, &trace).unwrap();
    assert!(matches!(result, TestResult::Passed));
}

#[derive(Clone)]
struct TwoFlags {
    l: bool,
    r: bool,
}

/// S5: `(always L) and (always R)`: the violation tree blames the side
/// that actually broke.
#[test]
fn s5_and_of_two_always_blames_the_failing_side() {
    let mut runtime: Runtime<TwoFlags> = Runtime::new();
    let l = runtime.extract(|s: &TwoFlags| Ok(s.l)).unwrap();
    let r = runtime.extract(|s: &TwoFlags| Ok(s.r)).unwrap();
    let formula = and(
        always(now(move || Ok(l.current().unwrap_or(false)))),
        always(now(move || Ok(r.current().unwrap_or(false)))),
    );

    let trace = [
        (TwoFlags { l: true, r: true }, 0),
        (TwoFlags { l: true, r: false }, 1000),
    ];
    let result = tracewatch::test(&mut runtime, &formula, &trace).unwrap();
    match result {
        TestResult::Failed {
            violation: ViolationTree::And(_, right),
        } => match *right {
            ViolationTree::Always { time, .. } => assert_eq!(time, ms(1000)),
            other => panic!("unexpected right violation {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
}

/// S6: non-monotonic admission is reported by the runtime, not silently
/// reordered or dropped.
#[test]
fn s6_non_monotonic_admission_is_an_error() {
    #[derive(Clone)]
    struct Unit;
    let mut runtime: Runtime<Unit> = Runtime::new();
    runtime.register_state(Unit, 1000).unwrap();

    let trace = [(Unit, 500)];
    let err = tracewatch::test(&mut runtime, &pure(true), &trace).unwrap_err();
    assert!(matches!(
        err,
        tracewatch::TestError::Admission(tracewatch::RuntimeError::NonMonotonicTime { .. })
    ));
}
