//! # tracewatch
//!
//! Online, incremental, bounded-trace LTL evaluation for property-based
//! web-UI testing. This crate is a thin facade over four focused crates:
//!
//! - [`tracewatch_time`]: `Time` and `Duration`, the partial order
//!   everything else is built on.
//! - [`tracewatch_runtime`]: `Runtime` and extractor `Cell`s. Admits
//!   states and keeps time-indexed history for retrospective lookup.
//! - [`tracewatch_formula`]: the LTL `Formula` algebra and its DSL
//!   builders (`pure`, `now`, `lift`, `not`, `next`, `always`,
//!   `eventually`, `and`, `or`, `implies`).
//! - [`tracewatch_eval`]: the evaluator. `evaluate`, `step`, `test`, and
//!   the `Value`/`Residual`/`ViolationTree` types they produce.
//!
//! Most callers only need [`test`] (batch: hand it a whole trace) or
//! [`Monitor`] (incremental: feed it one state at a time as a browser
//! driver observes them).

pub use tracewatch_eval::{
    evaluate, step, test, Derived, EvalError, Residual, TestError, TestResult, Value,
    ViolationTree,
};
pub use tracewatch_formula::{
    always, and, eventually, implies, lift, lift_named, next, not, now, now_named, or, pure,
    AlwaysBuilder, EventuallyBuilder, Formula, FormulaError, FormulaNode, ThunkError,
};
pub use tracewatch_runtime::{
    Cell, CellError, CellValue, ExtractError, ExtractorCell, Runtime, RuntimeError, TimeCell,
};
pub use tracewatch_time::{Duration, Time, TimeUnit};

/// Errors raised while driving a [`Monitor`] one state at a time.
///
/// Wraps the two error families a single `feed` can hit: admitting the
/// state (`tracewatch_runtime::RuntimeError`) and evaluating or stepping
/// the formula against it (`tracewatch_eval::EvalError`).
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Admission(#[from] RuntimeError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Pairs a [`Runtime`] with a [`Formula`] and the evolving [`Value`],
/// for drivers that observe states one at a time rather than handing the
/// evaluator a complete trace up front (the `test` entry point).
///
/// Grounded on the teacher's pattern of a small orchestrating struct
/// layered over several lower-level pieces (see DESIGN.md). `Monitor`
/// plays the role `TemporalNeuralSolver` played over `TemporalTrace` in
/// the source repository, here specialised to tracewatch's own formula
/// and runtime types.
pub struct Monitor<S: 'static> {
    runtime: Runtime<S>,
    formula: Formula,
    value: Option<Value>,
}

impl<S: 'static> Monitor<S> {
    /// Builds a monitor over a fresh runtime and the formula to check.
    /// Register any extractor cells on `runtime` before constructing the
    /// monitor's first `feed` call; cells may only be registered before
    /// the first state admission (`spec.md` §4.1).
    pub fn new(runtime: Runtime<S>, formula: Formula) -> Self {
        Self {
            runtime,
            formula,
            value: None,
        }
    }

    /// The runtime backing this monitor, for registering extractor cells
    /// or inspecting admitted history.
    pub fn runtime(&self) -> &Runtime<S> {
        &self.runtime
    }

    /// Mutable access to the runtime, for registering extractor cells
    /// before the first `feed` call.
    pub fn runtime_mut(&mut self) -> &mut Runtime<S> {
        &mut self.runtime
    }

    /// The most recent verdict, or `None` if no state has been fed yet.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// `true` once the verdict is no longer a [`Residual`], i.e. `True` or
    /// `False`. Matches [`test`]'s early-stop behaviour: once resolved,
    /// further states carry no information the verdict still depends on.
    pub fn is_resolved(&self) -> bool {
        !matches!(self.value, None | Some(Value::Residual { .. }))
    }

    /// Admits `(state, timestamp_ms)` and advances the monitor's verdict.
    ///
    /// Once the verdict has resolved to `True` or `False`, further calls
    /// are no-ops that return the cached terminal value without admitting
    /// the new state, mirroring [`test`], which stops admitting states
    /// the moment a verdict is no longer a residual.
    pub fn feed(&mut self, state: S, timestamp_ms: u64) -> Result<&Value, MonitorError> {
        if self.is_resolved() {
            return Ok(self.value.as_ref().expect("is_resolved implies Some"));
        }

        let t = self.runtime.register_state(state, timestamp_ms)?;
        let next = match self.value.take() {
            None => evaluate(&self.formula, t)?,
            Some(Value::Residual { residual }) => step(&residual, t)?,
            Some(terminal) => terminal,
        };
        tracing::trace!(
            time = t.as_millis(),
            resolved = !matches!(next, Value::Residual { .. }),
            "monitor advanced to a new verdict"
        );
        self.value = Some(next);
        Ok(self.value.as_ref().expect("just assigned"))
    }

    /// Consumes the monitor, returning its final verdict as a
    /// [`TestResult`]. `Inconclusive` if the trace fed so far never
    /// resolved.
    pub fn into_result(self) -> TestResult {
        match self.value {
            Some(Value::True) => TestResult::Passed,
            Some(Value::False { violation }) => TestResult::Failed { violation },
            Some(Value::Residual { residual }) => TestResult::Inconclusive { residual },
            None => TestResult::Inconclusive {
                residual: Residual::True,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct State {
        count: i64,
    }

    #[test]
    fn monitor_feed_resolves_like_test() {
        let mut runtime: Runtime<State> = Runtime::new();
        let count = runtime.extract(|s: &State| Ok(s.count)).unwrap();
        let formula: Formula = always(now(move || Ok(count.current().unwrap_or(0) <= 5))).into();
        let mut monitor = Monitor::new(runtime, formula);

        monitor.feed(State { count: 1 }, 0).unwrap();
        assert!(!monitor.is_resolved());
        monitor.feed(State { count: 6 }, 1000).unwrap();
        assert!(monitor.is_resolved());
        assert!(matches!(monitor.value(), Some(Value::False { .. })));
    }

    #[test]
    fn monitor_ignores_states_fed_after_resolution() {
        let runtime: Runtime<State> = Runtime::new();
        let formula = pure(false);
        let mut monitor = Monitor::new(runtime, formula);
        monitor.feed(State { count: 0 }, 0).unwrap();
        assert!(monitor.is_resolved());

        // A second feed does not re-admit the state or change the verdict.
        monitor.feed(State { count: 0 }, 1000).unwrap();
        assert_eq!(monitor.runtime().current_time(), Some(Time::from_millis(0)));
    }

    #[test]
    fn into_result_reports_inconclusive_when_never_resolved() {
        let runtime: Runtime<State> = Runtime::new();
        let formula: Formula = always(pure(true)).into();
        let mut monitor = Monitor::new(runtime, formula);
        monitor.feed(State { count: 0 }, 0).unwrap();
        assert!(matches!(monitor.into_result(), TestResult::Inconclusive { .. }));
    }
}
