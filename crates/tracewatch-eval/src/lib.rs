//! # Tracewatch-Eval
//!
//! The evaluator: initial evaluation of a [`Formula`] at a time, and
//! incremental *stepping* of the resulting [`Residual`] as further states
//! are admitted. Produces three-valued [`Value`]s and, on falsification, a
//! structured [`ViolationTree`] explaining why.
//!
//! This is the crown jewel of the crate: the other three crates exist to
//! feed it a `Formula` and a stream of admitted `Time`s.

use serde::Serialize;
use tracewatch_formula::{Formula, FormulaNode, ThunkError};
use tracewatch_runtime::{Runtime, RuntimeError};
use tracewatch_time::{Duration, Time};

/// Errors raised while evaluating or stepping a formula, as opposed to
/// errors raised while admitting state (see [`tracewatch_runtime::RuntimeError`]).
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// `not(x)` where `x` is a temporal modal, or where `x` itself is
    /// still pending (a `Residual`). Negating a residual would require
    /// dualising both the residual and its eventual violation tree,
    /// which this core does not implement. Rewrite the formula instead,
    /// e.g. `always(not p)` rather than `not(eventually(p))`.
    #[error("not(...) cannot be applied to a modal or to a still-pending operand")]
    NegationOfModal,

    /// A thunk's closure failed, typically a [`tracewatch_runtime::CellError`]
    /// surfacing from an `at`/`current` call inside it.
    #[error("a thunk failed while producing a formula: {0}")]
    ExtractorFailed(#[from] ThunkError),
}

/// Why a formula evaluated to `False`, mirroring the shape of the part of
/// the formula that failed.
#[derive(Debug, Clone)]
pub enum ViolationTree {
    /// An atomic `pure(false)` witnessed at `time`.
    False { time: Time },
    /// `not(formula)` failed because `formula` held at `time`.
    Violation { time: Time, formula: Formula },
    /// Reserved for a `next(...)` violation; part of the stable schema
    /// (`spec.md` §3) but never constructed by this implementation, since
    /// stepping a deferred `Next` is a pure passthrough of its body's own
    /// `Value` (`spec.md` §4.7): whatever violation shape the body
    /// itself produces is bubbled up unwrapped.
    Next { time: Time, formula: Formula },
    /// `always(...)` failed because its body broke at `time`.
    Always { time: Time, inner: Box<ViolationTree> },
    /// `eventually(...)` never became true before its deadline.
    Eventually { time: Time, formula: Formula },
    And(Box<ViolationTree>, Box<ViolationTree>),
    Or(Box<ViolationTree>, Box<ViolationTree>),
    /// `implies(antecedent, consequent)` failed while the antecedent held.
    Implies {
        antecedent: Formula,
        consequent: Box<ViolationTree>,
    },
}

/// Mirrors [`ViolationTree`] for serialization. `Formula` itself is not
/// `Serialize` (its `Thunk` variant carries a closure), so every `Formula`
/// field is carried here as its prettyprinted `Display` string instead.
#[derive(Serialize)]
enum ViolationTreeRepr {
    False {
        time: Time,
    },
    Violation {
        time: Time,
        formula: String,
    },
    Next {
        time: Time,
        formula: String,
    },
    Always {
        time: Time,
        inner: Box<ViolationTreeRepr>,
    },
    Eventually {
        time: Time,
        formula: String,
    },
    And(Box<ViolationTreeRepr>, Box<ViolationTreeRepr>),
    Or(Box<ViolationTreeRepr>, Box<ViolationTreeRepr>),
    Implies {
        antecedent: String,
        consequent: Box<ViolationTreeRepr>,
    },
}

impl From<&ViolationTree> for ViolationTreeRepr {
    fn from(tree: &ViolationTree) -> Self {
        match tree {
            ViolationTree::False { time } => ViolationTreeRepr::False { time: *time },
            ViolationTree::Violation { time, formula } => ViolationTreeRepr::Violation {
                time: *time,
                formula: formula.to_string(),
            },
            ViolationTree::Next { time, formula } => ViolationTreeRepr::Next {
                time: *time,
                formula: formula.to_string(),
            },
            ViolationTree::Always { time, inner } => ViolationTreeRepr::Always {
                time: *time,
                inner: Box::new(inner.as_ref().into()),
            },
            ViolationTree::Eventually { time, formula } => ViolationTreeRepr::Eventually {
                time: *time,
                formula: formula.to_string(),
            },
            ViolationTree::And(left, right) => {
                ViolationTreeRepr::And(Box::new(left.as_ref().into()), Box::new(right.as_ref().into()))
            }
            ViolationTree::Or(left, right) => {
                ViolationTreeRepr::Or(Box::new(left.as_ref().into()), Box::new(right.as_ref().into()))
            }
            ViolationTree::Implies {
                antecedent,
                consequent,
            } => ViolationTreeRepr::Implies {
                antecedent: antecedent.to_string(),
                consequent: Box::new(consequent.as_ref().into()),
            },
        }
    }
}

impl Serialize for ViolationTree {
    fn serialize<Ser>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: serde::Serializer,
    {
        ViolationTreeRepr::from(self).serialize(serializer)
    }
}

/// A freshly-deferred modal, remembering the subformula that must be
/// re-checked and when it started. `Eventually` also carries its
/// deadline; `Always`'s deadline (if bounded) is recomputed from the
/// formula's own bound on re-entry rather than duplicated here
/// (`spec.md` §9).
#[derive(Debug, Clone)]
pub enum Derived {
    Next { formula: Formula, start: Time },
    Always { formula: Formula, start: Time },
    Eventually {
        formula: Formula,
        start: Time,
        deadline: Time,
    },
}

/// Deferred work preserving enough context to resume evaluation on the
/// next admitted state.
#[derive(Debug, Clone)]
pub enum Residual {
    /// Terminal, carried along for compositional reasons: a branch of a
    /// still-pending composite that has already resolved true.
    True,
    /// As above, but already resolved false.
    False(ViolationTree),
    Derived(Derived),
    And(Box<Residual>, Box<Residual>),
    Or(Box<Residual>, Box<Residual>),
    /// Retains the antecedent *formula* (not just its residual) so a
    /// later false-turned-true reversal of the antecedent can never
    /// silently drop the condition under which the consequent was
    /// expected (`spec.md` §4.6).
    Implies {
        antecedent_formula: Formula,
        antecedent: Box<Residual>,
        consequent: Box<Residual>,
    },
    /// The step residual of `always`'s body conjoined with a fresh
    /// deferral of `always` for the next step.
    AndAlways {
        start: Time,
        left: Box<Residual>,
        right: Box<Residual>,
    },
    /// Symmetrically for `eventually`.
    OrEventually {
        subformula: Formula,
        start: Time,
        deadline: Time,
        left: Box<Residual>,
        right: Box<Residual>,
    },
}

/// Mirrors [`Derived`] for serialization, prettyprinting `Formula` fields
/// the same way [`ViolationTreeRepr`] does.
#[derive(Serialize)]
enum DerivedRepr {
    Next { formula: String, start: Time },
    Always { formula: String, start: Time },
    Eventually { formula: String, start: Time, deadline: Time },
}

impl From<&Derived> for DerivedRepr {
    fn from(derived: &Derived) -> Self {
        match derived {
            Derived::Next { formula, start } => DerivedRepr::Next {
                formula: formula.to_string(),
                start: *start,
            },
            Derived::Always { formula, start } => DerivedRepr::Always {
                formula: formula.to_string(),
                start: *start,
            },
            Derived::Eventually {
                formula,
                start,
                deadline,
            } => DerivedRepr::Eventually {
                formula: formula.to_string(),
                start: *start,
                deadline: *deadline,
            },
        }
    }
}

/// Mirrors [`Residual`] for serialization. Not a public `Serialize` impl on
/// `Residual` itself (SPEC_FULL.md §1 only commits `ViolationTree` and
/// `TestResult` to serde), but [`TestResult::Inconclusive`] carries a
/// `Residual`, so this repr backs that one serializable path.
#[derive(Serialize)]
enum ResidualRepr {
    True,
    False(ViolationTreeRepr),
    Derived(DerivedRepr),
    And(Box<ResidualRepr>, Box<ResidualRepr>),
    Or(Box<ResidualRepr>, Box<ResidualRepr>),
    Implies {
        antecedent_formula: String,
        antecedent: Box<ResidualRepr>,
        consequent: Box<ResidualRepr>,
    },
    AndAlways {
        start: Time,
        left: Box<ResidualRepr>,
        right: Box<ResidualRepr>,
    },
    OrEventually {
        subformula: String,
        start: Time,
        deadline: Time,
        left: Box<ResidualRepr>,
        right: Box<ResidualRepr>,
    },
}

impl From<&Residual> for ResidualRepr {
    fn from(residual: &Residual) -> Self {
        match residual {
            Residual::True => ResidualRepr::True,
            Residual::False(violation) => ResidualRepr::False(violation.into()),
            Residual::Derived(derived) => ResidualRepr::Derived(derived.into()),
            Residual::And(left, right) => {
                ResidualRepr::And(Box::new(left.as_ref().into()), Box::new(right.as_ref().into()))
            }
            Residual::Or(left, right) => {
                ResidualRepr::Or(Box::new(left.as_ref().into()), Box::new(right.as_ref().into()))
            }
            Residual::Implies {
                antecedent_formula,
                antecedent,
                consequent,
            } => ResidualRepr::Implies {
                antecedent_formula: antecedent_formula.to_string(),
                antecedent: Box::new(antecedent.as_ref().into()),
                consequent: Box::new(consequent.as_ref().into()),
            },
            Residual::AndAlways { start, left, right } => ResidualRepr::AndAlways {
                start: *start,
                left: Box::new(left.as_ref().into()),
                right: Box::new(right.as_ref().into()),
            },
            Residual::OrEventually {
                subformula,
                start,
                deadline,
                left,
                right,
            } => ResidualRepr::OrEventually {
                subformula: subformula.to_string(),
                start: *start,
                deadline: *deadline,
                left: Box::new(left.as_ref().into()),
                right: Box::new(right.as_ref().into()),
            },
        }
    }
}

/// A three-valued verdict.
#[derive(Debug, Clone)]
pub enum Value {
    True,
    False { violation: ViolationTree },
    Residual { residual: Residual },
}

/// `evaluate(formula, t)`, `spec.md` §4.3.
pub fn evaluate(formula: &Formula, t: Time) -> Result<Value, EvalError> {
    match formula.node() {
        FormulaNode::Pure { value, .. } => Ok(if *value {
            Value::True
        } else {
            Value::False {
                violation: ViolationTree::False { time: t },
            }
        }),

        // The closure is invoked exactly once per evaluation site; this
        // recursive call is that one invocation.
        FormulaNode::Thunk { make, .. } => {
            let resolved = make()?;
            evaluate(&resolved, t)
        }

        FormulaNode::Not(g) => evaluate_not(g, t),

        FormulaNode::And(l, r) => {
            let lv = evaluate(l, t)?;
            let rv = evaluate(r, t)?;
            Ok(evaluate_and(lv, rv))
        }

        FormulaNode::Or(l, r) => {
            let lv = evaluate(l, t)?;
            let rv = evaluate(r, t)?;
            Ok(evaluate_or(lv, rv))
        }

        FormulaNode::Implies(a, c) => {
            let av = evaluate(a, t)?;
            let cv = evaluate(c, t)?;
            Ok(evaluate_implies(a.clone(), av, cv))
        }

        FormulaNode::Next(g) => {
            tracing::trace!(time = t.as_millis(), "next defers to the following admission");
            Ok(Value::Residual {
                residual: Residual::Derived(Derived::Next {
                    formula: g.clone(),
                    start: t,
                }),
            })
        }

        FormulaNode::Always { bound, body } => evaluate_always(*bound, body, t, t),

        FormulaNode::Eventually { bound, body } => {
            let bound = bound.expect("eventually is always bounded by the public DSL");
            evaluate_eventually(bound, body, t, t)
        }
    }
}

/// `step(residual, t)`, `spec.md` §4.7. Applied to a pending residual at
/// each newly admitted time.
pub fn step(residual: &Residual, t: Time) -> Result<Value, EvalError> {
    match residual {
        Residual::True => Ok(Value::True),
        Residual::False(violation) => Ok(Value::False {
            violation: violation.clone(),
        }),

        Residual::Derived(Derived::Next { formula, .. }) => evaluate(formula, t),

        Residual::Derived(Derived::Always { formula, start }) => match formula.node() {
            FormulaNode::Always { bound, body } => evaluate_always(*bound, body, *start, t),
            _ => unreachable!("Derived::Always always wraps an Always formula"),
        },

        Residual::Derived(Derived::Eventually {
            formula,
            start,
            deadline,
        }) => {
            if deadline.is_before(&t) {
                tracing::trace!(
                    time = t.as_millis(),
                    deadline = deadline.as_millis(),
                    "eventually residual falsified past its deadline"
                );
                return Ok(Value::False {
                    violation: ViolationTree::Eventually {
                        time: t,
                        formula: formula.clone(),
                    },
                });
            }
            match formula.node() {
                FormulaNode::Eventually { bound, body } => {
                    let bound = bound.expect("eventually is always bounded by the public DSL");
                    evaluate_eventually(bound, body, *start, t)
                }
                _ => unreachable!("Derived::Eventually always wraps an Eventually formula"),
            }
        }

        Residual::And(l, r) => {
            let lv = step(l, t)?;
            let rv = step(r, t)?;
            Ok(evaluate_and(lv, rv))
        }

        Residual::Or(l, r) => {
            let lv = step(l, t)?;
            let rv = step(r, t)?;
            Ok(evaluate_or(lv, rv))
        }

        Residual::Implies {
            antecedent_formula,
            antecedent,
            consequent,
        } => {
            let av = step(antecedent, t)?;
            let cv = step(consequent, t)?;
            Ok(evaluate_implies(antecedent_formula.clone(), av, cv))
        }

        Residual::AndAlways { left, right, .. } => {
            let lv = step(left, t)?;
            let rv = step(right, t)?;
            Ok(evaluate_and(lv, rv))
        }

        Residual::OrEventually {
            subformula,
            deadline,
            left,
            right,
            ..
        } => {
            if deadline.is_before(&t) {
                tracing::trace!(
                    time = t.as_millis(),
                    deadline = deadline.as_millis(),
                    "or_eventually falsified past its deadline"
                );
                return Ok(Value::False {
                    violation: ViolationTree::Eventually {
                        time: t,
                        formula: subformula.clone(),
                    },
                });
            }
            let lv = step(left, t)?;
            let rv = step(right, t)?;
            Ok(evaluate_or(lv, rv))
        }
    }
}

fn evaluate_not(g: &Formula, t: Time) -> Result<Value, EvalError> {
    match evaluate(g, t)? {
        Value::True => Ok(Value::False {
            violation: ViolationTree::Violation {
                time: t,
                formula: g.clone(),
            },
        }),
        Value::False { .. } => Ok(Value::True),
        Value::Residual { .. } => Err(EvalError::NegationOfModal),
    }
}

/// `evaluate_and`, `spec.md` §4.4.
fn evaluate_and(left: Value, right: Value) -> Value {
    use Value::{False, Residual as Res, True};
    match (left, right) {
        (True, True) => True,
        (True, False { violation }) => False { violation },
        (True, Res { residual }) => Res { residual },

        (False { violation: l }, True) => False { violation: l },
        (False { violation: l }, False { violation: r }) => False {
            violation: ViolationTree::And(Box::new(l), Box::new(r)),
        },
        // Short-circuit: the left side already failed.
        (False { violation: l }, Res { .. }) => False { violation: l },

        (Res { residual: l }, True) => Res { residual: l },
        // Short-circuit: no need to retain the left residual once the
        // right side falsifies.
        (Res { .. }, False { violation }) => False { violation },
        (Res { residual: l }, Res { residual: r }) => Res {
            residual: Residual::And(Box::new(l), Box::new(r)),
        },
    }
}

/// `evaluate_or`, `spec.md` §4.5, dual of `evaluate_and`.
fn evaluate_or(left: Value, right: Value) -> Value {
    use Value::{False, Residual as Res, True};
    match (left, right) {
        (True, _) => True,
        (_, True) => True,

        (False { violation: l }, False { violation: r }) => False {
            violation: ViolationTree::Or(Box::new(l), Box::new(r)),
        },
        (False { .. }, Res { residual: r }) => Res { residual: r },

        (Res { residual: l }, False { .. }) => Res { residual: l },
        (Res { residual: l }, Res { residual: r }) => Res {
            residual: Residual::Or(Box::new(l), Box::new(r)),
        },
    }
}

/// `evaluate_implies`, `spec.md` §4.6. Retains `antecedent_formula` in
/// every residual so a later report can show the condition under which
/// the consequent was expected.
fn evaluate_implies(antecedent_formula: Formula, antecedent: Value, consequent: Value) -> Value {
    use Value::{False, Residual as Res, True};
    match antecedent {
        False { .. } => True, // vacuous
        True => match consequent {
            True => True,
            False { violation } => False {
                violation: ViolationTree::Implies {
                    antecedent: antecedent_formula,
                    consequent: Box::new(violation),
                },
            },
            Res { residual } => Res {
                residual: Residual::Implies {
                    antecedent_formula,
                    antecedent: Box::new(Residual::True),
                    consequent: Box::new(residual),
                },
            },
        },
        Res { residual: a_res } => match consequent {
            True => True,
            False { violation } => Res {
                residual: Residual::Implies {
                    antecedent_formula,
                    antecedent: Box::new(a_res),
                    consequent: Box::new(Residual::False(violation)),
                },
            },
            Res { residual: c_res } => Res {
                residual: Residual::Implies {
                    antecedent_formula,
                    antecedent: Box::new(a_res),
                    consequent: Box::new(c_res),
                },
            },
        },
    }
}

/// Shared by initial evaluation and by stepping a `Derived::Always`.
/// `spec.md` §4.3 and §4.7 describe the same logic, re-entered with
/// `start` held fixed across steps.
fn evaluate_always(
    bound: Option<Duration>,
    body: &Formula,
    start: Time,
    t: Time,
) -> Result<Value, EvalError> {
    let body_value = evaluate(body, t)?;
    let left = match body_value {
        Value::False { violation } => {
            return Ok(Value::False {
                violation: ViolationTree::Always {
                    time: t,
                    inner: Box::new(violation),
                },
            });
        }
        Value::True => Residual::True,
        Value::Residual { residual } => residual,
    };

    if let Some(d) = bound {
        let deadline = start.add(d);
        if !t.is_before(&deadline) {
            tracing::trace!(
                time = t.as_millis(),
                deadline = deadline.as_millis(),
                "bounded always resolved true at its deadline"
            );
            return Ok(Value::True);
        }
    }

    Ok(Value::Residual {
        residual: Residual::AndAlways {
            start,
            left: Box::new(left),
            right: Box::new(Residual::Derived(Derived::Always {
                formula: body.clone(),
                start,
            })),
        },
    })
}

/// Shared by initial evaluation and by stepping a `Derived::Eventually`.
fn evaluate_eventually(
    bound: Duration,
    body: &Formula,
    start: Time,
    t: Time,
) -> Result<Value, EvalError> {
    let body_value = evaluate(body, t)?;
    if matches!(body_value, Value::True) {
        return Ok(Value::True);
    }

    let deadline = start.add(bound);
    if deadline.is_before(&t) {
        return Ok(Value::False {
            violation: ViolationTree::Eventually {
                time: t,
                formula: body.clone(),
            },
        });
    }

    let left = match body_value {
        Value::True => unreachable!("handled above"),
        Value::False { violation } => Residual::False(violation),
        Value::Residual { residual } => residual,
    };

    tracing::trace!(
        start = start.as_millis(),
        deadline = deadline.as_millis(),
        "eventually still pending, residual carried to the next admission"
    );
    Ok(Value::Residual {
        residual: Residual::OrEventually {
            subformula: body.clone(),
            start,
            deadline,
            left: Box::new(left),
            right: Box::new(Residual::Derived(Derived::Eventually {
                formula: body.clone(),
                start,
                deadline,
            })),
        },
    })
}

/// The outcome of running a formula against a whole trace.
#[derive(Debug, Clone)]
pub enum TestResult {
    Passed,
    Failed { violation: ViolationTree },
    Inconclusive { residual: Residual },
}

/// Mirrors [`TestResult`] for serialization, routing through
/// [`ViolationTreeRepr`] and [`ResidualRepr`] for the fields that
/// transitively hold a `Formula`.
#[derive(Serialize)]
enum TestResultRepr {
    Passed,
    Failed { violation: ViolationTreeRepr },
    Inconclusive { residual: ResidualRepr },
}

impl From<&TestResult> for TestResultRepr {
    fn from(result: &TestResult) -> Self {
        match result {
            TestResult::Passed => TestResultRepr::Passed,
            TestResult::Failed { violation } => TestResultRepr::Failed {
                violation: violation.into(),
            },
            TestResult::Inconclusive { residual } => TestResultRepr::Inconclusive {
                residual: residual.into(),
            },
        }
    }
}

impl Serialize for TestResult {
    fn serialize<Ser>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: serde::Serializer,
    {
        TestResultRepr::from(self).serialize(serializer)
    }
}

/// Errors raised by [`test`] itself, or bubbled up from the admission and
/// evaluation steps it drives.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error("a trace must contain at least one state")]
    EmptyTrace,
    #[error(transparent)]
    Admission(#[from] RuntimeError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// `test(runtime, formula, trace)`, `spec.md` §4.9. Admits the trace one
/// state at a time, evaluating then stepping, and stops early the moment
/// a verdict is no longer a `Residual`; further states are simply never
/// admitted.
pub fn test<S>(
    runtime: &mut Runtime<S>,
    formula: &Formula,
    trace: &[(S, u64)],
) -> Result<TestResult, TestError>
where
    S: Clone + 'static,
{
    let mut states = trace.iter();
    let (first_state, first_ts) = states.next().ok_or(TestError::EmptyTrace)?;

    let t0 = runtime.register_state(first_state.clone(), *first_ts)?;
    let mut value = evaluate(formula, t0)?;

    for (state, ts) in states {
        let residual = match value {
            Value::Residual { residual } => residual,
            _ => break,
        };
        let t = runtime.register_state(state.clone(), *ts)?;
        value = step(&residual, t)?;
    }

    Ok(match value {
        Value::True => TestResult::Passed,
        Value::False { violation } => TestResult::Failed { violation },
        Value::Residual { residual } => TestResult::Inconclusive { residual },
    })
}
