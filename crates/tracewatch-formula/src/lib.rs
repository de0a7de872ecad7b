//! # Tracewatch-Formula
//!
//! The LTL formula algebra: booleans, conjunction, disjunction,
//! implication, negation, `next`, (optionally bounded) `always`, bounded
//! `eventually`, and the two reflective leaves: `pure` and the thunk
//! lifts `now`/`lift`.
//!
//! Formulas are immutable once constructed and reference-counted
//! (`Rc`-backed), so they form a read-only DAG that can be shared between
//! the user's spec and every live residual without cloning the tree
//! (`spec.md` §9).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracewatch_time::Duration;

/// Errors raised while *building* a formula. Per `spec.md` §7 these are
/// programmer errors, indicating a malformed spec rather than a runtime
/// condition of the system under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
    #[error("a time bound was already set on this modal")]
    BoundAlreadySet,
    #[error("eventually(...) requires within(...); there is no honest way to resolve an unbounded eventually online")]
    UnboundedEventually,
}

/// The error a thunk closure surfaces when it cannot produce a formula,
/// typically a boxed [`tracewatch_runtime::CellError`] from an `at`/`current`
/// call inside the closure, but deliberately opaque here since this crate
/// has no dependency on the runtime crate.
pub type ThunkError = Box<dyn std::error::Error + Send + Sync + 'static>;

type ThunkFn = Rc<dyn Fn() -> Result<Formula, ThunkError>>;

/// The Formula AST node. Exposed so the evaluator crate can pattern-match
/// without round-tripping through accessor methods for every variant.
pub enum FormulaNode {
    Pure { pretty: String, value: bool },
    Thunk { pretty: String, make: ThunkFn },
    And(Formula, Formula),
    Or(Formula, Formula),
    Implies(Formula, Formula),
    Not(Formula),
    Next(Formula),
    Always { bound: Option<Duration>, body: Formula },
    Eventually { bound: Option<Duration>, body: Formula },
}

/// A shared, immutable LTL formula.
#[derive(Clone)]
pub struct Formula(Rc<FormulaNode>);

impl Formula {
    fn new(node: FormulaNode) -> Formula {
        Formula(Rc::new(node))
    }

    /// The underlying AST node, for evaluator-side pattern matching.
    pub fn node(&self) -> &FormulaNode {
        &self.0
    }

    /// Low-level eventually constructor enforcing the "no bare eventually"
    /// invariant at the point a bound is (or isn't) supplied. The public
    /// DSL (`eventually(x).within(...)`) can never omit the bound; this
    /// exists for completeness of the error surface documented in
    /// `spec.md` §7 and for any lower-level caller constructing formulas
    /// outside the fluent builder.
    pub fn eventually_raw(bound: Option<Duration>, body: Formula) -> Result<Formula, FormulaError> {
        if bound.is_none() {
            return Err(FormulaError::UnboundedEventually);
        }
        Ok(Formula::new(FormulaNode::Eventually { bound, body }))
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            FormulaNode::Pure { pretty, .. } => write!(f, "{pretty}"),
            FormulaNode::Thunk { pretty, .. } => write!(f, "{pretty}"),
            FormulaNode::And(l, r) => write!(f, "({l} && {r})"),
            FormulaNode::Or(l, r) => write!(f, "({l} || {r})"),
            FormulaNode::Implies(a, c) => write!(f, "({a} -> {c})"),
            FormulaNode::Not(g) => write!(f, "!{g}"),
            FormulaNode::Next(g) => write!(f, "X {g}"),
            FormulaNode::Always { bound: None, body } => write!(f, "G {body}"),
            FormulaNode::Always { bound: Some(d), body } => {
                write!(f, "G[<={}ms] {body}", d.as_millis())
            }
            FormulaNode::Eventually { bound: None, body } => write!(f, "F {body}"),
            FormulaNode::Eventually { bound: Some(d), body } => {
                write!(f, "F[<={}ms] {body}", d.as_millis())
            }
        }
    }
}

impl fmt::Debug for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Formula({self})")
    }
}

impl From<bool> for Formula {
    fn from(value: bool) -> Formula {
        pure(value)
    }
}

/// A boolean literal, lifted directly into the formula algebra.
pub fn pure(value: bool) -> Formula {
    Formula::new(FormulaNode::Pure {
        pretty: value.to_string(),
        value,
    })
}

/// Lifts a fallible `() -> bool` closure into a thunk that resolves to
/// `pure(f()?)` the moment it is first observed by the evaluator. The
/// closure fails when the predicate it reads from (typically a
/// [`tracewatch_runtime::Cell`]) cannot be read at the current time.
pub fn now<F>(f: F) -> Formula
where
    F: Fn() -> Result<bool, ThunkError> + 'static,
{
    now_named("now(<thunk>)", f)
}

/// As [`now`], with an explicit prettyprint label for violation reports.
pub fn now_named<F>(pretty: impl Into<String>, f: F) -> Formula
where
    F: Fn() -> Result<bool, ThunkError> + 'static,
{
    let pretty = pretty.into();
    Formula::new(FormulaNode::Thunk {
        pretty,
        make: Rc::new(move || f().map(pure)),
    })
}

/// Lifts a fallible `() -> Formula` closure into a thunk, deferring
/// formula construction until the evaluator first observes it.
pub fn lift<F>(f: F) -> Formula
where
    F: Fn() -> Result<Formula, ThunkError> + 'static,
{
    lift_named("lift(<thunk>)", f)
}

/// As [`lift`], with an explicit prettyprint label for violation reports.
pub fn lift_named<F>(pretty: impl Into<String>, f: F) -> Formula
where
    F: Fn() -> Result<Formula, ThunkError> + 'static,
{
    Formula::new(FormulaNode::Thunk {
        pretty: pretty.into(),
        make: Rc::new(f),
    })
}

pub fn not(body: impl Into<Formula>) -> Formula {
    Formula::new(FormulaNode::Not(body.into()))
}

pub fn next(body: impl Into<Formula>) -> Formula {
    Formula::new(FormulaNode::Next(body.into()))
}

pub fn and(left: impl Into<Formula>, right: impl Into<Formula>) -> Formula {
    Formula::new(FormulaNode::And(left.into(), right.into()))
}

pub fn or(left: impl Into<Formula>, right: impl Into<Formula>) -> Formula {
    Formula::new(FormulaNode::Or(left.into(), right.into()))
}

pub fn implies(antecedent: impl Into<Formula>, consequent: impl Into<Formula>) -> Formula {
    Formula::new(FormulaNode::Implies(antecedent.into(), consequent.into()))
}

/// Returned by [`always`]. Usable as a `Formula` directly (a bare
/// `always` means "for all future admitted states"), or refined with
/// [`AlwaysBuilder::within`] to bound it to a deadline.
pub struct AlwaysBuilder {
    body: Formula,
    bound: RefCell<Option<Duration>>,
}

impl AlwaysBuilder {
    /// Attaches a time bound. Fails with [`FormulaError::BoundAlreadySet`]
    /// if this builder already had `within` called on it.
    pub fn within(&self, magnitude: u64, unit: tracewatch_time::TimeUnit) -> Result<Formula, FormulaError> {
        let mut bound = self.bound.borrow_mut();
        if bound.is_some() {
            return Err(FormulaError::BoundAlreadySet);
        }
        let d = Duration::new(magnitude, unit);
        *bound = Some(d);
        Ok(Formula::new(FormulaNode::Always {
            bound: Some(d),
            body: self.body.clone(),
        }))
    }
}

impl From<AlwaysBuilder> for Formula {
    fn from(builder: AlwaysBuilder) -> Formula {
        Formula::new(FormulaNode::Always {
            bound: None,
            body: builder.body,
        })
    }
}

/// "for all future admitted states, `body` holds", optionally narrowed
/// to a deadline window with [`AlwaysBuilder::within`].
pub fn always(body: impl Into<Formula>) -> AlwaysBuilder {
    AlwaysBuilder {
        body: body.into(),
        bound: RefCell::new(None),
    }
}

/// Returned by [`eventually`]. Deliberately **not** convertible into a
/// `Formula`: an unbounded `eventually` has no honest online resolution
/// (`spec.md` §4.2), so the type system rejects it at the call site
/// rather than surfacing `UnboundedEventually` only at evaluation time.
pub struct EventuallyBuilder {
    body: Formula,
    bound: RefCell<Option<Duration>>,
}

impl EventuallyBuilder {
    /// Attaches the mandatory time bound. Fails with
    /// [`FormulaError::BoundAlreadySet`] if already bounded.
    pub fn within(&self, magnitude: u64, unit: tracewatch_time::TimeUnit) -> Result<Formula, FormulaError> {
        let mut bound = self.bound.borrow_mut();
        if bound.is_some() {
            return Err(FormulaError::BoundAlreadySet);
        }
        let d = Duration::new(magnitude, unit);
        *bound = Some(d);
        Formula::eventually_raw(Some(d), self.body.clone())
    }
}

/// "some admitted state within the deadline satisfies `body`". Must be
/// followed by `.within(...)`.
pub fn eventually(body: impl Into<Formula>) -> EventuallyBuilder {
    EventuallyBuilder {
        body: body.into(),
        bound: RefCell::new(None),
    }
}
