//! # Tracewatch-Runtime
//!
//! Process-wide (per test run) registrar of extractor cells.
//!
//! On each admitted snapshot the [`Runtime`] updates its current time and
//! evaluates every registered extractor over the new state, retaining
//! historical values keyed by timestamp for retrospective lookup. The
//! runtime is single-threaded and cooperative: exactly one
//! `register_state` call may be in flight at a time, and cells are never
//! shared across runtimes.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::rc::Rc;

use serde::Serialize;
use tracewatch_time::Time;

/// Values retained by an [`ExtractorCell`] must be snapshot-serialisable
/// (scalars, arrays, objects composed thereof) so that they are safe to
/// hold by value across the lifetime of a trace, per `spec.md` §3.
pub trait CellValue: Clone + Serialize + 'static {}
impl<T: Clone + Serialize + 'static> CellValue for T {}

/// Boxed error a user extractor function may fail with.
pub type ExtractError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors raised by [`Cell::at`] / [`Cell::current`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CellError {
    #[error("access to a time strictly after the current time")]
    FutureAccess,
    #[error("no snapshot recorded at the requested time")]
    UnknownTime,
    #[error("current() called before any state was admitted")]
    CurrentWithoutAdmission,
}

/// Errors raised by [`Runtime`] operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("non-monotonic time: attempted {attempted} after current {current}")]
    NonMonotonicTime { current: Time, attempted: Time },

    #[error("extractor '{cell}' registered after the first state admission")]
    LateRegistration { cell: String },

    #[error("extractor '{cell}' failed: {source}")]
    ExtractorFailed {
        cell: String,
        #[source]
        source: ExtractError,
    },
}

/// An abstract capability to read a time-indexed value.
///
/// `current()` returns the value at the runtime's most recently admitted
/// time; `at(t)` resolves a specific past (or current) time under the
/// rules of `spec.md` §3.
pub trait Cell<T> {
    fn current(&self) -> Result<T, CellError>;
    fn at(&self, t: Time) -> Result<T, CellError>;
}

struct ExtractorCellInner<T> {
    history: BTreeMap<Time, T>,
}

/// A [`Cell`] whose `update` applies a pure extraction function over a
/// user state `S`, storing each result keyed by the admitting `Time`.
///
/// Cloning an `ExtractorCell` is cheap (it is a handle onto shared
/// history); every clone observes the same admitted snapshots.
pub struct ExtractorCell<S, T> {
    name: String,
    extract: Rc<dyn Fn(&S) -> Result<T, ExtractError>>,
    inner: Rc<RefCell<ExtractorCellInner<T>>>,
}

impl<S, T> Clone for ExtractorCell<S, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            extract: Rc::clone(&self.extract),
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S, T: CellValue> ExtractorCell<S, T> {
    fn new(name: impl Into<String>, extract: Rc<dyn Fn(&S) -> Result<T, ExtractError>>) -> Self {
        Self {
            name: name.into(),
            extract,
            inner: Rc::new(RefCell::new(ExtractorCellInner {
                history: BTreeMap::new(),
            })),
        }
    }

    /// The name this cell was registered under; surfaced in
    /// [`RuntimeError::ExtractorFailed`].
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<S, T: CellValue> Cell<T> for ExtractorCell<S, T> {
    fn current(&self) -> Result<T, CellError> {
        self.inner
            .borrow()
            .history
            .iter()
            .next_back()
            .map(|(_, v)| v.clone())
            .ok_or(CellError::CurrentWithoutAdmission)
    }

    fn at(&self, t: Time) -> Result<T, CellError> {
        let inner = self.inner.borrow();
        let current = inner
            .history
            .iter()
            .next_back()
            .map(|(k, _)| *k)
            .ok_or(CellError::CurrentWithoutAdmission)?;

        if current.is_before(&t) {
            return Err(CellError::FutureAccess);
        }
        inner.history.get(&t).cloned().ok_or(CellError::UnknownTime)
    }
}

trait CellUpdate<S> {
    fn cell_name(&self) -> &str;
    fn update(&self, state: &S, time: Time) -> Result<(), ExtractError>;
}

impl<S, T: CellValue> CellUpdate<S> for ExtractorCell<S, T> {
    fn cell_name(&self) -> &str {
        &self.name
    }

    fn update(&self, state: &S, time: Time) -> Result<(), ExtractError> {
        let value = (self.extract)(state)?;
        self.inner.borrow_mut().history.insert(time, value);
        Ok(())
    }
}

/// The distinguished cell whose current value *is* the runtime's current
/// time; `at(t)` trivially returns `t` itself (bounded by the same
/// future/current rules as any other cell).
#[derive(Clone)]
pub struct TimeCell {
    time: Rc<RefCell<Option<Time>>>,
}

impl Cell<Time> for TimeCell {
    fn current(&self) -> Result<Time, CellError> {
        self.time.borrow().ok_or(CellError::CurrentWithoutAdmission)
    }

    fn at(&self, t: Time) -> Result<Time, CellError> {
        let current = self.time.borrow().ok_or(CellError::CurrentWithoutAdmission)?;
        if current.is_before(&t) {
            return Err(CellError::FutureAccess);
        }
        Ok(t)
    }
}

/// Owns the current `{state, time}` and the ordered list of registered
/// extractor cells for a single test run.
///
/// Not concurrency-safe by design (`spec.md` §5): a `Runtime` is meant to
/// be driven by exactly one test loop. Multiple runtimes may coexist,
/// each fully isolated from the others.
pub struct Runtime<S: 'static> {
    cells: Vec<Rc<dyn CellUpdate<S>>>,
    state: Option<S>,
    time: Rc<RefCell<Option<Time>>>,
    next_anonymous_id: usize,
}

impl<S: 'static> Runtime<S> {
    pub fn new() -> Self {
        Self {
            cells: Vec::new(),
            state: None,
            time: Rc::new(RefCell::new(None)),
            next_anonymous_id: 0,
        }
    }

    /// The runtime's current time, if any state has been admitted.
    pub fn current_time(&self) -> Option<Time> {
        *self.time.borrow()
    }

    /// The most recently admitted state, if any.
    pub fn current_state(&self) -> Option<&S> {
        self.state.as_ref()
    }

    /// The distinguished time cell for this runtime.
    pub fn time_cell(&self) -> TimeCell {
        TimeCell {
            time: Rc::clone(&self.time),
        }
    }

    /// Registers a named pure extraction function as a new cell.
    ///
    /// Cells may only be registered before the first state admission.
    pub fn extract_named<T, F>(
        &mut self,
        name: impl Into<String>,
        f: F,
    ) -> Result<ExtractorCell<S, T>, RuntimeError>
    where
        T: CellValue,
        F: Fn(&S) -> Result<T, ExtractError> + 'static,
    {
        let name = name.into();
        if self.state.is_some() {
            return Err(RuntimeError::LateRegistration { cell: name });
        }
        let cell = ExtractorCell::new(name, Rc::new(f));
        tracing::trace!(cell = cell.name(), "registered extractor");
        self.cells.push(Rc::new(cell.clone()));
        Ok(cell)
    }

    /// Registers an anonymously-named extraction function (`cell_0`,
    /// `cell_1`, ...). Equivalent to [`Runtime::extract_named`] for
    /// callers that don't need a stable diagnostic name.
    pub fn extract<T, F>(&mut self, f: F) -> Result<ExtractorCell<S, T>, RuntimeError>
    where
        T: CellValue,
        F: Fn(&S) -> Result<T, ExtractError> + 'static,
    {
        let name = format!("cell_{}", self.next_anonymous_id);
        self.next_anonymous_id += 1;
        self.extract_named(name, f)
    }

    /// Admits a new `(state, timestamp_ms)` pair.
    ///
    /// Updates every registered cell, in registration order, then installs
    /// the new current `{state, time}`. If an extractor fails, the
    /// admission is aborted: cells updated before the failure retain their
    /// new value, but the current time does not advance.
    pub fn register_state(&mut self, state: S, timestamp_ms: u64) -> Result<Time, RuntimeError> {
        let time = Time::from_millis(timestamp_ms);

        if let Some(current) = self.current_time() {
            if time.is_before(&current) {
                return Err(RuntimeError::NonMonotonicTime {
                    current,
                    attempted: time,
                });
            }
        }

        for cell in &self.cells {
            cell.update(&state, time).map_err(|source| {
                tracing::warn!(cell = cell.cell_name(), "extractor failed on admission");
                RuntimeError::ExtractorFailed {
                    cell: cell.cell_name().to_string(),
                    source,
                }
            })?;
        }

        self.state = Some(state);
        *self.time.borrow_mut() = Some(time);
        tracing::debug!(time = time.as_millis(), "admitted state");
        Ok(time)
    }

    /// Drops the current state and clears all registered extractor cells.
    pub fn reset(&mut self) {
        self.cells.clear();
        self.state = None;
        *self.time.borrow_mut() = None;
        self.next_anonymous_id = 0;
    }
}

impl<S: 'static> Default for Runtime<S> {
    fn default() -> Self {
        Self::new()
    }
}
