//! Watcher Implementation
//!
//! A Watcher wraps a computation (a key path or a function of the scope)
//! and an optional callback. Evaluating it records every dependency node the
//! computation reads; when one of them notifies, the watcher is re-run and
//! the callback receives the new and previous values.
//!
//! # Lifecycle
//!
//! 1. On creation an eager watcher evaluates once to collect its initial
//!    dependencies. A lazy watcher starts dirty and evaluates on demand.
//!
//! 2. `update` is called by a dependency node. Lazy watchers only mark
//!    themselves dirty, sync watchers re-run on the spot, and everything
//!    else is handed to the [`Scheduler`].
//!
//! 3. `run` re-evaluates and fires the callback if the value changed, or
//!    if the value is a container (or the watcher is deep) and the run was
//!    not a shallow digest.
//!
//! 4. `teardown` unsubscribes from every dependency and releases the
//!    scope, computation and callback. It is terminal and idempotent.
//!
//! # Dependency bookkeeping
//!
//! Dependencies are double buffered. Each evaluation collects a fresh set;
//! afterwards anything held from the previous pass but not read this time is
//! unsubscribed, and the fresh set becomes the current one. A dependency
//! that persists across passes is never re-subscribed.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::dep::{Dep, DepId};
use super::{Subscriber, WatcherId};
use crate::batch::Scheduler;
use crate::config::Config;
use crate::diagnostics;
use crate::error::{CallbackError, EvalError, WatchError};
use crate::observe::{Path, Value};

/// A getter evaluated against the watcher's scope.
pub type Getter = Rc<dyn Fn(&Value) -> Result<Value, EvalError>>;

/// A watcher callback, called with `(new, old)`.
pub type Callback = Box<dyn FnMut(&Value, &Value) -> Result<(), CallbackError>>;

/// The computation a watcher evaluates.
#[derive(Clone)]
pub enum Expression {
    /// A key path such as `a.b[0].c`. Supports assignment.
    Path(Path),
    /// A function of the scope.
    Function {
        /// Shown in diagnostics in place of source text.
        label: String,
        /// The function itself.
        getter: Getter,
    },
    /// Source text that failed to parse. Every evaluation fails with
    /// `error`.
    Invalid {
        /// The text as given.
        source: String,
        /// Why it was rejected.
        error: EvalError,
    },
}

impl Expression {
    /// Wrap a function of the scope.
    pub fn function<F>(label: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, EvalError> + 'static,
    {
        Self::Function {
            label: label.into(),
            getter: Rc::new(getter),
        }
    }

    /// Source text, or the label of a function.
    pub fn source(&self) -> &str {
        match self {
            Self::Path(path) => path.source(),
            Self::Function { label, .. } => label,
            Self::Invalid { source, .. } => source,
        }
    }

    fn evaluate(&self, scope: &Value) -> Result<Value, EvalError> {
        match self {
            Self::Path(path) => path.get(scope),
            Self::Function { getter, .. } => getter(scope),
            Self::Invalid { error, .. } => Err(error.clone()),
        }
    }

    fn assign(&self, scope: &Value, value: Value) -> Result<(), EvalError> {
        match self {
            Self::Path(path) => path.set(scope, value),
            Self::Function { label, .. } => Err(EvalError::NoSetter(label.clone())),
            Self::Invalid { error, .. } => Err(error.clone()),
        }
    }
}

impl From<&str> for Expression {
    fn from(source: &str) -> Self {
        match Path::parse(source) {
            Ok(path) => Self::Path(path),
            Err(error) => Self::Invalid {
                source: source.to_owned(),
                error,
            },
        }
    }
}

impl From<String> for Expression {
    fn from(source: String) -> Self {
        Self::from(source.as_str())
    }
}

impl From<Path> for Expression {
    fn from(path: Path) -> Self {
        Self::Path(path)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(&path.source()).finish(),
            Self::Function { label, .. } => f.debug_tuple("Function").field(label).finish(),
            Self::Invalid { source, error } => f
                .debug_struct("Invalid")
                .field("source", source)
                .field("error", error)
                .finish(),
        }
    }
}

/// Flags recognised at construction.
#[derive(Debug, Clone, Default)]
pub struct WatcherOptions {
    /// Touch every nested field of the value after evaluation.
    pub deep: bool,
    /// User watcher: flushed after internal watchers.
    pub user: bool,
    /// Re-run immediately on update instead of batching.
    pub sync: bool,
    /// Evaluate on demand only.
    pub lazy: bool,
    /// Name of the owning context, used in diagnostics.
    pub owner: Option<String>,
}

struct State {
    value: Value,
    dirty: bool,
    active: bool,
    queued: bool,
    shallow: bool,
    deps: SmallVec<[Dep; 4]>,
    dep_ids: HashSet<DepId>,
    new_deps: SmallVec<[Dep; 4]>,
    new_dep_ids: HashSet<DepId>,
    eval_count: usize,
}

struct WatcherInner {
    id: WatcherId,
    this: Weak<WatcherInner>,
    source: String,
    options: WatcherOptions,
    expression: RefCell<Option<Expression>>,
    scope: RefCell<Value>,
    callback: RefCell<Option<Callback>>,
    on_teardown: RefCell<Option<TeardownHook>>,
    state: RefCell<State>,
}

type TeardownHook = Box<dyn FnOnce(WatcherId)>;

/// A tracked computation. Cloning shares the watcher.
#[derive(Clone)]
pub struct Watcher(Rc<WatcherInner>);

impl Watcher {
    /// Create a watcher with a callback.
    ///
    /// Unless `options.lazy` is set the computation is evaluated right
    /// away to collect dependencies; the callback is not called for it.
    pub fn new<E, F>(scope: Value, expression: E, callback: F, options: WatcherOptions) -> Self
    where
        E: Into<Expression>,
        F: FnMut(&Value, &Value) -> Result<(), CallbackError> + 'static,
    {
        Self::build(scope, expression.into(), Some(Box::new(callback)), options)
    }

    /// Create a watcher without a callback.
    pub fn silent<E>(scope: Value, expression: E, options: WatcherOptions) -> Self
    where
        E: Into<Expression>,
    {
        Self::build(scope, expression.into(), None, options)
    }

    fn build(
        scope: Value,
        expression: Expression,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Self {
        let lazy = options.lazy;
        let inner = Rc::new_cyclic(|this| WatcherInner {
            id: WatcherId::new(),
            this: this.clone(),
            source: expression.source().to_owned(),
            options,
            expression: RefCell::new(Some(expression)),
            scope: RefCell::new(scope),
            callback: RefCell::new(callback),
            on_teardown: RefCell::new(None),
            state: RefCell::new(State {
                value: Value::Undefined,
                dirty: lazy,
                active: true,
                queued: false,
                shallow: false,
                deps: SmallVec::new(),
                dep_ids: HashSet::new(),
                new_deps: SmallVec::new(),
                new_dep_ids: HashSet::new(),
                eval_count: 0,
            }),
        });
        let watcher = Self(inner);
        tracing::trace!(watcher = watcher.id().raw(), source = %watcher.0.source, lazy, "watcher created");

        if !lazy {
            let value = watcher.get();
            watcher.0.state.borrow_mut().value = value;
        }
        watcher
    }

    /// Evaluate the computation and collect dependencies.
    ///
    /// Errors (and panics) raised by the computation are reported and the
    /// pass yields `Undefined`; the watcher stays active.
    pub fn get(&self) -> Value {
        let expression = self.0.expression.borrow().clone();
        let Some(expression) = expression else {
            return Value::Undefined;
        };
        let scope = self.0.scope.borrow().clone();

        let result = {
            let _ctx = ReactiveContext::enter(self.0.clone());
            let result = panic::catch_unwind(AssertUnwindSafe(|| expression.evaluate(&scope)))
                .unwrap_or_else(|payload| {
                    Err(EvalError::custom(format!("panicked: {}", panic_message(&*payload))))
                });
            if self.0.options.deep {
                if let Ok(value) = &result {
                    traverse(value, &mut HashSet::new());
                }
            }
            result
        };

        self.0.state.borrow_mut().eval_count += 1;
        self.cleanup_deps();

        match result {
            Ok(value) => value,
            Err(err) => {
                diagnostics::report_expression_error(
                    "evaluating expression",
                    &self.0.source,
                    &err,
                    self.owner(),
                );
                Value::Undefined
            }
        }
    }

    fn cleanup_deps(&self) {
        let id = self.id();
        let mut state = self.0.state.borrow_mut();
        let State {
            deps,
            dep_ids,
            new_deps,
            new_dep_ids,
            ..
        } = &mut *state;

        for dep in deps.iter() {
            if !new_dep_ids.contains(&dep.id()) {
                dep.remove_subscriber(id);
            }
        }

        std::mem::swap(deps, new_deps);
        new_deps.clear();
        std::mem::swap(dep_ids, new_dep_ids);
        new_dep_ids.clear();
    }

    /// Record a dependency read during the current evaluation.
    pub fn add_dependency(&self, dep: &Dep) {
        let subscribe = {
            let mut state = self.0.state.borrow_mut();
            if !state.active {
                return;
            }
            let dep_id = dep.id();
            if !state.new_dep_ids.insert(dep_id) {
                return;
            }
            state.new_deps.push(dep.clone());
            !state.dep_ids.contains(&dep_id)
        };

        if subscribe {
            let weak: Weak<dyn Subscriber> = self.0.this.clone();
            dep.add_subscriber(self.id(), weak);
        }
    }

    /// A dependency changed.
    pub fn update(&self) {
        self.schedule(false);
    }

    /// Digest path: schedule a run that only fires the callback if the
    /// value actually changed. A later full `update` before the flush
    /// upgrades it; it never downgrades a pending full run.
    pub fn update_shallow(&self) {
        self.schedule(true);
    }

    fn schedule(&self, shallow: bool) {
        if self.0.options.lazy {
            self.0.state.borrow_mut().dirty = true;
            return;
        }
        if self.0.options.sync || !Config::async_updates() {
            self.0.state.borrow_mut().shallow = shallow;
            self.run();
            return;
        }

        {
            let mut state = self.0.state.borrow_mut();
            if !state.active {
                return;
            }
            state.shallow = if state.queued {
                shallow && state.shallow
            } else {
                shallow
            };
            state.queued = true;
        }
        Scheduler::enqueue(self);
    }

    /// Re-evaluate and fire the callback if warranted. No-op once torn
    /// down.
    pub fn run(&self) {
        let (active, shallow) = {
            let state = self.0.state.borrow();
            (state.active, state.shallow)
        };

        if !active {
            self.clear_queued();
            return;
        }

        let value = self.get();
        let fired = {
            let mut state = self.0.state.borrow_mut();
            let changed = !value.same_value(&state.value);
            let fire = changed || ((value.is_container() || self.0.options.deep) && !shallow);
            fire.then(|| std::mem::replace(&mut state.value, value.clone()))
        };
        // The callback may queue this watcher again.
        self.clear_queued();

        if let Some(old) = fired {
            self.invoke_callback(&value, &old);
        }
    }

    fn invoke_callback(&self, new: &Value, old: &Value) {
        let taken = self.0.callback.borrow_mut().take();
        let Some(mut callback) = taken else {
            return;
        };

        let outcome = {
            let _quiet = ReactiveContext::untracked();
            panic::catch_unwind(AssertUnwindSafe(|| callback(new, old)))
        };

        // Put it back unless the callback tore the watcher down.
        if self.is_active() {
            let mut slot = self.0.callback.borrow_mut();
            if slot.is_none() {
                *slot = Some(callback);
            }
        }

        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(source)) => WatchError::Callback {
                expression: self.0.source.clone(),
                source,
            },
            Err(payload) => WatchError::Panicked {
                expression: self.0.source.clone(),
                message: panic_message(&*payload),
            },
        };
        Scheduler::escalate(error);
    }

    /// Evaluate a lazy watcher and store the result.
    pub fn evaluate(&self) {
        let value = self.get();
        let mut state = self.0.state.borrow_mut();
        state.value = value;
        state.dirty = false;
    }

    /// Subscribe the active reader to every dependency of this watcher.
    pub fn depend(&self) {
        let deps = self.0.state.borrow().deps.clone();
        for dep in deps {
            dep.depend();
        }
    }

    /// Unsubscribe from all dependencies and release everything the watcher
    /// holds. Safe to call more than once.
    pub fn teardown(&self) {
        let (deps, value) = {
            let mut state = self.0.state.borrow_mut();
            if !state.active {
                return;
            }
            state.active = false;
            state.dirty = false;
            state.queued = false;
            state.dep_ids.clear();
            state.new_dep_ids.clear();
            state.new_deps.clear();
            (
                std::mem::take(&mut state.deps),
                std::mem::take(&mut state.value),
            )
        };

        for dep in &deps {
            dep.remove_subscriber(self.id());
        }

        let scope = std::mem::take(&mut *self.0.scope.borrow_mut());
        let callback = self.0.callback.borrow_mut().take();
        let expression = self.0.expression.borrow_mut().take();
        drop((deps, value, scope, callback, expression));

        let hook = self.0.on_teardown.borrow_mut().take();
        if let Some(hook) = hook {
            hook(self.id());
        }

        tracing::debug!(watcher = self.id().raw(), source = %self.0.source, "watcher torn down");
    }

    /// Run `hook` once when the watcher is torn down. Owners use it to drop
    /// their handle.
    pub(crate) fn on_teardown<F>(&self, hook: F)
    where
        F: FnOnce(WatcherId) + 'static,
    {
        *self.0.on_teardown.borrow_mut() = Some(Box::new(hook));
    }

    /// Assign through the computation (two-way binding).
    ///
    /// Only key paths can be assigned. Failures are reported, never
    /// returned.
    pub fn set(&self, value: impl Into<Value>) {
        let expression = self.0.expression.borrow().clone();
        let Some(expression) = expression else {
            return;
        };
        let scope = self.0.scope.borrow().clone();

        let result = {
            let _quiet = ReactiveContext::untracked();
            expression.assign(&scope, value.into())
        };
        if let Err(err) = result {
            diagnostics::report_expression_error(
                "setting expression",
                &self.0.source,
                &err,
                self.owner(),
            );
        }
    }

    pub(crate) fn rebind_scope(&self, scope: Value) {
        if !self.is_active() {
            return;
        }
        let previous = std::mem::replace(&mut *self.0.scope.borrow_mut(), scope);
        drop(previous);
    }

    pub(crate) fn fire_immediate(&self) {
        let value = self.value();
        self.invoke_callback(&value, &Value::Undefined);
    }

    pub(crate) fn clear_queued(&self) {
        let mut state = self.0.state.borrow_mut();
        state.queued = false;
        state.shallow = false;
    }

    /// Get the watcher's unique id.
    pub fn id(&self) -> WatcherId {
        self.0.id
    }

    /// Source text of the computation.
    pub fn source(&self) -> &str {
        &self.0.source
    }

    /// Name of the owning context.
    pub fn owner(&self) -> Option<&str> {
        self.0.options.owner.as_deref()
    }

    /// Last value produced by `run` or `evaluate`.
    pub fn value(&self) -> Value {
        self.0.state.borrow().value.clone()
    }

    /// The scope the computation is evaluated against.
    pub fn scope(&self) -> Value {
        self.0.scope.borrow().clone()
    }

    /// Whether a lazy watcher's value is stale.
    pub fn is_dirty(&self) -> bool {
        self.0.state.borrow().dirty
    }

    /// Mark a lazy watcher's value stale.
    pub fn mark_dirty(&self) {
        if self.0.options.lazy {
            self.0.state.borrow_mut().dirty = true;
        }
    }

    /// Whether the watcher has not been torn down.
    pub fn is_active(&self) -> bool {
        self.0.state.borrow().active
    }

    /// Whether the watcher is waiting for a flush.
    pub fn is_queued(&self) -> bool {
        self.0.state.borrow().queued
    }

    /// Whether this is a user watcher.
    pub fn is_user(&self) -> bool {
        self.0.options.user
    }

    /// Whether this watcher evaluates on demand only.
    pub fn is_lazy(&self) -> bool {
        self.0.options.lazy
    }

    /// The options the watcher was built with.
    pub fn options(&self) -> &WatcherOptions {
        &self.0.options
    }

    /// Number of dependencies held from the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.0.state.borrow().deps.len()
    }

    /// Whether the last evaluation read `dep`.
    pub fn depends_on(&self, dep: &Dep) -> bool {
        self.0.state.borrow().dep_ids.contains(&dep.id())
    }

    /// Number of times the computation has been evaluated.
    pub fn eval_count(&self) -> usize {
        self.0.state.borrow().eval_count
    }
}

impl Subscriber for WatcherInner {
    fn id(&self) -> WatcherId {
        self.id
    }

    fn update(&self) {
        if let Some(inner) = self.this.upgrade() {
            Watcher(inner).update();
        }
    }

    fn add_dependency(&self, dep: &Dep) {
        if let Some(inner) = self.this.upgrade() {
            Watcher(inner).add_dependency(dep);
        }
    }
}

impl Drop for WatcherInner {
    fn drop(&mut self) {
        if let Ok(state) = self.state.try_borrow() {
            for dep in &state.deps {
                dep.remove_subscriber(self.id);
            }
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id())
            .field("source", &self.source())
            .field("active", &self.is_active())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

/// Read every nested field of `value` so the active reader depends on all
/// of it.
fn traverse(value: &Value, seen: &mut HashSet<usize>) {
    match value {
        Value::Object(object) => {
            if !seen.insert(object.container_id()) {
                return;
            }
            if let Some(ob) = object.observer() {
                ob.dep().depend();
            }
            for key in object.keys() {
                traverse(&object.get(&key), seen);
            }
        }
        Value::List(list) => {
            if !seen.insert(list.container_id()) {
                return;
            }
            if let Some(ob) = list.observer() {
                ob.dep().depend();
            }
            for item in list.iter() {
                traverse(&item, seen);
            }
        }
        _ => {}
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
