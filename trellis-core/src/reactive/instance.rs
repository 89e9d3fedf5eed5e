//! Instances
//!
//! An [`Instance`] owns a root data object and the watchers and computed
//! values built against it. It is what surrounding layers (components,
//! views) hold on to: watchers are created through it, a digest re-checks
//! all of them, and destroying it tears everything down.
//!
//! The instance registers itself as a root consumer on the data object's
//! observer, which stops `set`/`delete` from reshaping root state at
//! runtime.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::computed::Computed;
use super::watcher::{Expression, Watcher, WatcherOptions};
use crate::error::{CallbackError, EvalError};
use crate::observe::{observe, Object, Value};

/// Unique identifier for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Generate a new unique id.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for [`Instance::watch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Track every nested field of the watched value.
    pub deep: bool,
    /// Run the callback synchronously on every change.
    pub sync: bool,
    /// Call the callback once right away with `(value, undefined)`.
    pub immediate: bool,
}

struct InstanceInner {
    id: InstanceId,
    name: Option<String>,
    data: RefCell<Object>,
    watchers: RefCell<Vec<Watcher>>,
    computed: RefCell<IndexMap<String, Computed>>,
    destroyed: Cell<bool>,
}

/// Owner of a root data object and the watchers built on it. Cloning shares
/// the instance.
#[derive(Clone)]
pub struct Instance(Rc<InstanceInner>);

impl Instance {
    /// Create an anonymous instance over `data`.
    pub fn new(data: Object) -> Self {
        Self::build(None, data)
    }

    /// Create a named instance. The name shows up in diagnostics.
    pub fn named(name: impl Into<String>, data: Object) -> Self {
        Self::build(Some(name.into()), data)
    }

    fn build(name: Option<String>, data: Object) -> Self {
        let instance = Self(Rc::new(InstanceInner {
            id: InstanceId::new(),
            name,
            data: RefCell::new(data.clone()),
            watchers: RefCell::new(Vec::new()),
            computed: RefCell::new(IndexMap::new()),
            destroyed: Cell::new(false),
        }));
        instance.attach(&data);
        tracing::debug!(instance = instance.id().raw(), name = ?instance.name(), "instance created");
        instance
    }

    fn attach(&self, data: &Object) {
        if let Some(observer) = observe(&Value::from(data.clone())) {
            observer.add_root(self.id());
        }
    }

    fn detach(&self, data: &Object) {
        if let Some(observer) = data.observer() {
            observer.remove_root(self.id());
        }
    }

    /// Get the instance's unique id.
    pub fn id(&self) -> InstanceId {
        self.0.id
    }

    /// Name given at construction.
    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    /// The root data object.
    pub fn data(&self) -> Object {
        self.0.data.borrow().clone()
    }

    fn scope(&self) -> Value {
        Value::from(self.data())
    }

    /// Watch an expression as a user watcher.
    ///
    /// The callback runs after internal watchers in the same flush, with
    /// `(new, old)`. With `immediate` it is also called once right away
    /// with `(value, Undefined)`.
    pub fn watch<E, F>(&self, expression: E, callback: F, options: WatchOptions) -> Watcher
    where
        E: Into<Expression>,
        F: FnMut(&Value, &Value) -> Result<(), CallbackError> + 'static,
    {
        let watcher = Watcher::new(
            self.scope(),
            expression,
            callback,
            WatcherOptions {
                deep: options.deep,
                user: true,
                sync: options.sync,
                lazy: false,
                owner: self.0.name.clone(),
            },
        );
        if options.immediate {
            watcher.fire_immediate();
        }
        self.adopt(watcher)
    }

    /// Create an internal watcher (for example a render computation).
    pub fn watcher<E, F>(&self, expression: E, callback: F, mut options: WatcherOptions) -> Watcher
    where
        E: Into<Expression>,
        F: FnMut(&Value, &Value) -> Result<(), CallbackError> + 'static,
    {
        if options.owner.is_none() {
            options.owner = self.0.name.clone();
        }
        let watcher = Watcher::new(self.scope(), expression, callback, options);
        self.adopt(watcher)
    }

    fn adopt(&self, watcher: Watcher) -> Watcher {
        if self.is_destroyed() {
            watcher.teardown();
        } else {
            let owner: Weak<InstanceInner> = Rc::downgrade(&self.0);
            watcher.on_teardown(move |id| {
                if let Some(owner) = owner.upgrade() {
                    owner.watchers.borrow_mut().retain(|w| w.id() != id);
                }
            });
            self.0.watchers.borrow_mut().push(watcher.clone());
        }
        watcher
    }

    /// Define a computed field `key` on the data object.
    pub fn computed<F>(&self, key: &str, getter: F) -> Computed
    where
        F: Fn(&Value) -> Result<Value, EvalError> + 'static,
    {
        let computed = Computed::from_expression(
            self.scope(),
            Expression::function(key, getter),
            self.0.name.clone(),
        );
        self.install_computed(key, computed)
    }

    /// Define a computed field `key` with a setter for assignments.
    pub fn computed_with_setter<F, S>(&self, key: &str, getter: F, setter: S) -> Computed
    where
        F: Fn(&Value) -> Result<Value, EvalError> + 'static,
        S: Fn(&Value, Value) + 'static,
    {
        let computed = Computed::from_expression(
            self.scope(),
            Expression::function(key, getter),
            self.0.name.clone(),
        )
        .with_setter(setter);
        self.install_computed(key, computed)
    }

    fn install_computed(&self, key: &str, computed: Computed) -> Computed {
        if self.is_destroyed() {
            computed.teardown();
            return computed;
        }
        self.data().define_computed(key, computed.clone());
        let previous = self
            .0
            .computed
            .borrow_mut()
            .insert(key.to_owned(), computed.clone());
        if let Some(previous) = previous {
            previous.teardown();
        }
        computed
    }

    /// Replace the root data object.
    ///
    /// The instance moves its root registration to the new object,
    /// re-installs its computed fields there, points every watcher at the
    /// new scope and runs a digest.
    pub fn set_data(&self, data: Object) {
        if self.is_destroyed() {
            return;
        }
        let old = std::mem::replace(&mut *self.0.data.borrow_mut(), data.clone());
        self.detach(&old);
        self.attach(&data);

        let scope = Value::from(data.clone());
        let computed: Vec<(String, Computed)> = self
            .0
            .computed
            .borrow()
            .iter()
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect();
        for (key, computed) in computed {
            old.remove(&key);
            computed.watcher().rebind_scope(scope.clone());
            computed.watcher().mark_dirty();
            data.define_computed(&key, computed);
        }

        for watcher in self.watchers() {
            watcher.rebind_scope(scope.clone());
        }
        tracing::debug!(instance = self.id().raw(), "root data replaced");
        self.digest();
    }

    /// Schedule a shallow re-check of every watcher. Callbacks fire only for
    /// values that actually changed.
    pub fn digest(&self) {
        let computed: Vec<Computed> = self.0.computed.borrow().values().cloned().collect();
        for computed in computed {
            computed.watcher().update_shallow();
        }
        for watcher in self.watchers() {
            watcher.update_shallow();
        }
    }

    /// Tear down every watcher and computed value and release the root
    /// data. Safe to call more than once.
    pub fn destroy(&self) {
        if self.0.destroyed.replace(true) {
            return;
        }

        let watchers = std::mem::take(&mut *self.0.watchers.borrow_mut());
        for watcher in &watchers {
            watcher.teardown();
        }
        let computed = std::mem::take(&mut *self.0.computed.borrow_mut());
        for computed in computed.values() {
            computed.teardown();
        }
        self.detach(&self.data());

        tracing::debug!(
            instance = self.id().raw(),
            watchers = watchers.len(),
            computed = computed.len(),
            "instance destroyed"
        );
    }

    /// Whether [`destroy`](Self::destroy) was called.
    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    /// Watchers owned by this instance, in creation order.
    pub fn watchers(&self) -> Vec<Watcher> {
        self.0.watchers.borrow().clone()
    }

    /// Number of owned watchers, computed values excluded.
    pub fn watcher_count(&self) -> usize {
        self.0.watchers.borrow().len()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("watcher_count", &self.watcher_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
