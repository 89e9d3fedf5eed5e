//! Observable records.
//!
//! An [`Object`] is a shared handle over an insertion-ordered field table.
//! Each field is a slot: either plain data (optionally backed by a
//! dependency node once the object is observed) or a computed accessor.
//!
//! `get` is the instrumented read and `set` is ordinary field assignment.
//! Assigning a key that does not exist yet adds a plain field; to add a
//! reactive field after observation use [`observer::set`](super::set).

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::{observe, List, Observer, Value};
use crate::reactive::{Computed, Dep, ReactiveContext};

pub(crate) enum SlotKind {
    Data { value: Value, dep: Option<Dep> },
    Computed(Computed),
}

pub(crate) struct Slot {
    kind: SlotKind,
    configurable: bool,
}

impl Slot {
    fn plain(value: Value) -> Self {
        Self {
            kind: SlotKind::Data { value, dep: None },
            configurable: true,
        }
    }
}

struct ObjectInner {
    slots: RefCell<IndexMap<String, Slot>>,
    observer: OnceCell<Observer>,
    frozen: Cell<bool>,
    internal: Cell<bool>,
}

/// An observable record. Cloning shares the record.
#[derive(Clone)]
pub struct Object(Rc<ObjectInner>);

enum Read {
    Data(Value, Option<Dep>),
    Accessor(Computed),
}

enum Write {
    Done,
    Reactive(Dep),
    Accessor(Computed),
}

impl Object {
    /// Create an empty, extensible object.
    pub fn new() -> Self {
        Self(Rc::new(ObjectInner {
            slots: RefCell::new(IndexMap::new()),
            observer: OnceCell::new(),
            frozen: Cell::new(false),
            internal: Cell::new(false),
        }))
    }

    /// Read a field.
    ///
    /// When a watcher is evaluating and the field is reactive, this
    /// subscribes the watcher to the field, to the structural node of the
    /// field's value if that is an observed container, and, for lists, to
    /// the structural node of every observed element, nested lists
    /// included. Missing fields read as `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        let read = {
            let slots = self.0.slots.borrow();
            match slots.get(key).map(|slot| &slot.kind) {
                Some(SlotKind::Data { value, dep }) => Read::Data(value.clone(), dep.clone()),
                Some(SlotKind::Computed(computed)) => Read::Accessor(computed.clone()),
                None => return Value::Undefined,
            }
        };
        let (value, dep) = match read {
            Read::Data(value, dep) => (value, dep),
            Read::Accessor(computed) => return computed.get(),
        };

        if let Some(dep) = dep {
            if ReactiveContext::is_active() {
                dep.depend();
                if let Some(child) = value.observer() {
                    child.dep().depend();
                }
                if let Value::List(list) = &value {
                    depend_items(list, &mut Vec::new());
                }
            }
        }

        value
    }

    /// Read a field without registering any dependency.
    pub fn get_untracked(&self, key: &str) -> Value {
        let _quiet = ReactiveContext::untracked();
        self.get(key)
    }

    /// Assign a field.
    ///
    /// Writing an unchanged value to a reactive field is a no-op. A changed
    /// value is stored, observed if it is a container, and the field's
    /// subscribers are notified. Unknown keys become plain fields; writes
    /// to a frozen object are ignored.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        if self.is_frozen() {
            tracing::trace!(key, "ignoring write to frozen object");
            return;
        }

        let (write, old) = {
            let mut slots = self.0.slots.borrow_mut();
            match slots.get_mut(key) {
                Some(slot) => match &mut slot.kind {
                    SlotKind::Data { value: current, dep } => {
                        if current.same_value(&value) {
                            return;
                        }
                        let old = std::mem::replace(current, value.clone());
                        match dep {
                            Some(dep) => (Write::Reactive(dep.clone()), old),
                            None => (Write::Done, old),
                        }
                    }
                    SlotKind::Computed(computed) => (Write::Accessor(computed.clone()), Value::Undefined),
                },
                None => {
                    slots.insert(key.to_owned(), Slot::plain(value.clone()));
                    (Write::Done, Value::Undefined)
                }
            }
        };
        drop(old);

        match write {
            Write::Done => {}
            Write::Reactive(dep) => {
                observe(&value);
                dep.notify();
            }
            Write::Accessor(computed) => computed.set(value),
        }
    }

    /// Whether the object has a field named `key`.
    pub fn has(&self, key: &str) -> bool {
        self.0.slots.borrow().contains_key(key)
    }

    /// Field names in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.0.slots.borrow().keys().cloned().collect()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.slots.borrow().len()
    }

    /// Whether the object has no fields.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Define a non-configurable field. Observation leaves it untouched: it
    /// is never converted into a reactive field.
    pub fn define_fixed(&self, key: &str, value: impl Into<Value>) {
        if self.is_frozen() {
            return;
        }
        let mut slots = self.0.slots.borrow_mut();
        if slots.get(key).is_some_and(|slot| !slot.configurable) {
            return;
        }
        slots.insert(
            key.to_owned(),
            Slot {
                kind: SlotKind::Data {
                    value: value.into(),
                    dep: None,
                },
                configurable: false,
            },
        );
    }

    /// Expose `computed` as an accessor field. Reading the field evaluates
    /// the computed value; assigning it calls the computed setter.
    pub fn define_computed(&self, key: &str, computed: Computed) {
        if self.is_frozen() {
            return;
        }
        let previous = {
            let mut slots = self.0.slots.borrow_mut();
            if slots.get(key).is_some_and(|slot| !slot.configurable) {
                return;
            }
            slots.insert(
                key.to_owned(),
                Slot {
                    kind: SlotKind::Computed(computed),
                    configurable: true,
                },
            )
        };
        drop(previous);
    }

    /// Make the object non-extensible. Frozen objects are never observed
    /// and ignore writes.
    pub fn freeze(&self) {
        self.0.frozen.set(true);
    }

    /// Whether [`freeze`](Self::freeze) was called.
    pub fn is_frozen(&self) -> bool {
        self.0.frozen.get()
    }

    /// Flag the object as reserved for internal use. Internal objects are
    /// never observed.
    pub fn mark_internal(&self) {
        self.0.internal.set(true);
    }

    /// Whether [`mark_internal`](Self::mark_internal) was called.
    pub fn is_internal(&self) -> bool {
        self.0.internal.get()
    }

    /// The attached observer, if the object has been observed.
    pub fn observer(&self) -> Option<Observer> {
        self.0.observer.get().cloned()
    }

    /// Whether both handles refer to the same object.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Identity of the underlying allocation.
    pub fn container_id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub(crate) fn attach_observer(&self, observer: Observer) -> bool {
        self.0.observer.set(observer).is_ok()
    }

    /// Current raw value of a data field.
    pub(crate) fn data_value(&self, key: &str) -> Option<Value> {
        match self.0.slots.borrow().get(key).map(|slot| &slot.kind) {
            Some(SlotKind::Data { value, .. }) => Some(value.clone()),
            _ => None,
        }
    }

    /// Replace a field with a reactive data slot backed by `dep`. Returns
    /// `false` (leaving the field alone) when the existing field is
    /// non-configurable or the object is frozen.
    pub(crate) fn install_reactive(&self, key: &str, value: Value, dep: Dep) -> bool {
        if self.is_frozen() {
            return false;
        }
        let previous = {
            let mut slots = self.0.slots.borrow_mut();
            if slots.get(key).is_some_and(|slot| !slot.configurable) {
                return false;
            }
            slots.insert(
                key.to_owned(),
                Slot {
                    kind: SlotKind::Data {
                        value,
                        dep: Some(dep),
                    },
                    configurable: true,
                },
            )
        };
        drop(previous);
        true
    }

    /// Remove a configurable field, returning whether one was removed.
    pub(crate) fn remove(&self, key: &str) -> bool {
        let removed = {
            let mut slots = self.0.slots.borrow_mut();
            if slots.get(key).is_some_and(|slot| !slot.configurable) {
                return false;
            }
            slots.shift_remove(key)
        };
        removed.is_some()
    }
}

/// Subscribe the active reader to every observed element of `list`,
/// descending into nested lists.
fn depend_items(list: &List, seen: &mut Vec<usize>) {
    if seen.contains(&list.container_id()) {
        return;
    }
    seen.push(list.container_id());
    for item in list.to_vec() {
        if let Some(ob) = item.observer() {
            ob.dep().depend();
        }
        if let Value::List(nested) = &item {
            depend_items(nested, seen);
        }
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for Object
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let object = Object::new();
        {
            let mut slots = object.0.slots.borrow_mut();
            for (key, value) in iter {
                slots.insert(key.into(), Slot::plain(value.into()));
            }
        }
        object
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &format_args!("{:#x}", self.container_id()))
            .field("keys", &self.keys())
            .field("observed", &self.observer().is_some())
            .finish()
    }
}
