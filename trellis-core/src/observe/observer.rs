//! Observers
//!
//! An [`Observer`] is attached to each observed container. Attaching one
//! converts every field of an object into a reactive field backed by its
//! own dependency node, or observes every element of a list, recursively.
//! The observer's own dependency node is the container's *structural*
//! node: it fires when fields are added or deleted through [`set`] and
//! [`delete`], or when a list mutator runs.
//!
//! # Root consumers
//!
//! When a container serves as the root state of an
//! [`Instance`](crate::reactive::Instance), the instance registers itself
//! on the observer. Adding or deleting fields on root state at runtime is
//! refused with a diagnostic: the owning instance would not see the new
//! field.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::{Object, Value};
use crate::diagnostics;
use crate::reactive::{Dep, InstanceId};

struct ObserverInner {
    dep: Dep,
    roots: RefCell<Vec<InstanceId>>,
}

/// The observer attached to an observed container.
#[derive(Clone)]
pub struct Observer(Rc<ObserverInner>);

impl Observer {
    fn new() -> Self {
        Self(Rc::new(ObserverInner {
            dep: Dep::new(),
            roots: RefCell::new(Vec::new()),
        }))
    }

    /// The container's structural dependency node.
    pub fn dep(&self) -> &Dep {
        &self.0.dep
    }

    /// Register a root consumer.
    pub fn add_root(&self, instance: InstanceId) {
        let mut roots = self.0.roots.borrow_mut();
        if !roots.contains(&instance) {
            roots.push(instance);
        }
    }

    /// Deregister a root consumer. No-op if it is not registered.
    pub fn remove_root(&self, instance: InstanceId) {
        self.0.roots.borrow_mut().retain(|id| *id != instance);
    }

    /// Number of root consumers.
    pub fn root_count(&self) -> usize {
        self.0.roots.borrow().len()
    }

    /// Whether both handles refer to the same observer.
    pub fn ptr_eq(&self, other: &Observer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.0.dep)
            .field("root_count", &self.root_count())
            .finish()
    }
}

/// Observe a value.
///
/// Returns the existing observer if the value already has one, a new one
/// if it is an extensible, non-internal container, and `None` otherwise.
/// `None` is an ordinary outcome (primitives, frozen and internal
/// containers), not an error.
pub fn observe(value: &Value) -> Option<Observer> {
    match value {
        Value::Object(object) => {
            if let Some(existing) = object.observer() {
                return Some(existing);
            }
            if object.is_frozen() || object.is_internal() {
                return None;
            }

            let observer = Observer::new();
            // Attach before walking so self-references resolve to this
            // observer instead of recursing.
            object.attach_observer(observer.clone());
            tracing::trace!(dep = observer.dep().id().raw(), "observing object");
            walk(object);
            Some(observer)
        }
        Value::List(list) => {
            if let Some(existing) = list.observer() {
                return Some(existing);
            }
            if list.is_frozen() {
                return None;
            }

            let observer = Observer::new();
            list.attach_observer(observer.clone());
            tracing::trace!(dep = observer.dep().id().raw(), "observing list");
            for item in list.to_vec() {
                observe(&item);
            }
            Some(observer)
        }
        _ => None,
    }
}

fn walk(object: &Object) {
    for key in object.keys() {
        if let Some(value) = object.data_value(&key) {
            define_reactive(object, &key, value);
        }
    }
}

/// Turn `key` into a reactive field holding `value`, backed by a fresh
/// dependency node. Non-configurable fields are silently skipped.
pub fn define_reactive(target: &Object, key: &str, value: Value) {
    if target.install_reactive(key, value.clone(), Dep::new()) {
        observe(&value);
    }
}

/// Add or update a field and make sure it is reactive.
///
/// Existing keys are assigned normally. A new key on an observed object is
/// defined as a reactive field and the object's structural node fires; on
/// an unobserved object it becomes a plain field. Adding fields to root
/// state is refused with a diagnostic.
pub fn set(target: &Object, key: &str, value: impl Into<Value>) {
    let value = value.into();
    if target.has(key) {
        target.set(key, value);
        return;
    }

    let Some(observer) = target.observer() else {
        target.set(key, value);
        return;
    };

    if observer.root_count() > 0 {
        diagnostics::report(
            format!(
                "avoid adding reactive properties to root state at runtime; \
                 declare \"{key}\" upfront instead"
            ),
            None,
        );
        return;
    }

    define_reactive(target, key, value);
    observer.dep().notify();
}

/// Delete a field and fire the object's structural node if it is
/// observed. Missing keys are ignored; deleting from root state is
/// refused with a diagnostic.
pub fn delete(target: &Object, key: &str) {
    let observer = target.observer();
    if observer.as_ref().is_some_and(|ob| ob.root_count() > 0) {
        diagnostics::report(
            format!("avoid deleting properties on root state; set \"{key}\" to null instead"),
            None,
        );
        return;
    }

    if !target.remove(key) {
        return;
    }

    if let Some(observer) = observer {
        observer.dep().notify();
    }
}
