//! Computed Values
//!
//! A Computed is a lazy [`Watcher`] exposed behind an accessor. Reading it
//! re-evaluates only when one of its inputs changed since the last read.
//! When something else is evaluating at the time of the read, that reader
//! is subscribed to the computed value's own inputs, so it is invalidated
//! directly by them instead of by the computed value.
//!
//! # Setters
//!
//! A computed value may carry a setter, called when the accessor field is
//! assigned. Without one, assignments are ignored.

use std::fmt;
use std::rc::Rc;

use super::context::ReactiveContext;
use super::watcher::{Expression, Watcher, WatcherOptions};
use crate::error::EvalError;
use crate::observe::Value;

type Setter = Rc<dyn Fn(&Value, Value)>;

/// A cached derived value. Cloning shares it.
#[derive(Clone)]
pub struct Computed {
    watcher: Watcher,
    setter: Option<Setter>,
}

impl Computed {
    /// Create a computed value from a getter evaluated against `scope`.
    pub fn new<F>(scope: Value, getter: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, EvalError> + 'static,
    {
        Self::from_expression(scope, Expression::function("computed", getter), None)
    }

    /// Create a computed value from any expression.
    pub fn from_expression<E>(scope: Value, expression: E, owner: Option<String>) -> Self
    where
        E: Into<Expression>,
    {
        let watcher = Watcher::silent(
            scope,
            expression,
            WatcherOptions {
                lazy: true,
                owner,
                ..Default::default()
            },
        );
        Self {
            watcher,
            setter: None,
        }
    }

    /// Attach a setter. It receives the scope and the assigned value.
    pub fn with_setter<S>(mut self, setter: S) -> Self
    where
        S: Fn(&Value, Value) + 'static,
    {
        self.setter = Some(Rc::new(setter));
        self
    }

    /// Get the current value, re-evaluating if an input changed.
    pub fn get(&self) -> Value {
        if self.watcher.is_dirty() {
            self.watcher.evaluate();
        }
        if ReactiveContext::is_active() {
            self.watcher.depend();
        }
        self.watcher.value()
    }

    /// Assign through the setter, if there is one.
    pub fn set(&self, value: Value) {
        let Some(setter) = &self.setter else {
            tracing::trace!(source = self.watcher.source(), "computed value has no setter");
            return;
        };
        let scope = self.watcher.scope();
        let _quiet = ReactiveContext::untracked();
        setter(&scope, value);
    }

    /// Whether the cached value is stale.
    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    /// Whether a setter was attached.
    pub fn has_setter(&self) -> bool {
        self.setter.is_some()
    }

    /// The underlying lazy watcher.
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    /// Tear down the underlying watcher.
    pub fn teardown(&self) {
        self.watcher.teardown();
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("watcher", &self.watcher)
            .field("dirty", &self.is_dirty())
            .field("has_setter", &self.has_setter())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::{observe, Object};
    use std::cell::Cell;

    fn data() -> Object {
        let object: Object = [("count", 2)].into_iter().collect();
        observe(&Value::from(object.clone()));
        object
    }

    fn doubled(calls: Rc<Cell<u32>>) -> impl Fn(&Value) -> Result<Value, EvalError> {
        move |scope| {
            calls.set(calls.get() + 1);
            let count = scope
                .as_object()
                .and_then(|o| o.get("count").as_number())
                .ok_or_else(|| EvalError::custom("count is not a number"))?;
            Ok(Value::from(count * 2.0))
        }
    }

    #[test]
    fn computed_caches_until_input_changes() {
        let data = data();
        let calls = Rc::new(Cell::new(0));
        let computed = Computed::new(Value::from(data.clone()), doubled(calls.clone()));

        assert_eq!(calls.get(), 0);
        assert_eq!(computed.get(), Value::from(4));
        assert_eq!(computed.get(), Value::from(4));
        assert_eq!(calls.get(), 1);

        data.set("count", 5);
        assert!(computed.is_dirty());
        assert_eq!(computed.get(), Value::from(10));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn accessor_field_reads_and_writes_through_computed() {
        let data = data();
        let computed = Computed::new(Value::from(data.clone()), doubled(Rc::new(Cell::new(0))))
            .with_setter(|scope, value| {
                if let (Some(object), Some(n)) = (scope.as_object(), value.as_number()) {
                    object.set("count", n / 2.0);
                }
            });
        data.define_computed("doubled", computed);

        assert_eq!(data.get("doubled"), Value::from(4));
        data.set("doubled", 20);
        assert_eq!(data.get("count"), Value::from(10));
        assert_eq!(data.get("doubled"), Value::from(20));
    }

    #[test]
    fn assignment_without_setter_is_ignored() {
        let data = data();
        let computed = Computed::new(Value::from(data.clone()), doubled(Rc::new(Cell::new(0))));
        assert!(!computed.has_setter());
        data.define_computed("doubled", computed);

        data.set("doubled", 100);
        assert_eq!(data.get("doubled"), Value::from(4));
        assert_eq!(data.get("count"), Value::from(2));
    }

    #[test]
    fn readers_are_subscribed_to_computed_inputs() {
        let data = data();
        let computed = Computed::new(Value::from(data.clone()), doubled(Rc::new(Cell::new(0))));
        let inner = computed.clone();
        let seen = Rc::new(Cell::new(0.0));
        let out = seen.clone();

        let _reader = Watcher::new(
            Value::Null,
            Expression::function("reader", move |_| Ok(inner.get())),
            move |new, _| {
                out.set(new.as_number().unwrap_or_default());
                Ok(())
            },
            WatcherOptions {
                sync: true,
                ..Default::default()
            },
        );

        data.set("count", 7);
        assert_eq!(seen.get(), 14.0);
    }
}
