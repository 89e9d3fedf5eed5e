//! Observable lists.
//!
//! A [`List`] exposes exactly seven mutators: `push`, `pop`, `shift`,
//! `unshift`, `splice`, `sort` (and `sort_by`) and `reverse`. Once the list
//! is observed, each of them observes any inserted elements and then fires
//! the list's structural dependency node exactly once. Reads are not
//! intercepted; a watcher picks up a list by reading the field that holds
//! it.

use std::cell::{Cell, OnceCell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use super::{observe, Observer, Value};

struct ListInner {
    items: RefCell<Vec<Value>>,
    observer: OnceCell<Observer>,
    frozen: Cell<bool>,
}

/// An observable list. Cloning shares the list.
#[derive(Clone)]
pub struct List(Rc<ListInner>);

impl List {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::from(Vec::new())
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    /// Whether the list has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.items.borrow().get(index).cloned()
    }

    /// Copy of the elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    /// Iterate over a copy of the elements.
    pub fn iter(&self) -> std::vec::IntoIter<Value> {
        self.to_vec().into_iter()
    }

    /// Append an element and return the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        if self.is_frozen() {
            return self.len();
        }
        let len = {
            let mut items = self.0.items.borrow_mut();
            items.push(value.clone());
            items.len()
        };
        self.mutated(&[value]);
        len
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Option<Value> {
        if self.is_frozen() {
            return None;
        }
        let removed = self.0.items.borrow_mut().pop();
        self.mutated(&[]);
        removed
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Value> {
        if self.is_frozen() {
            return None;
        }
        let removed = {
            let mut items = self.0.items.borrow_mut();
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };
        self.mutated(&[]);
        removed
    }

    /// Prepend an element and return the new length.
    pub fn unshift(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        if self.is_frozen() {
            return self.len();
        }
        let len = {
            let mut items = self.0.items.borrow_mut();
            items.insert(0, value.clone());
            items.len()
        };
        self.mutated(&[value]);
        len
    }

    /// Remove `delete_count` elements starting at `start`, insert `items`
    /// in their place, and return the removed elements.
    ///
    /// `start` and `delete_count` are clamped to the list bounds.
    pub fn splice<I>(&self, start: usize, delete_count: usize, items: I) -> Vec<Value>
    where
        I: IntoIterator<Item = Value>,
    {
        let inserted: Vec<Value> = items.into_iter().collect();
        if self.is_frozen() {
            return Vec::new();
        }
        let removed = {
            let mut current = self.0.items.borrow_mut();
            let start = start.min(current.len());
            let end = start.saturating_add(delete_count).min(current.len());
            current
                .splice(start..end, inserted.iter().cloned())
                .collect::<Vec<_>>()
        };
        self.mutated(&inserted);
        removed
    }

    /// Replace the element at `index`. Past the end, the list is first
    /// padded with `Undefined` so the value lands at `index`. Routed through
    /// [`splice`](Self::splice).
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        let value = value.into();
        if self.is_frozen() {
            return;
        }
        {
            let mut items = self.0.items.borrow_mut();
            if items.len() < index {
                items.resize(index, Value::Undefined);
            }
        }
        self.splice(index, 1, [value]);
    }

    /// Sort with [`Value::compare`].
    pub fn sort(&self) {
        self.sort_by(Value::compare);
    }

    /// Sort with a comparator.
    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        if self.is_frozen() {
            return;
        }
        // Sort outside the borrow so the comparator may read the list.
        let mut items = std::mem::take(&mut *self.0.items.borrow_mut());
        items.sort_by(compare);
        *self.0.items.borrow_mut() = items;
        self.mutated(&[]);
    }

    /// Reverse in place.
    pub fn reverse(&self) {
        if self.is_frozen() {
            return;
        }
        self.0.items.borrow_mut().reverse();
        self.mutated(&[]);
    }

    /// Make the list immutable. Frozen lists are never observed and their
    /// mutators do nothing.
    pub fn freeze(&self) {
        self.0.frozen.set(true);
    }

    /// Whether [`freeze`](Self::freeze) was called.
    pub fn is_frozen(&self) -> bool {
        self.0.frozen.get()
    }

    /// The attached observer, if the list has been observed.
    pub fn observer(&self) -> Option<Observer> {
        self.0.observer.get().cloned()
    }

    /// Whether both handles refer to the same list.
    pub fn ptr_eq(&self, other: &List) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Identity of the underlying allocation.
    pub fn container_id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub(crate) fn attach_observer(&self, observer: Observer) -> bool {
        self.0.observer.set(observer).is_ok()
    }

    fn mutated(&self, inserted: &[Value]) {
        let Some(observer) = self.observer() else {
            return;
        };
        for value in inserted {
            observe(value);
        }
        observer.dep().notify();
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Value>> for List {
    fn from(items: Vec<Value>) -> Self {
        Self(Rc::new(ListInner {
            items: RefCell::new(items),
            observer: OnceCell::new(),
            frozen: Cell::new(false),
        }))
    }
}

impl<V: Into<Value>> FromIterator<V> for List {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::from(iter.into_iter().map(Into::into).collect::<Vec<_>>())
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("id", &format_args!("{:#x}", self.container_id()))
            .field("len", &self.len())
            .field("observed", &self.observer().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(list: &List) -> Vec<f64> {
        list.iter().filter_map(|v| v.as_number()).collect()
    }

    #[test]
    fn mutators_behave_like_vec() {
        let list: List = [1, 2, 3].into_iter().collect();

        assert_eq!(list.push(4), 4);
        assert_eq!(list.unshift(0), 5);
        assert_eq!(list.pop(), Some(Value::from(4)));
        assert_eq!(list.shift(), Some(Value::from(0)));
        assert_eq!(numbers(&list), vec![1.0, 2.0, 3.0]);

        list.reverse();
        assert_eq!(numbers(&list), vec![3.0, 2.0, 1.0]);
        list.sort();
        assert_eq!(numbers(&list), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn splice_clamps_bounds() {
        let list: List = [1, 2, 3].into_iter().collect();

        let removed = list.splice(1, 10, [Value::from(9)]);
        assert_eq!(removed, vec![Value::from(2), Value::from(3)]);
        assert_eq!(numbers(&list), vec![1.0, 9.0]);

        let removed = list.splice(50, 1, [Value::from(5)]);
        assert!(removed.is_empty());
        assert_eq!(numbers(&list), vec![1.0, 9.0, 5.0]);
    }

    #[test]
    fn set_replaces_or_pads_to_index() {
        let list: List = [1, 2].into_iter().collect();
        list.set(0, 10);
        list.set(2, 20);
        assert_eq!(numbers(&list), vec![10.0, 2.0, 20.0]);

        list.set(5, 50);
        assert_eq!(list.len(), 6);
        assert_eq!(list.get(3), Some(Value::Undefined));
        assert_eq!(list.get(4), Some(Value::Undefined));
        assert_eq!(list.get(5), Some(Value::from(50)));
    }

    #[test]
    fn empty_removals_return_none() {
        let list = List::new();
        assert_eq!(list.pop(), None);
        assert_eq!(list.shift(), None);
    }

    #[test]
    fn frozen_list_ignores_mutation() {
        let list: List = [1].into_iter().collect();
        list.freeze();
        assert_eq!(list.push(2), 1);
        list.reverse();
        assert_eq!(numbers(&list), vec![1.0]);
    }

    #[test]
    fn sort_by_may_read_the_list() {
        let list: List = [3, 1, 2].into_iter().collect();
        let reader = list.clone();
        list.sort_by(|a, b| {
            // Must not hit an outstanding borrow.
            let _ = reader.len();
            a.compare(b)
        });
        assert_eq!(numbers(&list), vec![1.0, 2.0, 3.0]);
    }
}
