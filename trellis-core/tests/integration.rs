//! Integration Tests for the Reactive System
//!
//! These tests verify that observed data, watchers and the batch scheduler
//! work together correctly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::json;

use trellis_core::batch::{self, Scheduler};
use trellis_core::diagnostics;
use trellis_core::observe::{self, observe, List, Object, Path, Value};
use trellis_core::reactive::{Expression, Instance, WatchOptions, Watcher, WatcherOptions};
use trellis_core::WatchError;

type Log = Rc<RefCell<Vec<(Value, Value)>>>;

/// Build an observed object from JSON.
fn observed(json: serde_json::Value) -> Object {
    let value = Value::from_json(json);
    observe(&value);
    value.as_object().cloned().expect("fixture is an object")
}

/// Read a numeric path, treating anything else as zero.
fn num(scope: &Value, path: &str) -> f64 {
    Path::parse(path)
        .and_then(|p| p.get(scope))
        .ok()
        .and_then(|v| v.as_number())
        .unwrap_or_default()
}

fn recorder() -> (Log, impl FnMut(&Value, &Value) -> Result<(), trellis_core::CallbackError>) {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    (log, move |new: &Value, old: &Value| {
        sink.borrow_mut().push((new.clone(), old.clone()));
        Ok(())
    })
}

fn capture_diagnostics() -> Rc<RefCell<Vec<String>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    diagnostics::set_sink(move |d| sink.borrow_mut().push(d.to_string()));
    seen
}

/// Test the documented end-to-end scenario.
#[test]
fn sum_of_nested_fields_end_to_end() {
    let obj = observed(json!({ "a": 1, "b": { "c": 2 } }));
    let (log, callback) = recorder();

    let w = Watcher::new(
        Value::from(obj.clone()),
        Expression::function("a + b.c", |scope| {
            Ok(Value::from(num(scope, "a") + num(scope, "b.c")))
        }),
        callback,
        WatcherOptions::default(),
    );
    assert_eq!(w.value(), Value::from(3));

    obj.set("a", 5);
    batch::drain();
    assert_eq!(*log.borrow(), vec![(Value::from(7), Value::from(3))]);

    // Writing the same value is not a change.
    if let Value::Object(b) = obj.get("b") {
        b.set("c", 2);
    }
    batch::drain();
    assert_eq!(log.borrow().len(), 1);

    obj.set("b", Value::from_json(json!({ "c": 9 })));
    batch::drain();
    assert_eq!(
        log.borrow().last(),
        Some(&(Value::from(14), Value::from(7)))
    );
}

/// Test that only fields actually read are tracked.
#[test]
fn dependencies_follow_reads() {
    let obj = observed(json!({ "flag": false, "x": 1, "y": 2 }));
    let _w = Watcher::silent(
        Value::from(obj.clone()),
        Expression::function("flag ? x : y", |scope| {
            let flag = Path::parse("flag")?.get(scope)?;
            Path::parse(if flag.is_truthy() { "x" } else { "y" })?.get(scope)
        }),
        WatcherOptions::default(),
    );

    // x was only read under the branch that was not taken.
    obj.set("x", 10);
    assert_eq!(Scheduler::pending_len(), 0);

    obj.set("y", 20);
    assert_eq!(Scheduler::pending_len(), 1);
    batch::drain();
}

/// Test that a dependency dropped on a later pass stops triggering.
#[test]
fn stale_dependencies_are_pruned() {
    let obj = observed(json!({ "flag": true, "x": 1 }));
    let w = Watcher::silent(
        Value::from(obj.clone()),
        Expression::function("flag && x", |scope| {
            let flag = Path::parse("flag")?.get(scope)?;
            if flag.is_truthy() {
                Path::parse("x")?.get(scope)
            } else {
                Ok(flag)
            }
        }),
        WatcherOptions::default(),
    );
    assert_eq!(w.dependency_count(), 2);

    obj.set("flag", false);
    batch::drain();
    assert_eq!(w.dependency_count(), 1);

    obj.set("x", 2);
    assert_eq!(Scheduler::pending_len(), 0);
}

/// Test that invalidating a watcher several times before a flush runs it once.
#[test]
fn invalidations_are_deduplicated() {
    let obj = observed(json!({ "a": 0, "b": 0 }));
    let (log, callback) = recorder();
    let w = Watcher::new(
        Value::from(obj.clone()),
        Expression::function("a + b", |scope| Ok(Value::from(num(scope, "a") + num(scope, "b")))),
        callback,
        WatcherOptions::default(),
    );
    let evaluations = w.eval_count();

    obj.set("a", 1);
    obj.set("b", 1);
    obj.set("a", 2);
    batch::drain();

    assert_eq!(w.eval_count(), evaluations + 1);
    assert_eq!(*log.borrow(), vec![(Value::from(3), Value::from(0))]);
}

/// Test that watchers invalidated together run in creation order.
#[test]
fn earlier_watchers_fire_first() {
    let obj = observed(json!({ "first": 0, "second": 0 }));
    let order = Rc::new(RefCell::new(Vec::new()));

    let log_a = order.clone();
    let _a = Watcher::new(
        Value::from(obj.clone()),
        "first",
        move |_, _| {
            log_a.borrow_mut().push("a");
            Ok(())
        },
        WatcherOptions::default(),
    );
    let log_b = order.clone();
    let _b = Watcher::new(
        Value::from(obj.clone()),
        "second",
        move |_, _| {
            log_b.borrow_mut().push("b");
            Ok(())
        },
        WatcherOptions::default(),
    );

    obj.set("second", 1);
    obj.set("first", 1);
    batch::drain();
    assert_eq!(*order.borrow(), vec!["a", "b"]);
}

/// Test that internal watchers settle before user callbacks, including
/// internal watchers invalidated by a user callback.
#[test]
fn internal_watchers_settle_before_user_callbacks() {
    let vm = Instance::new(observed(json!({ "x": 0, "y": 0 })));
    let order = Rc::new(RefCell::new(Vec::new()));

    let log = order.clone();
    let data = vm.data();
    vm.watch(
        "x",
        move |new, _| {
            log.borrow_mut().push("user 1");
            data.set("y", new.as_number().unwrap_or_default() * 10.0);
            Ok(())
        },
        WatchOptions::default(),
    );
    let log = order.clone();
    vm.watcher(
        "y",
        move |_, _| {
            log.borrow_mut().push("render");
            Ok(())
        },
        WatcherOptions::default(),
    );
    let log = order.clone();
    vm.watch(
        "x",
        move |_, _| {
            log.borrow_mut().push("user 2");
            Ok(())
        },
        WatchOptions::default(),
    );

    vm.data().set("x", 1);
    batch::drain();
    assert_eq!(*order.borrow(), vec!["user 1", "render", "user 2"]);

    order.borrow_mut().clear();
    vm.data().set("x", 2);
    vm.data().set("y", 5);
    batch::drain();
    assert_eq!(order.borrow()[..2], ["render", "user 1"]);
}

/// Test that teardown can be repeated safely.
#[test]
fn teardown_twice_is_harmless() {
    let obj = observed(json!({ "a": 1 }));
    let (log, callback) = recorder();
    let w = Watcher::new(Value::from(obj.clone()), "a", callback, WatcherOptions::default());

    w.teardown();
    w.teardown();

    obj.set("a", 2);
    batch::drain();
    assert!(log.borrow().is_empty());
    assert!(!w.is_active());
    assert_eq!(w.dependency_count(), 0);
}

/// Test that a self-invalidating watcher is halted and the flush ends.
#[test]
#[cfg(feature = "diagnostics")]
fn self_invalidating_watcher_is_halted() {
    let seen = capture_diagnostics();
    let vm = Instance::named("Looper", observed(json!({ "n": 0 })));
    let data = vm.data();
    vm.watch(
        "n",
        move |new, _| {
            data.set("n", new.as_number().unwrap_or_default() + 1.0);
            Ok(())
        },
        WatchOptions::default(),
    );

    vm.data().set("n", 1);
    batch::drain();
    diagnostics::clear_sink();

    assert!(!Scheduler::is_flushing());
    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("infinite update loop"));
    assert!(seen[0].ends_with("(found in <Looper>)"));
}

/// Test that deep watchers see nested mutations.
#[test]
fn deep_watch_tracks_nested_fields() {
    let vm = Instance::new(observed(json!({ "root": { "a": { "b": { "c": 0 } } } })));
    let (log, callback) = recorder();
    vm.watch(
        "root",
        callback,
        WatchOptions {
            deep: true,
            ..Default::default()
        },
    );
    let (shallow_log, shallow_callback) = recorder();
    vm.watch("root", shallow_callback, WatchOptions::default());

    let b = Path::parse("root.a.b")
        .and_then(|p| p.get(&Value::from(vm.data())))
        .expect("path resolves");
    b.as_object().expect("b is an object").set("c", 1);
    batch::drain();

    assert_eq!(log.borrow().len(), 1);
    assert!(shallow_log.borrow().is_empty());
}

/// Test that list mutators notify once and observe inserted elements.
#[test]
fn list_mutators_notify_and_observe() {
    let obj = observed(json!({ "items": [{ "n": 1 }] }));
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    let _w = Watcher::new(
        Value::from(obj.clone()),
        "items",
        move |_, _| {
            counter.set(counter.get() + 1);
            Ok(())
        },
        WatcherOptions {
            sync: true,
            ..Default::default()
        },
    );
    let items = obj.get("items").as_list().cloned().expect("items is a list");

    let inserted = Object::from_iter([("n", 2)]);
    items.push(inserted.clone());
    assert_eq!(runs.get(), 1);
    assert!(inserted.observer().is_some());

    items.shift();
    assert_eq!(runs.get(), 2);

    let replacement = Object::from_iter([("n", 3)]);
    items.splice(0, 1, [Value::from(replacement.clone())]);
    assert_eq!(runs.get(), 3);
    assert!(replacement.observer().is_some());

    // The watcher below reads a field of an inserted element.
    let (log, callback) = recorder();
    let _field = Watcher::new(Value::from(obj.clone()), "items[0].n", callback, WatcherOptions::default());
    replacement.set("n", 30);
    batch::drain();
    assert_eq!(*log.borrow(), vec![(Value::from(30), Value::from(3))]);
}

/// Test that adding fields to nested state is reactive but root state refuses it.
#[test]
fn set_and_delete_respect_root_state() {
    let seen = capture_diagnostics();
    let vm = Instance::new(observed(json!({ "nested": {} })));
    let nested = vm.data().get("nested").as_object().cloned().expect("nested object");

    let (log, callback) = recorder();
    vm.watch("nested.added", callback, WatchOptions::default());

    observe::set(&nested, "added", 1);
    batch::drain();
    assert_eq!(*log.borrow(), vec![(Value::from(1), Value::Undefined)]);

    observe::delete(&nested, "added");
    batch::drain();
    assert_eq!(log.borrow().last(), Some(&(Value::Undefined, Value::from(1))));

    observe::set(&vm.data(), "fresh", true);
    observe::delete(&vm.data(), "nested");
    diagnostics::clear_sink();

    assert!(!vm.data().has("fresh"));
    assert!(vm.data().has("nested"));
    #[cfg(feature = "diagnostics")]
    assert_eq!(seen.borrow().len(), 2);
    drop(seen);
}

/// Test that a digest only fires callbacks whose values changed.
#[test]
fn digest_is_shallow() {
    let vm = Instance::new(observed(json!({ "list": [1, 2], "n": 1 })));
    let (list_log, list_callback) = recorder();
    vm.watch("list", list_callback, WatchOptions::default());
    let (n_log, n_callback) = recorder();
    vm.watch("n", n_callback, WatchOptions::default());

    vm.digest();
    batch::drain();
    assert!(list_log.borrow().is_empty());
    assert!(n_log.borrow().is_empty());

    // A real change queued after the digest upgrades it to a full run.
    vm.digest();
    vm.data().get("list").as_list().expect("list").push(3);
    batch::drain();
    assert_eq!(list_log.borrow().len(), 1);
}

/// Test that a full update queued before a digest is not downgraded.
#[test]
fn digest_never_downgrades_a_full_update() {
    let vm = Instance::new(observed(json!({ "list": [1, 2] })));
    let (log, callback) = recorder();
    vm.watch("list", callback, WatchOptions::default());

    vm.data().get("list").as_list().expect("list").push(3);
    vm.digest();
    batch::drain();
    assert_eq!(log.borrow().len(), 1);
}

/// Test that deep traversal stops at reference cycles.
#[test]
fn deep_watch_survives_cycles() {
    let vm = Instance::new(observed(json!({ "root": { "n": 1 } })));
    let root = vm.data().get("root").as_object().cloned().expect("root object");
    observe::set(&root, "me", Value::from(root.clone()));
    batch::drain();

    let (log, callback) = recorder();
    let w = vm.watch(
        "root",
        callback,
        WatchOptions {
            deep: true,
            ..Default::default()
        },
    );
    assert!(w.dependency_count() > 0);

    root.set("n", 2);
    batch::drain();
    assert_eq!(log.borrow().len(), 1);

    observe::delete(&root, "me");
    batch::drain();
    assert_eq!(log.borrow().len(), 2);
}

/// Test that reading a list depends on its elements' own fields being added.
#[test]
fn list_read_tracks_added_element_fields() {
    let vm = Instance::new(observed(json!({ "items": [{ "n": 1 }] })));
    let (log, callback) = recorder();
    vm.watch("items", callback, WatchOptions::default());

    let first = vm
        .data()
        .get("items")
        .as_list()
        .and_then(|l| l.get(0))
        .and_then(|v| v.as_object().cloned())
        .expect("first item is an object");
    observe::set(&first, "added", 5);
    batch::drain();

    assert_eq!(log.borrow().len(), 1);
    assert_eq!(first.get("added"), Value::from(5));
}

/// Test that callback failures surface on a later tick.
#[test]
fn callback_failures_are_escalated() {
    let vm = Instance::new(observed(json!({ "a": 0 })));
    let (log, callback) = recorder();
    vm.watch("a", |_, _| Err("bad value".into()), WatchOptions::default());
    vm.watch("a", callback, WatchOptions::default());

    vm.data().set("a", 1);
    batch::drain();

    assert_eq!(log.borrow().len(), 1);
    let errors = Scheduler::take_unhandled_errors();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        WatchError::Callback { expression, source } => {
            assert_eq!(expression, "a");
            assert_eq!(source.to_string(), "bad value");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

/// Test that two-way bindings write through the path.
#[test]
fn path_watcher_two_way_binding() {
    let vm = Instance::new(observed(json!({ "form": { "items": ["a", "b"] } })));
    let w = vm.watch("form.items[1]", |_, _| Ok(()), WatchOptions::default());

    w.set("z");
    let items = Path::parse("form.items")
        .and_then(|p| p.get(&Value::from(vm.data())))
        .expect("path resolves");
    assert_eq!(items.as_list().and_then(|l| l.get(1)), Some(Value::from("z")));
    batch::drain();
    assert_eq!(w.value(), Value::from("z"));

    let seen = capture_diagnostics();
    let function = vm.watch(
        Expression::function("constant", |_| Ok(Value::Null)),
        |_, _| Ok(()),
        WatchOptions::default(),
    );
    function.set(1);
    diagnostics::clear_sink();
    #[cfg(feature = "diagnostics")]
    {
        assert_eq!(seen.borrow().len(), 1);
        assert!(seen.borrow()[0].contains("no setter"));
    }
    drop(seen);

    // Past the end, the list is padded so the value lands at the index.
    let far = vm.watch("form.items[4]", |_, _| Ok(()), WatchOptions::default());
    far.set("y");
    batch::drain();
    let items = Path::parse("form.items")
        .and_then(|p| p.get(&Value::from(vm.data())))
        .expect("path resolves");
    let items = items.as_list().expect("items is a list");
    assert_eq!(items.len(), 5);
    assert_eq!(items.get(2), Some(Value::Undefined));
    assert_eq!(items.get(4), Some(Value::from("y")));
    assert_eq!(far.value(), Value::from("y"));
}

/// Test that computed fields feed watchers on the instance.
#[test]
fn computed_fields_drive_watchers() {
    let vm = Instance::new(observed(json!({ "items": [1, 2, 3] })));
    vm.computed("total", |scope| {
        let items = Path::parse("items")?.get(scope)?;
        let total = items
            .as_list()
            .map(|l| l.iter().filter_map(|v| v.as_number()).sum::<f64>())
            .unwrap_or_default();
        Ok(Value::from(total))
    });
    let (log, callback) = recorder();
    vm.watch("total", callback, WatchOptions::default());

    vm.data().get("items").as_list().expect("list").push(4);
    batch::drain();
    assert_eq!(*log.borrow(), vec![(Value::from(10), Value::from(6))]);
}

/// Test that snapshots reflect observed state.
#[test]
fn snapshot_of_observed_state() {
    let obj = observed(json!({ "a": 1, "list": [true, "x"] }));
    obj.get("list").as_list().expect("list").push(List::new());
    assert_eq!(
        Value::from(obj).to_json().expect("acyclic"),
        json!({ "a": 1, "list": [true, "x", []] })
    );
}

/// Test that the async driver flushes queued watchers.
#[tokio::test]
async fn run_loop_flushes_on_the_next_tick() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let driver = tokio::task::spawn_local(batch::run_loop());

            let vm = Instance::new(observed(json!({ "count": 0 })));
            let (log, callback) = recorder();
            vm.watch("count", callback, WatchOptions::default());

            vm.data().set("count", 1);
            vm.data().set("count", 2);
            assert!(log.borrow().is_empty());

            batch::next_tick_async().await;
            assert_eq!(*log.borrow(), vec![(Value::from(2), Value::from(0))]);

            driver.abort();
        })
        .await;
}
