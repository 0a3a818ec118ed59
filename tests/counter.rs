use std::rc::Rc;

use assert_call::{call, CallRecorder};
use slicemut::*;

#[derive(Clone, Debug, Default, PartialEq)]
struct Counter {
    value: i32,
}

struct App {
    store: Store,
    increment: Action<i32, i32>,
    value: Selector<(), i32>,
}

fn app() -> App {
    let registry = Registry::new();
    let increment = registry
        .create_action(None, "counter", "increment", |n: i32, _| Ok(n))
        .unwrap();
    let value = registry
        .create_selector(
            SelectorBuilder::<()>::new("value").build(|s, _| s.slice::<Counter>("counter").value),
        )
        .unwrap();
    let counter = registry
        .create_slice(
            SliceBuilder::<Counter>::with_default("counter").on(increment.action_type(), |s, a| {
                s.value += a.payload::<i32>().unwrap()
            }),
        )
        .unwrap();
    let store = registry
        .create_store(StoreBuilder::new().slice(&counter).selector(&value))
        .unwrap();
    App {
        store,
        increment,
        value,
    }
}

#[test]
fn increment_twice() {
    let mut cr = CallRecorder::new();
    let app = app();
    let o = app.store.observe_selector(&app.value, ()).unwrap();
    let _s = o.subscribe(|v| call!("{v}")).unwrap();

    app.increment.invoke(5).unwrap();
    assert_eq!(*app.value.select(&app.store.get_state(), ()).unwrap(), 5);
    app.increment.invoke(5).unwrap();
    assert_eq!(*app.value.select(&app.store.get_state(), ()).unwrap(), 10);
    cr.verify(["5", "10"]);
}

#[test]
fn snapshots_are_immutable() {
    let app = app();
    let s0 = app.store.get_state();
    app.increment.invoke(1).unwrap();
    let s1 = app.store.get_state();
    assert_eq!(s0.slice::<Counter>("counter").value, 0);
    assert_eq!(s1.slice::<Counter>("counter").value, 1);
    assert_ne!(s0.version(), s1.version());
    assert_eq!(*app.value.select(&s0, ()).unwrap(), 0);
}

#[test]
fn unchanged_selector_output_is_not_delivered() {
    let mut cr = CallRecorder::new();
    let app = app();
    let o = app.store.observe_selector(&app.value, ()).unwrap();
    let _s = o.subscribe(|v| call!("{v}")).unwrap();
    app.increment.invoke(0).unwrap();
    cr.verify(());
    app.increment.invoke(2).unwrap();
    cr.verify("2");
}

#[test]
fn memo_on_args_keeps_identity() {
    let mut cr = CallRecorder::new();
    let registry = Registry::new();
    let push = registry
        .create_action(None, "items", "push", |v: i32, _| Ok(v))
        .unwrap();
    let touch = registry
        .create_action(None, "clock", "touch", |_: (), _| Ok(()))
        .unwrap();
    let sorted = registry
        .create_selector(
            SelectorBuilder::<()>::new("sorted")
                .memo_on_args(true)
                .keep_memo(true)
                .input(|s, _| s.slice_rc::<Vec<i32>>("items"))
                .combine(|items, _| {
                    call!("sort");
                    let mut v = items.as_deref().cloned().unwrap_or_default();
                    v.sort();
                    v
                }),
        )
        .unwrap();
    let items = registry
        .create_slice(
            SliceBuilder::<Vec<i32>>::with_default("items")
                .on(push.action_type(), |s, a| s.push(*a.payload::<i32>().unwrap())),
        )
        .unwrap();
    let clock = registry
        .create_slice(SliceBuilder::new("clock", 0u32).on(touch.action_type(), |s, _| *s += 1))
        .unwrap();
    let store = registry
        .create_store(
            StoreBuilder::new()
                .slice(&items)
                .slice(&clock)
                .selector(&sorted),
        )
        .unwrap();

    push.invoke(3).unwrap();
    push.invoke(1).unwrap();
    let v0 = sorted.get(()).unwrap();
    touch.invoke(()).unwrap();
    let v1 = sorted.get(()).unwrap();
    assert!(Rc::ptr_eq(&v0, &v1));
    cr.verify("sort");
    assert_eq!(*v1, [1, 3]);
    assert_eq!(store.cache_entry_count(), 1);

    push.invoke(2).unwrap();
    assert_eq!(*sorted.get(()).unwrap(), [1, 2, 3]);
    cr.verify("sort");
}

#[test]
fn fan_out_computes_once_per_commit() {
    let mut cr = CallRecorder::new();
    let registry = Registry::new();
    let increment = registry
        .create_action(None, "counter", "increment", |n: i32, _| Ok(n))
        .unwrap();
    let label = registry
        .create_selector(
            SelectorBuilder::<()>::new("label")
                .input(|s, _| s.slice::<Counter>("counter").value)
                .combine(|v, _| {
                    call!("combine");
                    format!("#{v}")
                }),
        )
        .unwrap();
    let counter = registry
        .create_slice(
            SliceBuilder::<Counter>::with_default("counter").on(increment.action_type(), |s, a| {
                s.value += a.payload::<i32>().unwrap()
            }),
        )
        .unwrap();
    let store = registry
        .create_store(StoreBuilder::new().slice(&counter).selector(&label))
        .unwrap();

    let observations: Vec<_> = (0..4)
        .map(|_| store.observe_selector(&label, ()).unwrap())
        .collect();
    let subscriptions: Vec<_> = observations
        .iter()
        .map(|o| o.subscribe(|v| call!("{v}")).unwrap())
        .collect();
    cr.verify("combine");

    increment.invoke(1).unwrap();
    cr.verify(["combine", "#1", "#1", "#1", "#1"]);

    drop(subscriptions);
    assert_eq!(store.cache_entry_count(), 0);
    increment.invoke(1).unwrap();
    cr.verify(());
}

#[test]
fn observer_may_dispatch() {
    let mut cr = CallRecorder::new();
    let app = app();
    let increment = app.increment.clone();
    let o = app.store.observe_selector(&app.value, ()).unwrap();
    let _s = o
        .subscribe(move |v| {
            call!("{v}");
            if *v < 3 {
                increment.invoke(1).unwrap();
            }
        })
        .unwrap();
    app.increment.invoke(1).unwrap();
    assert_eq!(*app.value.get(()).unwrap(), 3);
    cr.verify(["1", "2", "3"]);
    assert_eq!(app.store.status(), StoreStatus::Ready);
}

#[test]
fn stores_do_not_share_state() {
    let registry = Registry::new();
    let mut stores = Vec::new();
    for name in ["main", "side"] {
        let increment = registry
            .create_action(Some(name), "counter", "increment", |n: i32, _| Ok(n))
            .unwrap();
        let counter = registry
            .create_slice(
                SliceBuilder::<Counter>::with_default("counter")
                    .store(name)
                    .on(increment.action_type(), |s, a| {
                        s.value += a.payload::<i32>().unwrap()
                    }),
            )
            .unwrap();
        let store = registry
            .create_store(StoreBuilder::new().name(name).slice(&counter))
            .unwrap();
        stores.push((store, increment));
    }
    stores[0].1.invoke(4).unwrap();
    let value = |store: &Store| store.get_slice_state::<Counter>("counter").unwrap().value;
    assert_eq!(value(&stores[0].0), 4);
    assert_eq!(value(&stores[1].0), 0);
    assert!(registry.is_store_created("main"));
    assert!(!registry.is_store_created("default"));
}
