use super::*;
use crate::{Action, ErrorKind, SelectorBuilder, SliceBuilder};
use assert_call::{call, CallRecorder};

struct Counter {
    registry: Registry,
    add: Action<i32, i32>,
    noop: Action<(), ()>,
    rename: Action<String, String>,
}

fn counter() -> Counter {
    let registry = Registry::new();
    let add = registry
        .create_action(None, "count", "add", |v: i32, _| Ok(v))
        .unwrap();
    let noop = registry
        .create_action(None, "count", "noop", |_: (), _| Ok(()))
        .unwrap();
    let rename = registry
        .create_action(None, "label", "rename", |v: String, _| Ok(v))
        .unwrap();
    Counter {
        registry,
        add,
        noop,
        rename,
    }
}

impl Counter {
    fn slices(&self) -> (SliceHandle<i32>, SliceHandle<String>) {
        let count = self
            .registry
            .create_slice(
                SliceBuilder::new("count", 0i32)
                    .on(self.add.action_type(), |s, a| *s += a.payload::<i32>().unwrap())
                    .no_handler(self.noop.action_type()),
            )
            .unwrap();
        let label = self
            .registry
            .create_slice(
                SliceBuilder::new("label", String::new())
                    .on(self.rename.action_type(), |s, a| {
                        *s = a.payload::<String>().unwrap().clone()
                    }),
            )
            .unwrap();
        (count, label)
    }
    fn store(&self) -> Store {
        let (count, label) = self.slices();
        self.registry
            .create_store(StoreBuilder::new().slice(&count).slice(&label))
            .unwrap()
    }
}

#[test]
fn dispatch_commits_new_state() {
    let c = counter();
    let store = c.store();
    let v0 = store.state_version();
    c.add.invoke(5).unwrap();
    assert_eq!(*store.get_state().slice::<i32>("count"), 5);
    assert_ne!(store.state_version(), v0);
    assert_eq!(store.status(), StoreStatus::Ready);
}

#[test]
fn dispatch_without_handler_keeps_state() {
    let mut cr = CallRecorder::new();
    let c = counter();
    let store = c.store();
    let s0 = store.get_state();
    let o = store.observe_state();
    let _s = o.subscribe(|_| call!("notify"));
    c.noop.invoke(()).unwrap();
    assert!(store.get_state().ptr_eq(&s0));
    assert_eq!(store.state_version(), s0.version());
    cr.verify(());
}

#[test]
fn sibling_slices_keep_identity() {
    let c = counter();
    let store = c.store();
    let label0 = store.get_slice_state::<String>("label").unwrap();
    c.add.invoke(1).unwrap();
    let label1 = store.get_slice_state::<String>("label").unwrap();
    assert!(Rc::ptr_eq(&label0, &label1));
}

#[test]
fn reducer_error_discards_commit() {
    let r = Registry::new();
    let set = r.create_action(None, "v", "set", |v: i32, _| Ok(v)).unwrap();
    let v = r
        .create_slice(SliceBuilder::new("v", 0i32).try_on(set.action_type(), |s, a| {
            let v = *a.payload::<i32>().unwrap();
            if v < 0 {
                return Err(Error::message("negative"));
            }
            *s = v;
            Ok(())
        }))
        .unwrap();
    let store = r.create_store(StoreBuilder::new().slice(&v)).unwrap();
    set.invoke(3).unwrap();
    let s0 = store.get_state();
    let e = set.invoke(-1).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::User);
    assert_eq!(e.to_string(), "negative");
    assert!(store.get_state().ptr_eq(&s0));
    assert_eq!(store.status(), StoreStatus::Ready);
    assert_eq!(*store.get_slice_state::<i32>("v").unwrap(), 3);
}

#[test]
fn action_inside_reducer_is_rejected() {
    let mut cr = CallRecorder::new();
    let c = counter();
    let rename = c.rename.clone();
    let count = c
        .registry
        .create_slice(
            SliceBuilder::new("count", 0i32)
                .on(c.add.action_type(), move |s, a| {
                    match rename.invoke("x".into()) {
                        Err(Error::ReentrantFromReducer(store)) => call!("reentrant {store}"),
                        _ => call!("unexpected"),
                    }
                    *s += a.payload::<i32>().unwrap();
                })
                .no_handler(c.noop.action_type()),
        )
        .unwrap();
    let label = c
        .registry
        .create_slice(SliceBuilder::new("label", String::new()).no_handler(c.rename.action_type()))
        .unwrap();
    let store = c
        .registry
        .create_store(StoreBuilder::new().slice(&count).slice(&label))
        .unwrap();
    c.add.invoke(2).unwrap();
    cr.verify("reentrant default");
    assert_eq!(*store.get_slice_state::<i32>("count").unwrap(), 2);
}

#[test]
fn stores_are_isolated() {
    let mut cr = CallRecorder::new();
    let r = Registry::new();
    let mut stores = Vec::new();
    let mut adds = Vec::new();
    for name in ["left", "right"] {
        let add = r
            .create_action(Some(name), "n", "add", |v: i32, _| Ok(v))
            .unwrap();
        let n = r
            .create_slice(
                SliceBuilder::new("n", 0i32)
                    .store(name)
                    .on(add.action_type(), |s, a| *s += a.payload::<i32>().unwrap()),
            )
            .unwrap();
        stores.push(r.create_store(StoreBuilder::new().name(name).slice(&n)).unwrap());
        adds.push(add);
    }
    let right0 = stores[1].get_state();
    let _s = stores[1].observe_state().subscribe(|_| call!("right"));
    adds[0].invoke(1).unwrap();
    cr.verify(());
    assert!(stores[1].get_state().ptr_eq(&right0));
    assert_eq!(*stores[0].get_slice_state::<i32>("n").unwrap(), 1);
}

#[test]
fn lists_members_by_slice() {
    let c = counter();
    let total = c
        .registry
        .create_selector(SelectorBuilder::<()>::new("total").build(|s, _| *s.slice::<i32>("count")))
        .unwrap();
    let (count, label) = c.slices();
    let store = c
        .registry
        .create_store(
            StoreBuilder::new()
                .slice(&count)
                .slice(&label)
                .selector(&total),
        )
        .unwrap();
    let ids = |v: Vec<MemberId>| v.iter().map(|id| id.member.clone()).collect::<Vec<_>>();
    assert_eq!(ids(store.get_actions(Some("count"))), ["addAction", "noopAction"]);
    assert_eq!(ids(store.get_actions(None)).len(), 3);
    assert_eq!(ids(store.get_selectors(Some(STORE_SLICE))), ["totalSelector"]);
    assert!(store.get_selectors(Some("count")).is_empty());
    assert!(c.registry.is_store_created("default"));
}

#[test]
fn store_validation() {
    let c = counter();
    let (count, label) = c.slices();
    let e = c
        .registry
        .create_store(StoreBuilder::new().slice(&count))
        .unwrap_err();
    assert!(matches!(e, Error::MissingSlice { .. }));

    let e = c
        .registry
        .create_store(StoreBuilder::new().slice(&count).slice(&count).slice(&label))
        .unwrap_err();
    assert!(matches!(e, Error::DuplicateSlice(_)));

    let e = c
        .registry
        .create_store(StoreBuilder::new().name("other").slice(&count))
        .unwrap_err();
    assert!(matches!(e, Error::ForeignSlice { .. }));

    c.registry
        .create_store(StoreBuilder::new().slice(&count).slice(&label))
        .unwrap();
    let e = c
        .registry
        .create_store(StoreBuilder::new().slice(&count).slice(&label))
        .unwrap_err();
    assert!(matches!(e, Error::StoreFinalized(_)));
    let e = c
        .registry
        .create_action(None, "count", "late", |_: (), _| Ok(()))
        .unwrap_err();
    assert!(matches!(e, Error::StoreFinalized(_)));
}

#[test]
fn store_level_selectors_must_be_listed() {
    let c = counter();
    c.registry
        .create_selector(SelectorBuilder::<()>::new("total").build(|_, _| 0))
        .unwrap();
    let (count, label) = c.slices();
    let e = c
        .registry
        .create_store(StoreBuilder::new().slice(&count).slice(&label))
        .unwrap_err();
    assert!(matches!(e, Error::MissingSelector(_)));
}

#[test]
fn members_of_unknown_slice() {
    let c = counter();
    c.registry
        .create_action(None, "ghost", "boo", |_: (), _| Ok(()))
        .unwrap();
    let (count, label) = c.slices();
    let e = c
        .registry
        .create_store(StoreBuilder::new().slice(&count).slice(&label))
        .unwrap_err();
    assert!(matches!(e, Error::UnknownSlice(_)));
}

#[test]
fn uninitialized_store_rejects_actions() {
    let c = counter();
    assert!(matches!(
        c.add.invoke(1),
        Err(Error::UninitializedStore(name)) if name == "default"
    ));
}

#[test]
fn status_display() {
    assert_eq!(StoreStatus::Ready.to_string(), "READY");
    assert_eq!(StoreStatus::Selecting.to_string(), "SELECTING");
}

#[test]
fn action_inside_observed_selector_is_rejected() {
    let mut cr = CallRecorder::new();
    let c = counter();
    let rename = c.rename.clone();
    let value = c
        .registry
        .create_selector(SelectorBuilder::<()>::new("value").build(move |s, _| {
            match rename.invoke("x".into()) {
                Err(Error::ReentrantFromSelector(store)) => call!("reentrant {store}"),
                _ => call!("unexpected"),
            }
            *s.slice::<i32>("count")
        }))
        .unwrap();
    let (count, label) = c.slices();
    let store = c
        .registry
        .create_store(
            StoreBuilder::default()
                .slice(&count)
                .slice(&label)
                .selector(&value),
        )
        .unwrap();

    let o = store.observe_selector(&value, ()).unwrap();
    cr.verify("reentrant default");
    let _s = o.subscribe(|v| call!("{v}")).unwrap();
    c.add.invoke(2).unwrap();
    cr.verify(["reentrant default", "2"]);
    assert_eq!(*store.get_slice_state::<String>("label").unwrap(), "");
    assert_eq!(store.status(), StoreStatus::Ready);
}
