use super::*;
use crate::{SliceBuilder, StoreBuilder, STORE_SLICE};
use assert_call::{call, CallRecorder};

#[test]
fn invoke_returns_dispatched_record() {
    let r = Registry::new();
    let add = r
        .create_action(None, "count", "add", |v: i32, _| Ok(v * 2))
        .unwrap();
    let count = r
        .create_slice(
            SliceBuilder::new("count", 0i32)
                .on(add.action_type(), |s, a| *s += a.payload::<i32>().unwrap()),
        )
        .unwrap();
    r.create_store(StoreBuilder::new().slice(&count)).unwrap();

    let record = add.invoke(3).unwrap();
    assert_eq!(record.slice_name(), "count");
    assert_eq!(record.action_type(), add.action_type());
    assert_eq!(record.phase(), ActionPhase::Sync);
    assert_eq!(record.payload::<i32>(), Some(&6));
    assert_eq!(record.payload::<String>(), None);
    assert!(record.error().is_none());
    assert_eq!(*count.current().unwrap(), 6);
}

#[test]
fn body_sees_store() {
    let mut cr = CallRecorder::new();
    let r = Registry::new();
    let add = r
        .create_action(None, "count", "add", |v: i32, store: &StoreAccess| {
            let current = store.get_slice_state::<i32>("count").unwrap();
            call!("{} {} {}", store.store_name(), store.status(), current);
            Ok(v)
        })
        .unwrap();
    let count = r
        .create_slice(
            SliceBuilder::new("count", 1i32)
                .on(add.action_type(), |s, a| *s += a.payload::<i32>().unwrap()),
        )
        .unwrap();
    r.create_store(StoreBuilder::new().slice(&count)).unwrap();
    add.invoke(1).unwrap();
    add.invoke(1).unwrap();
    cr.verify(["default READY 1", "default READY 2"]);
}

#[test]
fn body_error_skips_dispatch() {
    let mut cr = CallRecorder::new();
    let r = Registry::new();
    let fail = r
        .create_action(None, "count", "fail", |_: (), _| Err::<i32, _>(Error::message("nope")))
        .unwrap();
    let count = r
        .create_slice(
            SliceBuilder::new("count", 0i32).on(fail.action_type(), |_, _| call!("reduce")),
        )
        .unwrap();
    let store = r.create_store(StoreBuilder::new().slice(&count)).unwrap();
    let v0 = store.state_version();
    assert_eq!(fail.invoke(()).unwrap_err().to_string(), "nope");
    assert_eq!(store.state_version(), v0);
    cr.verify(());
}

#[test]
fn uninitialized_store() {
    let mut cr = CallRecorder::new();
    let r = Registry::new();
    let a = r
        .create_action(None, "count", "add", |v: i32, _| {
            call!("body");
            Ok(v)
        })
        .unwrap();
    assert!(matches!(a.invoke(1), Err(Error::UninitializedStore(_))));
    cr.verify(());
}

#[test]
fn name_suffix() {
    let r = Registry::new();
    let a = r.create_action(None, "user", "login", |_: (), _| Ok(())).unwrap();
    let b = r
        .create_action(None, "user", "logoutAction", |_: (), _| Ok(()))
        .unwrap();
    assert_eq!(a.id().to_string(), "default.user.loginAction");
    assert_eq!(b.id().member, "logoutAction");
    assert_eq!(r.action_ids().len(), 2);
}

#[test]
fn duplicate_action() {
    let r = Registry::new();
    r.create_action(None, "user", "login", |_: (), _| Ok(())).unwrap();
    let e = r
        .create_action(None, "user", "loginAction", |_: (), _| Ok(()))
        .unwrap_err();
    assert!(matches!(e, Error::DuplicateMember(_)));
    r.create_action(Some("other"), "user", "login", |_: (), _| Ok(()))
        .unwrap();
}

#[test]
fn invalid_names() {
    let r = Registry::new();
    let e = r
        .create_action(None, STORE_SLICE, "x", |_: (), _| Ok(()))
        .unwrap_err();
    assert!(matches!(e, Error::ReservedName(_)));
    let e = r
        .create_action(None, "user", "log in", |_: (), _| Ok(()))
        .unwrap_err();
    assert!(matches!(e, Error::InvalidName { .. }));
    let e = r
        .create_action(Some("my store"), "user", "x", |_: (), _| Ok(()))
        .unwrap_err();
    assert!(matches!(e, Error::InvalidName { .. }));
}

#[test]
fn meta_debug() {
    let meta = ActionMeta {
        on_precede: Some(Ok(Rc::new(1) as Value)),
        on_rejected: Some(Err(Error::message("x"))),
        ..ActionMeta::default()
    };
    assert_eq!(
        format!("{meta:?}"),
        concat!(
            "ActionMeta { on_precede: \"ok\", on_resolved: \"none\", ",
            "on_rejected: \"err\", on_settled: \"none\", rethrow: None }"
        )
    );
}
