use super::*;
use assert_call::{call, CallRecorder};

#[test]
fn settle_keeps_equal_value() {
    let mut data = EntryData::<i32>::new();
    let v0 = data.settle(Rc::new(1));
    assert!(take(&mut data.changed));
    let v1 = data.settle(Rc::new(1));
    assert!(Rc::ptr_eq(&v0, &v1));
    assert!(!data.changed);
    let v2 = data.settle(Rc::new(2));
    assert_eq!(*v2, 2);
    assert!(data.changed);
}

#[test]
fn trigger_fires_latest_value() {
    let mut cr = CallRecorder::new();
    let queue = TriggerQueue::default();
    let t = RenderTrigger::<i32>::new();
    t.set_callback(|v| call!("{v}"));
    t.enqueue(1, &queue);
    t.enqueue(2, &queue);
    cr.verify(());
    queue.flush();
    cr.verify("2");
    queue.flush();
    cr.verify(());
}

#[test]
fn detached_trigger_ignores_values() {
    let mut cr = CallRecorder::new();
    let queue = TriggerQueue::default();
    let t = RenderTrigger::<i32>::new();
    t.enqueue(1, &queue);
    t.set_callback(|v| call!("{v}"));
    queue.flush();
    cr.verify(());

    t.enqueue(3, &queue);
    t.clear();
    queue.flush();
    cr.verify(());
}

#[test]
fn nested_enqueue_is_delivered_by_outer_flush() {
    let mut cr = CallRecorder::new();
    let queue = Rc::new(TriggerQueue::default());
    let t = RenderTrigger::<i32>::new();
    let queue_ = queue.clone();
    let t_ = Rc::downgrade(&t);
    t.set_callback(move |v| {
        call!("{v}");
        if v < 3 {
            if let Some(t) = t_.upgrade() {
                t.enqueue(v + 1, &queue_);
                queue_.flush();
            }
        }
    });
    t.enqueue(1, &queue);
    queue.flush();
    cr.verify(["1", "2", "3"]);
}

#[test]
fn clear_from_inside_callback() {
    let mut cr = CallRecorder::new();
    let queue = TriggerQueue::default();
    let t = RenderTrigger::<i32>::new();
    let t_ = Rc::downgrade(&t);
    t.set_callback(move |v| {
        call!("{v}");
        if let Some(t) = t_.upgrade() {
            t.clear();
        }
    });
    t.enqueue(1, &queue);
    queue.flush();
    t.enqueue(2, &queue);
    queue.flush();
    cr.verify("1");
}

#[test]
fn entry_key_distinguishes_params() {
    let id = MemberId::new("s", "@store", "xSelector");
    assert!(EntryKey::new(&id, &1) == EntryKey::new(&id, &1));
    assert!(EntryKey::new(&id, &1) != EntryKey::new(&id, &2));
    assert!(EntryKey::new(&id, &1u8) != EntryKey::new(&id, &1u16));
    let other = MemberId::new("s", "@store", "ySelector");
    assert!(EntryKey::new(&id, &()) != EntryKey::new(&other, &()));
}
