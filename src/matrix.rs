use std::{
    any::{Any, TypeId},
    cell::{Cell, RefCell},
    collections::HashMap,
    hash::{Hash, Hasher},
    mem::take,
    rc::Rc,
};

use slabmap::SlabMap;
use tracing::trace;

use crate::{
    selector::{Memo, Params, SelectorNode},
    Error, MemberId, StateVersion, Store, StoreState, Value,
};

#[cfg(test)]
mod tests;

trait DynParams {
    fn dyn_eq(&self, other: &dyn Any) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
    fn as_any(&self) -> &dyn Any;
}
impl<P: Params> DynParams for P {
    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<P>() == Some(self)
    }
    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<P>().hash(&mut state);
        self.hash(&mut state);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone)]
struct ParamsKey(Rc<dyn DynParams>);

impl PartialEq for ParamsKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(other.0.as_any())
    }
}
impl Eq for ParamsKey {}
impl Hash for ParamsKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state)
    }
}

/// Identity of one cache entry: a selector and one params tuple.
#[derive(Clone, PartialEq, Eq, Hash)]
pub(crate) struct EntryKey {
    selector: MemberId,
    params: ParamsKey,
}
impl EntryKey {
    pub fn new<P: Params>(selector: &MemberId, params: &P) -> Self {
        Self {
            selector: selector.clone(),
            params: ParamsKey(Rc::new(params.clone())),
        }
    }
}

pub(crate) trait LiveEntry {
    fn refresh(&self, store: &Store, state: &StoreState) -> Result<(), Error>;
    fn has_observers(&self) -> bool;
    fn selector_id(&self) -> &MemberId;
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

/// Live cache entries of one store.
#[derive(Default)]
pub(crate) struct SubscriptionMatrix(HashMap<EntryKey, Rc<dyn LiveEntry>>);

impl SubscriptionMatrix {
    fn get<P: Params, R: PartialEq + 'static>(
        &self,
        key: &EntryKey,
    ) -> Option<Rc<CacheEntry<P, R>>> {
        let entry = self.0.get(key)?.clone();
        match entry.into_any().downcast() {
            Ok(entry) => Some(entry),
            Err(_) => panic!("cache entry `{}` has unexpected types", key.selector),
        }
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn observed(&self) -> Vec<Rc<dyn LiveEntry>> {
        self.0
            .values()
            .filter(|e| e.has_observers())
            .cloned()
            .collect()
    }
}

impl Store {
    pub(crate) fn find_entry<P: Params, R: PartialEq + 'static>(
        &self,
        node: &Rc<SelectorNode<P, R>>,
        params: &P,
    ) -> Option<Rc<CacheEntry<P, R>>> {
        self.matrix().borrow().get(&EntryKey::new(node.id(), params))
    }

    /// Returns the entry for `(node, params)`, creating an empty one if needed.
    ///
    /// A `pin`ned entry stays alive without observers until it is cleared.
    pub(crate) fn entry_or_insert<P: Params, R: PartialEq + 'static>(
        &self,
        node: &Rc<SelectorNode<P, R>>,
        params: &P,
        pin: bool,
    ) -> Rc<CacheEntry<P, R>> {
        let key = EntryKey::new(node.id(), params);
        let mut matrix = self.matrix().borrow_mut();
        let entry = if let Some(entry) = matrix.get(&key) {
            entry
        } else {
            trace!(store = self.name(), selector = %node.id(), "create cache entry");
            let entry = Rc::new(CacheEntry {
                key: key.clone(),
                selector: node.clone(),
                params: params.clone(),
                data: RefCell::new(EntryData::new()),
                observers: RefCell::new(SlabMap::new()),
                cache_only: Cell::new(false),
            });
            matrix.0.insert(key, entry.clone());
            entry
        };
        if pin {
            entry.cache_only.set(true);
        }
        entry
    }

    /// Removes `entry` if nothing keeps it alive any more.
    pub(crate) fn release_entry<P: Params, R: PartialEq + 'static>(
        &self,
        entry: &CacheEntry<P, R>,
    ) {
        if entry.is_unused() {
            trace!(store = self.name(), selector = %entry.key.selector, "remove cache entry");
            self.matrix().borrow_mut().0.remove(&entry.key);
        }
    }

    pub(crate) fn clear_entry<P: Params, R: PartialEq + 'static>(
        &self,
        node: &Rc<SelectorNode<P, R>>,
        params: &P,
    ) {
        if let Some(entry) = self.find_entry(node, params) {
            entry.cache_only.set(false);
            entry.reset_memo();
            self.release_entry(&entry);
        }
    }
}

/// Shared, recomputed-on-demand record for one `(selector, params)` pair.
pub(crate) struct CacheEntry<P: 'static, R: 'static> {
    key: EntryKey,
    selector: Rc<SelectorNode<P, R>>,
    params: P,
    data: RefCell<EntryData<R>>,
    observers: RefCell<SlabMap<Rc<RenderTrigger<Rc<R>>>>>,
    cache_only: Cell<bool>,
}

pub(crate) struct EntryData<R> {
    pub last_args: Option<Vec<Value>>,
    pub last_selected: Option<Rc<R>>,
    pub last_state_version: Option<StateVersion>,
    pub changed: bool,
}
impl<R: PartialEq> EntryData<R> {
    fn new() -> Self {
        Self {
            last_args: None,
            last_selected: None,
            last_state_version: None,
            changed: false,
        }
    }

    /// Records a freshly computed value.
    ///
    /// An equal value keeps the previous `Rc` so identity stays stable.
    pub fn settle(&mut self, value: Rc<R>) -> Rc<R> {
        if let Some(last) = &self.last_selected {
            if Rc::ptr_eq(last, &value) || **last == *value {
                return last.clone();
            }
        }
        self.last_selected = Some(value.clone());
        self.changed = true;
        value
    }
}

impl<P: Params, R: PartialEq + 'static> CacheEntry<P, R> {
    /// Returns the value for `state`, recomputing at most once per state version.
    pub fn pull(&self, store: &Store, state: &StoreState) -> Result<Rc<R>, Error> {
        let Ok(mut data) = self.data.try_borrow_mut() else {
            return Err(Error::CyclicSelector(self.key.selector.clone()));
        };
        if data.last_state_version == Some(state.version()) {
            if let Some(value) = &data.last_selected {
                return Ok(value.clone());
            }
        }
        trace!(selector = %self.key.selector, version = %state.version(), "recompute");
        let value = self.selector.compute(store, state, &self.params, Memo::Settle(&mut *data))?;
        data.last_state_version = Some(state.version());
        Ok(value)
    }

    /// Evaluates against a snapshot other than the current one without updating the entry.
    pub fn peek(&self, store: &Store, state: &StoreState) -> Result<Rc<R>, Error> {
        let Ok(data) = self.data.try_borrow() else {
            return Err(Error::CyclicSelector(self.key.selector.clone()));
        };
        self.selector.compute(store, state, &self.params, Memo::Peek(&*data))
    }

    pub fn attach(&self, trigger: Rc<RenderTrigger<Rc<R>>>) -> usize {
        self.observers.borrow_mut().insert(trigger)
    }

    /// Forgets a change that was already delivered as an initial value.
    pub fn mark_seen(&self) {
        self.data.borrow_mut().changed = false;
    }
    pub fn detach(&self, key: usize) {
        self.observers.borrow_mut().remove(key);
    }
    pub fn observer_count(&self) -> usize {
        self.observers.borrow().len()
    }
    fn is_unused(&self) -> bool {
        self.observers.borrow().is_empty() && !self.cache_only.get()
    }
    fn reset_memo(&self) {
        let mut data = self.data.borrow_mut();
        data.last_args = None;
        data.last_state_version = None;
    }
}

impl<P: Params, R: PartialEq + 'static> LiveEntry for CacheEntry<P, R> {
    fn refresh(&self, store: &Store, state: &StoreState) -> Result<(), Error> {
        if !self.has_observers() {
            return Ok(());
        }
        let value = self.pull(store, state)?;
        if take(&mut self.data.borrow_mut().changed) {
            let observers: Vec<_> = self.observers.borrow().values().cloned().collect();
            for trigger in observers {
                trigger.enqueue(value.clone(), store.triggers());
            }
        }
        Ok(())
    }
    fn has_observers(&self) -> bool {
        !self.observers.borrow().is_empty()
    }
    fn selector_id(&self) -> &MemberId {
        &self.key.selector
    }
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

pub(crate) trait Trigger {
    /// Delivers the pending value. Returns `false` if the observer is busy.
    fn fire(&self) -> bool;
}

/// Pending-value slot plus the observer's callback.
pub(crate) struct RenderTrigger<T> {
    pending: RefCell<Option<T>>,
    callback: RefCell<Option<Box<dyn FnMut(T)>>>,
    detached: Cell<bool>,
}

impl<T: 'static> RenderTrigger<T> {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            pending: RefCell::new(None),
            callback: RefCell::new(None),
            detached: Cell::new(true),
        })
    }
    pub fn set_callback(&self, f: impl FnMut(T) + 'static) {
        *self.callback.borrow_mut() = Some(Box::new(f));
        self.detached.set(false);
    }
    pub fn clear(&self) {
        self.detached.set(true);
        self.pending.borrow_mut().take();
        if let Ok(mut callback) = self.callback.try_borrow_mut() {
            callback.take();
        }
    }
    pub fn enqueue(self: &Rc<Self>, value: T, queue: &TriggerQueue) {
        if self.detached.get() {
            return;
        }
        if self.pending.replace(Some(value)).is_none() {
            queue.push(self.clone());
        }
    }
}

impl<T: 'static> Trigger for RenderTrigger<T> {
    fn fire(&self) -> bool {
        let Ok(mut callback) = self.callback.try_borrow_mut() else {
            return false;
        };
        if self.detached.get() {
            callback.take();
            return true;
        }
        let Some(value) = self.pending.borrow_mut().take() else {
            return true;
        };
        if let Some(f) = &mut *callback {
            f(value);
        }
        if self.detached.get() {
            callback.take();
        }
        true
    }
}

/// Render triggers waiting to be delivered after a commit.
#[derive(Default)]
pub(crate) struct TriggerQueue(RefCell<Vec<Rc<dyn Trigger>>>);

impl TriggerQueue {
    fn push(&self, trigger: Rc<dyn Trigger>) {
        self.0.borrow_mut().push(trigger);
    }

    /// Fires queued triggers until the queue is empty.
    ///
    /// Triggers that are busy (a nested commit from inside their own callback)
    /// are left queued for the outer flush.
    pub fn flush(&self) {
        let mut deferred = Vec::new();
        loop {
            let batch = take(&mut *self.0.borrow_mut());
            if batch.is_empty() {
                break;
            }
            for trigger in batch {
                if !trigger.fire() {
                    deferred.push(trigger);
                }
            }
        }
        self.0.borrow_mut().extend(deferred);
    }
}
