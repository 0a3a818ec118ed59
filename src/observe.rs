//! Observer registration for a host UI runtime.
//!
//! The host calls `subscribe` on attach, `resubscribe` when its params change,
//! and drops the returned [`Subscription`] on detach.

use std::{cell::RefCell, fmt, rc::Rc};

use crate::{
    matrix::{CacheEntry, RenderTrigger},
    selector::{Params, SelectorSource},
    Error, Selector, Store, StoreState, Subscription,
};


struct Attached<P: 'static, R: 'static> {
    entry: Rc<CacheEntry<P, R>>,
    key: usize,
}

struct ObserverNode<P: Params, R: PartialEq + 'static> {
    store: Store,
    selector: Selector<P, R>,
    params: RefCell<P>,
    trigger: Rc<RenderTrigger<Rc<R>>>,
    attached: RefCell<Option<Attached<P, R>>>,
}

impl<P: Params, R: PartialEq + 'static> ObserverNode<P, R> {
    /// Registers the trigger into the entry for the current params and returns its value.
    fn attach(&self) -> Result<Rc<R>, Error> {
        let _guard = self.store.enter_selecting()?;
        let params = self.params.borrow().clone();
        let entry = self.store.entry_or_insert(&self.selector.0, &params, false);
        let key = entry.attach(self.trigger.clone());
        *self.attached.borrow_mut() = Some(Attached {
            entry: entry.clone(),
            key,
        });
        match entry.pull(&self.store, &self.store.get_state()) {
            Ok(value) => {
                entry.mark_seen();
                Ok(value)
            }
            Err(e) => {
                self.detach_entry();
                Err(e)
            }
        }
    }
    fn detach_entry(&self) {
        let attached = self.attached.borrow_mut().take();
        if let Some(Attached { entry, key }) = attached {
            entry.detach(key);
            self.store.release_entry(&entry);
        }
    }
    fn detach(&self) {
        self.trigger.clear();
        self.detach_entry();
    }
    fn current(&self) -> Result<Rc<R>, Error> {
        let entry = self.attached.borrow().as_ref().map(|a| a.entry.clone());
        let Some(entry) = entry else {
            return self.attach();
        };
        let _guard = self.store.enter_selecting()?;
        entry.pull(&self.store, &self.store.get_state())
    }
    fn push(&self, value: Rc<R>) {
        self.trigger.enqueue(value, self.store.triggers());
        self.store.triggers().flush();
    }
}
impl<P: Params, R: PartialEq + 'static> Drop for ObserverNode<P, R> {
    fn drop(&mut self) {
        self.detach_entry();
    }
}

/// One observer of a `(selector, params)` pair.
pub struct Observation<P: Params, R: PartialEq + 'static> {
    node: Rc<ObserverNode<P, R>>,
    initial: Rc<R>,
}

impl<P: Params, R: PartialEq + 'static> Observation<P, R> {
    /// Value at the time the observation was created.
    pub fn initial_value(&self) -> Rc<R> {
        self.initial.clone()
    }
    pub fn params(&self) -> P {
        self.node.params.borrow().clone()
    }

    /// Starts delivering changed values to `on_change`.
    ///
    /// If the value already moved on since [`initial_value`](Self::initial_value),
    /// the current value is delivered before this returns.
    pub fn subscribe(&self, on_change: impl FnMut(Rc<R>) + 'static) -> Result<Subscription, Error> {
        self.node.trigger.set_callback(on_change);
        let current = match self.node.current() {
            Ok(current) => current,
            Err(e) => {
                self.node.detach();
                return Err(e);
            }
        };
        if !Rc::ptr_eq(&current, &self.initial) {
            self.node.push(current);
        }
        Ok(Subscription::from_rc_fn(self.node.clone(), |node| node.detach()))
    }

    /// Moves the observer to the entry for `params` and delivers its current value.
    pub fn resubscribe(&self, params: P) -> Result<(), Error> {
        if *self.node.params.borrow() == params {
            return Ok(());
        }
        self.node.detach_entry();
        *self.node.params.borrow_mut() = params;
        let value = self.node.attach()?;
        self.node.push(value);
        Ok(())
    }
}
impl<P: Params + fmt::Debug, R: PartialEq + 'static> fmt::Debug for Observation<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observation")
            .field("selector", self.node.selector.id())
            .field("params", &*self.node.params.borrow())
            .finish()
    }
}

/// Whole-state observer. Notified on every commit.
pub struct StateObservation {
    store: Store,
    trigger: Rc<RenderTrigger<StoreState>>,
    initial: StoreState,
}

impl StateObservation {
    pub fn initial_value(&self) -> StoreState {
        self.initial.clone()
    }
    pub fn subscribe(&self, on_change: impl FnMut(StoreState) + 'static) -> Subscription {
        self.trigger.set_callback(on_change);
        let key = self
            .store
            .state_observers()
            .borrow_mut()
            .insert(self.trigger.clone());
        let current = self.store.get_state();
        if !current.ptr_eq(&self.initial) {
            self.trigger.enqueue(current, self.store.triggers());
            self.store.triggers().flush();
        }
        let store = self.store.clone();
        let trigger = self.trigger.clone();
        Subscription::from_fn(move || {
            trigger.clear();
            store.state_observers().borrow_mut().remove(key);
        })
    }
}

impl Store {
    /// Observes `selector` with `params` against this store.
    ///
    /// The cache entry for `(selector, params)` is created (or shared) and
    /// its current value becomes the observation's initial value.
    pub fn observe_selector<P: Params, R: PartialEq + 'static>(
        &self,
        selector: &impl SelectorSource<P, R>,
        params: P,
    ) -> Result<Observation<P, R>, Error> {
        let selector = selector.resolve()?;
        let owner = selector.store()?;
        if !owner.ptr_eq(self) {
            return Err(Error::ForeignSelector {
                selector: selector.id().clone(),
                store: self.name().to_owned(),
                slice: selector.id().slice.clone(),
            });
        }
        let node = Rc::new(ObserverNode {
            store: self.clone(),
            selector,
            params: RefCell::new(params),
            trigger: RenderTrigger::new(),
            attached: RefCell::new(None),
        });
        let initial = node.attach()?;
        Ok(Observation { node, initial })
    }

    pub fn observe_state(&self) -> StateObservation {
        StateObservation {
            store: self.clone(),
            trigger: RenderTrigger::new(),
            initial: self.get_state(),
        }
    }
}
