use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet, HashMap},
    rc::Rc,
};

use derive_ex::Ex;
use parse_display::Display;
use slabmap::SlabMap;
use tracing::{debug, trace, warn};

use crate::{
    id::{DEFAULT_STORE_NAME, STORE_SLICE},
    matrix::{RenderTrigger, SubscriptionMatrix, TriggerQueue},
    selector::AsSelectorRef,
    validate, ActionRecord, ActionType, Error, MemberId, Registry, SelectorRef, SliceHandle,
    StateVersion, Value,
};

#[cfg(test)]
mod tests;

/// Immutable snapshot of a store's state tree.
///
/// Cloning is cheap. A commit replaces the snapshot wholesale; slices the
/// commit did not touch keep their previous `Rc`.
#[derive(Clone)]
pub struct StoreState(Rc<StateTree>);

struct StateTree {
    /// Shared with the committing store's name; identifies the store, not just its name.
    store: Rc<str>,
    version: StateVersion,
    slices: BTreeMap<String, Value>,
}

impl StoreState {
    pub fn store_name(&self) -> &str {
        &self.0.store
    }
    pub fn version(&self) -> StateVersion {
        self.0.version
    }

    /// Returns the state of slice `name`.
    ///
    /// # Panics
    ///
    /// Panics if the store has no slice `name` or its state is not an `S`.
    pub fn slice<S: 'static>(&self, name: &str) -> &S {
        match self.try_slice(name) {
            Some(s) => s,
            None => panic!(
                "store `{}` has no slice `{name}` of type `{}`",
                self.0.store,
                std::any::type_name::<S>()
            ),
        }
    }
    pub fn try_slice<S: 'static>(&self, name: &str) -> Option<&S> {
        self.0.slices.get(name)?.downcast_ref()
    }
    pub fn slice_rc<S: 'static>(&self, name: &str) -> Option<Rc<S>> {
        self.0.slices.get(name)?.clone().downcast().ok()
    }
    pub fn slice_names(&self) -> impl Iterator<Item = &str> {
        self.0.slices.keys().map(|s| s.as_str())
    }

    /// Returns `true` if both snapshots are the same commit.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn raw_slice(&self, name: &str) -> Option<&Value> {
        self.0.slices.get(name)
    }
    fn with_slice(&self, name: &str, value: Value, version: StateVersion) -> Self {
        let mut slices = self.0.slices.clone();
        slices.insert(name.to_owned(), value);
        Self(Rc::new(StateTree {
            store: self.0.store.clone(),
            version,
            slices,
        }))
    }
}
impl PartialEq for StoreState {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}
impl std::fmt::Debug for StoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreState")
            .field("store", &self.0.store)
            .field("version", &self.0.version)
            .field("slices", &self.0.slices.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[display(style = "SNAKE_CASE")]
pub enum StoreStatus {
    Ready,
    /// A reducer is running; actions cannot be invoked.
    Reducing,
    /// A selector is running; actions and other selectors cannot be invoked.
    Selecting,
}

pub(crate) type ErasedReducer = Rc<dyn Fn(&Value, &ActionRecord) -> Result<Value, Error>>;

/// Late-bound reference from a handle to the store it belongs to.
#[derive(Clone)]
pub(crate) struct StoreBinding {
    name: Rc<str>,
    store: Rc<RefCell<Option<Store>>>,
}

impl StoreBinding {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            store: Rc::new(RefCell::new(None)),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn get(&self) -> Result<Store, Error> {
        match &*self.store.borrow() {
            Some(store) => Ok(store.clone()),
            None => Err(Error::UninitializedStore(self.name.to_string())),
        }
    }
    pub fn is_finalized(&self) -> bool {
        self.store.borrow().is_some()
    }
    fn set(&self, store: Store) {
        *self.store.borrow_mut() = Some(store);
    }
}

/// A named container of slices with its own dispatch loop and subscriptions.
#[derive(Clone)]
pub struct Store(Rc<StoreNode>);

struct StoreNode {
    name: Rc<str>,
    tokens: crate::id::Tokens,
    status: Cell<StoreStatus>,
    state: RefCell<StoreState>,
    reducers: HashMap<String, HashMap<ActionType, ErasedReducer>>,
    actions: BTreeMap<String, Vec<MemberId>>,
    selectors: BTreeMap<String, Vec<MemberId>>,
    matrix: RefCell<SubscriptionMatrix>,
    state_observers: RefCell<SlabMap<Rc<RenderTrigger<StoreState>>>>,
    triggers: TriggerQueue,
}

impl Store {
    pub fn name(&self) -> &str {
        &self.0.name
    }
    pub fn status(&self) -> StoreStatus {
        self.0.status.get()
    }
    pub fn state_version(&self) -> StateVersion {
        self.0.state.borrow().version()
    }
    pub fn get_state(&self) -> StoreState {
        self.0.state.borrow().clone()
    }
    pub fn get_slice_state<S: 'static>(&self, slice: &str) -> Option<Rc<S>> {
        self.0.state.borrow().slice_rc(slice)
    }

    /// Ids of the actions of `slice`, or of the whole store if `None`.
    pub fn get_actions(&self, slice: Option<&str>) -> Vec<MemberId> {
        collect_members(&self.0.actions, slice)
    }

    /// Ids of the selectors owned by `slice`, or of the whole store if `None`.
    ///
    /// Store-level selectors claimed by a slice are listed under that slice.
    pub fn get_selectors(&self, slice: Option<&str>) -> Vec<MemberId> {
        collect_members(&self.0.selectors, slice)
    }

    /// Number of live cache entries.
    pub fn cache_entry_count(&self) -> usize {
        self.0.matrix.borrow().len()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Returns `true` if `state` was committed by this store.
    pub fn owns(&self, state: &StoreState) -> bool {
        Rc::ptr_eq(&self.0.name, &state.0.store)
    }
    pub(crate) fn is_current(&self, state: &StoreState) -> bool {
        self.0.state.borrow().ptr_eq(state)
    }

    pub(crate) fn matrix(&self) -> &RefCell<SubscriptionMatrix> {
        &self.0.matrix
    }
    pub(crate) fn triggers(&self) -> &TriggerQueue {
        &self.0.triggers
    }
    pub(crate) fn state_observers(&self) -> &RefCell<SlabMap<Rc<RenderTrigger<StoreState>>>> {
        &self.0.state_observers
    }

    /// Fails if an action may not be invoked right now.
    pub(crate) fn check_invocable(&self) -> Result<(), Error> {
        match self.status() {
            StoreStatus::Ready => Ok(()),
            StoreStatus::Reducing => Err(Error::ReentrantFromReducer(self.name().to_owned())),
            StoreStatus::Selecting => Err(Error::ReentrantFromSelector(self.name().to_owned())),
        }
    }

    /// Enters `Selecting` until the returned guard is dropped.
    pub(crate) fn enter_selecting(&self) -> Result<StatusGuard, Error> {
        if self.status() == StoreStatus::Selecting {
            return Err(Error::ReentrantFromSelector(self.name().to_owned()));
        }
        Ok(StatusGuard::enter(self, StoreStatus::Selecting))
    }

    /// Applies `record` to its slice and commits the result.
    ///
    /// Returns `false` without touching the state if the slice has no handler
    /// for the record's type.
    pub(crate) fn dispatch(&self, record: &ActionRecord) -> Result<bool, Error> {
        self.check_invocable()?;
        let slice = record.slice_name();
        let Some(reducer) = self
            .0
            .reducers
            .get(slice)
            .and_then(|table| table.get(record.action_type()))
        else {
            trace!(store = self.name(), action_type = %record.action_type(), "no handler");
            return Ok(false);
        };
        let prev = self.get_state();
        let Some(slice_state) = prev.raw_slice(slice) else {
            return Ok(false);
        };
        let next_slice = {
            let _guard = StatusGuard::enter(self, StoreStatus::Reducing);
            reducer(slice_state, record)?
        };
        let version = StateVersion::new(&self.0.tokens);
        let next = prev.with_slice(slice, next_slice, version);
        *self.0.state.borrow_mut() = next.clone();
        trace!(store = self.name(), action_type = %record.action_type(), %version, "commit");
        self.drive_subscriptions(&next);
        Ok(true)
    }

    fn drive_subscriptions(&self, state: &StoreState) {
        let entries = self.0.matrix.borrow().observed();
        {
            let _guard = StatusGuard::enter(self, StoreStatus::Selecting);
            for entry in entries {
                if let Err(e) = entry.refresh(self, state) {
                    warn!(
                        store = self.name(),
                        selector = %entry.selector_id(),
                        error = %e,
                        "refresh failed"
                    );
                }
            }
        }
        let observers: Vec<_> = self.0.state_observers.borrow().values().cloned().collect();
        for observer in observers {
            observer.enqueue(state.clone(), &self.0.triggers);
        }
        self.0.triggers.flush();
    }
}
impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.0.name)
            .field("status", &self.status())
            .field("version", &self.state_version())
            .finish()
    }
}

fn collect_members(map: &BTreeMap<String, Vec<MemberId>>, slice: Option<&str>) -> Vec<MemberId> {
    match slice {
        Some(slice) => map.get(slice).cloned().unwrap_or_default(),
        None => map.values().flatten().cloned().collect(),
    }
}

/// Restores the previous store status on drop.
pub(crate) struct StatusGuard {
    store: Store,
    prev: StoreStatus,
}
impl StatusGuard {
    fn enter(store: &Store, status: StoreStatus) -> Self {
        let prev = store.0.status.replace(status);
        Self {
            store: store.clone(),
            prev,
        }
    }
}
impl Drop for StatusGuard {
    fn drop(&mut self) {
        self.store.0.status.set(self.prev);
    }
}

/// Slices and store-level selectors that make up a store.
#[derive(Ex)]
#[derive_ex(Default)]
#[default(Self::new())]
pub struct StoreBuilder {
    name: Option<String>,
    slices: Vec<(String, String)>,
    selectors: Vec<SelectorRef>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            slices: Vec::new(),
            selectors: Vec::new(),
        }
    }
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }
    pub fn slice<S: 'static>(mut self, slice: &SliceHandle<S>) -> Self {
        self.slices
            .push((slice.store_name().to_owned(), slice.name().to_owned()));
        self
    }
    pub fn selector(mut self, selector: &impl AsSelectorRef) -> Self {
        self.selectors.push(selector.selector_ref());
        self
    }
}

impl Registry {
    /// Finalizes a store from its slices and store-level selectors.
    ///
    /// After this succeeds, the store's actions and selectors become invocable
    /// and no further registration into the store is accepted.
    pub fn create_store(&self, builder: StoreBuilder) -> Result<Store, Error> {
        let name = builder.name.as_deref().unwrap_or(DEFAULT_STORE_NAME);
        let mut data = self.data_mut();
        validate::open_store(&data, name)?;

        let mut listed = BTreeSet::new();
        for (store, slice) in &builder.slices {
            if store != name {
                return Err(Error::ForeignSlice {
                    store: name.to_owned(),
                    slice: slice.clone(),
                });
            }
            if !listed.insert(slice.as_str()) {
                return Err(Error::DuplicateSlice(slice.clone()));
            }
        }
        for (store, slice) in data.slices.keys() {
            if store == name && !listed.contains(slice.as_str()) {
                return Err(Error::MissingSlice {
                    store: store.clone(),
                    slice: slice.clone(),
                });
            }
        }
        for (id, _) in data.actions_of(name) {
            if !listed.contains(id.slice.as_str()) {
                return Err(Error::UnknownSlice(id.clone()));
            }
        }
        for (id, _) in data.selectors_of(name) {
            if !id.is_store_level() && !listed.contains(id.slice.as_str()) {
                return Err(Error::UnknownSlice(id.clone()));
            }
        }

        let mut store_selectors = BTreeSet::new();
        for r in &builder.selectors {
            if r.is_import() {
                return Err(Error::ImportedSelector(r.id().clone()));
            }
            let Some(entry) = data.selectors.get(r.id()) else {
                return Err(Error::UnknownSelector(r.id().clone()));
            };
            if r.id().store != name || !r.id().is_store_level() {
                return Err(Error::ForeignSelector {
                    selector: r.id().clone(),
                    store: name.to_owned(),
                    slice: STORE_SLICE.to_owned(),
                });
            }
            if let Some(slice) = &entry.claimed_by {
                return Err(Error::SelectorAlreadyClaimed {
                    selector: r.id().clone(),
                    slice: slice.clone(),
                });
            }
            if !store_selectors.insert(r.id().clone()) {
                return Err(Error::DuplicateSelector(r.id().clone()));
            }
        }
        for (id, entry) in data.selectors_of(name) {
            if id.is_store_level() && entry.claimed_by.is_none() && !store_selectors.contains(id) {
                return Err(Error::MissingSelector(id.clone()));
            }
        }

        let mut slices = BTreeMap::new();
        let mut reducers = HashMap::new();
        for ((store, slice), record) in &data.slices {
            if store == name {
                slices.insert(slice.clone(), record.initial.clone());
                reducers.insert(
                    slice.clone(),
                    record.reducers.iter().cloned().collect::<HashMap<_, _>>(),
                );
            }
        }
        let mut actions = BTreeMap::<String, Vec<MemberId>>::new();
        for (id, _) in data.actions_of(name) {
            actions.entry(id.slice.clone()).or_default().push(id.clone());
        }
        let mut selectors = BTreeMap::<String, Vec<MemberId>>::new();
        for (id, entry) in data.selectors_of(name) {
            let owner = entry.claimed_by.clone().unwrap_or_else(|| id.slice.clone());
            selectors.entry(owner).or_default().push(id.clone());
        }

        let tokens = data.tokens.clone();
        let name: Rc<str> = name.into();
        let state = StoreState(Rc::new(StateTree {
            store: name.clone(),
            version: StateVersion::new(&tokens),
            slices,
        }));
        let store = Store(Rc::new(StoreNode {
            name: name.clone(),
            tokens,
            status: Cell::new(StoreStatus::Ready),
            state: RefCell::new(state),
            reducers,
            actions,
            selectors,
            matrix: RefCell::new(SubscriptionMatrix::default()),
            state_observers: RefCell::new(SlabMap::new()),
            triggers: TriggerQueue::default(),
        }));
        data.binding(&name).set(store.clone());
        debug!(store = &*name, "create store");
        Ok(store)
    }
}
