use std::{
    any::Any,
    cell::{Ref, RefCell, RefMut},
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

use crate::{
    id::Tokens,
    store::{ErasedReducer, StoreBinding},
    ActionType, MemberId, Value,
};

/// Namespace that every store, slice, action and selector is registered into.
///
/// Registries are independent of each other: names, action types and stores
/// created through one registry are invisible to another.
/// Cloning a `Registry` yields another handle to the same namespace.
#[derive(Clone, Default)]
pub struct Registry(Rc<RefCell<RegistryData>>);

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn data(&self) -> Ref<'_, RegistryData> {
        self.0.borrow()
    }
    pub(crate) fn data_mut(&self) -> RefMut<'_, RegistryData> {
        self.0.borrow_mut()
    }

    /// Returns `true` if `create_store` already succeeded for `store`.
    pub fn is_store_created(&self, store: &str) -> bool {
        self.data().is_store_finalized(store)
    }

    /// Ids of every action registered so far, in id order.
    pub fn action_ids(&self) -> Vec<MemberId> {
        self.data().actions.keys().cloned().collect()
    }

    /// Ids of every selector registered so far, in id order.
    pub fn selector_ids(&self) -> Vec<MemberId> {
        self.data().selectors.keys().cloned().collect()
    }
}

pub(crate) type Resolver = Box<dyn FnOnce(&dyn Any)>;

pub(crate) struct ActionEntry {
    pub types: Vec<ActionType>,
    pub handle: Rc<dyn Any>,
}

pub(crate) struct SelectorEntry {
    pub claimed_by: Option<String>,
    pub handle: Rc<dyn Any>,
}

pub(crate) struct SliceRecord {
    pub initial: Value,
    pub reducers: Vec<(ActionType, ErasedReducer)>,
}

#[derive(Default)]
pub(crate) struct RegistryData {
    pub tokens: Tokens,
    pub stores: BTreeMap<String, StoreBinding>,
    pub slices: BTreeMap<(String, String), SliceRecord>,
    pub actions: BTreeMap<MemberId, ActionEntry>,
    pub selectors: BTreeMap<MemberId, SelectorEntry>,
    pub imports: HashMap<MemberId, Vec<Resolver>>,
}

impl RegistryData {
    pub fn binding(&mut self, store: &str) -> StoreBinding {
        self.stores
            .entry(store.to_owned())
            .or_insert_with(|| StoreBinding::new(store))
            .clone()
    }
    pub fn is_store_finalized(&self, store: &str) -> bool {
        self.stores.get(store).is_some_and(|b| b.is_finalized())
    }
    pub fn is_slice_finalized(&self, store: &str, slice: &str) -> bool {
        self.slices
            .contains_key(&(store.to_owned(), slice.to_owned()))
    }
    pub fn contains_member(&self, id: &MemberId) -> bool {
        self.actions.contains_key(id) || self.selectors.contains_key(id)
    }
    pub fn handle(&self, id: &MemberId) -> Option<Rc<dyn Any>> {
        if let Some(e) = self.actions.get(id) {
            return Some(e.handle.clone());
        }
        self.selectors.get(id).map(|e| e.handle.clone())
    }

    /// Registers an action and returns the import resolvers waiting for it.
    #[must_use]
    pub fn insert_action(
        &mut self,
        id: MemberId,
        types: Vec<ActionType>,
        handle: Rc<dyn Any>,
    ) -> Vec<Resolver> {
        let resolvers = self.imports.remove(&id).unwrap_or_default();
        self.actions.insert(id, ActionEntry { types, handle });
        resolvers
    }

    /// Registers a selector and returns the import resolvers waiting for it.
    #[must_use]
    pub fn insert_selector(&mut self, id: MemberId, handle: Rc<dyn Any>) -> Vec<Resolver> {
        let resolvers = self.imports.remove(&id).unwrap_or_default();
        self.selectors.insert(
            id,
            SelectorEntry {
                claimed_by: None,
                handle,
            },
        );
        resolvers
    }

    pub fn actions_of<'a>(
        &'a self,
        store: &'a str,
    ) -> impl Iterator<Item = (&'a MemberId, &'a ActionEntry)> + 'a {
        self.actions.iter().filter(move |(id, _)| id.store == store)
    }
    pub fn selectors_of<'a>(
        &'a self,
        store: &'a str,
    ) -> impl Iterator<Item = (&'a MemberId, &'a SelectorEntry)> + 'a {
        self.selectors.iter().filter(move |(id, _)| id.store == store)
    }
}

pub(crate) fn run_resolvers(resolvers: Vec<Resolver>, handle: &Rc<dyn Any>) {
    for resolve in resolvers {
        resolve(&**handle);
    }
}
