use std::{collections::HashSet, fmt, marker::PhantomData, rc::Rc};

use tracing::debug;

use crate::{
    id::{DEFAULT_STORE_NAME, STORE_SLICE},
    registry::SliceRecord,
    selector::AsSelectorRef,
    store::{ErasedReducer, StoreBinding},
    validate, ActionRecord, ActionType, Error, Registry, SelectorRef, StoreState, Value,
};


type Reducer<S> = Rc<dyn Fn(&mut S, &ActionRecord) -> Result<(), Error>>;

/// Action type to reducer mapping of one slice.
pub struct ReducerTable<S> {
    entries: Vec<(ActionType, Reducer<S>)>,
}

impl<S: 'static> ReducerTable<S> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds a reducer that mutates a clone of the slice state.
    pub fn on(self, action_type: &ActionType, f: impl Fn(&mut S, &ActionRecord) + 'static) -> Self {
        self.try_on(action_type, move |s, a| {
            f(s, a);
            Ok(())
        })
    }

    /// Adds a fallible reducer. On error the commit is discarded.
    pub fn try_on(
        mut self,
        action_type: &ActionType,
        f: impl Fn(&mut S, &ActionRecord) -> Result<(), Error> + 'static,
    ) -> Self {
        self.entries.push((action_type.clone(), Rc::new(f)));
        self
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
impl<S: 'static> Default for ReducerTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn erase<S: Clone + 'static>(reducer: Reducer<S>) -> ErasedReducer {
    Rc::new(move |value: &Value, record: &ActionRecord| {
        let Some(state) = value.downcast_ref::<S>() else {
            panic!(
                "slice `{}` is not `{}`",
                record.slice_name(),
                std::any::type_name::<S>()
            );
        };
        let mut next = state.clone();
        reducer(&mut next, record)?;
        Ok(Rc::new(next) as Value)
    })
}

/// Everything `create_slice` needs for one slice.
pub struct SliceBuilder<S> {
    name: String,
    store: Option<String>,
    initial: S,
    reducers: ReducerTable<S>,
    selectors: Vec<SelectorRef>,
    no_handler: Vec<ActionType>,
}

impl<S: Clone + 'static> SliceBuilder<S> {
    pub fn new(name: &str, initial: S) -> Self {
        Self {
            name: name.to_owned(),
            store: None,
            initial,
            reducers: ReducerTable::new(),
            selectors: Vec::new(),
            no_handler: Vec::new(),
        }
    }
    pub fn with_default(name: &str) -> Self
    where
        S: Default,
    {
        Self::new(name, S::default())
    }
    pub fn store(mut self, store: &str) -> Self {
        self.store = Some(store.to_owned());
        self
    }
    pub fn on(
        mut self,
        action_type: &ActionType,
        f: impl Fn(&mut S, &ActionRecord) + 'static,
    ) -> Self {
        self.reducers = self.reducers.on(action_type, f);
        self
    }
    pub fn try_on(
        mut self,
        action_type: &ActionType,
        f: impl Fn(&mut S, &ActionRecord) -> Result<(), Error> + 'static,
    ) -> Self {
        self.reducers = self.reducers.try_on(action_type, f);
        self
    }

    /// Appends every entry of `table`.
    pub fn reducers(mut self, table: ReducerTable<S>) -> Self {
        self.reducers.entries.extend(table.entries);
        self
    }

    /// Claims a selector registered against this slice or the store level.
    pub fn selector(mut self, selector: &impl AsSelectorRef) -> Self {
        self.selectors.push(selector.selector_ref());
        self
    }

    /// Exempts `action_type` from the handler coverage check.
    pub fn no_handler(mut self, action_type: &ActionType) -> Self {
        self.no_handler.push(action_type.clone());
        self
    }
}

/// A created slice.
pub struct SliceHandle<S> {
    name: Rc<str>,
    binding: StoreBinding,
    _phantom: PhantomData<fn() -> S>,
}

impl<S: 'static> SliceHandle<S> {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn store_name(&self) -> &str {
        self.binding.name()
    }

    /// This slice's state in `state`.
    ///
    /// Returns `None` if `state` was not committed by this slice's store.
    pub fn get(&self, state: &StoreState) -> Option<Rc<S>> {
        if !self.binding.get().ok()?.owns(state) {
            return None;
        }
        state.slice_rc(&self.name)
    }

    /// This slice's state in the store's current state.
    pub fn current(&self) -> Result<Rc<S>, Error> {
        let store = self.binding.get()?;
        self.get(&store.get_state()).ok_or_else(|| Error::MissingSliceState {
            store: store.name().to_owned(),
            slice: self.name.to_string(),
        })
    }
}
impl<S> Clone for SliceHandle<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            binding: self.binding.clone(),
            _phantom: PhantomData,
        }
    }
}
impl<S> fmt::Debug for SliceHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SliceHandle({}.{})", self.binding.name(), self.name)
    }
}

impl Registry {
    /// Creates a slice after checking its handlers cover exactly its actions
    /// and that it claims exactly its selectors.
    pub fn create_slice<S: Clone + 'static>(
        &self,
        builder: SliceBuilder<S>,
    ) -> Result<SliceHandle<S>, Error> {
        let store = builder.store.as_deref().unwrap_or(DEFAULT_STORE_NAME);
        let slice = builder.name.as_str();
        let mut data = self.data_mut();
        validate::open_store(&data, store)?;
        validate::open_slice(&data, store, slice)?;

        let mut handled = HashSet::new();
        for (action_type, _) in &builder.reducers.entries {
            validate::handler(&data, action_type, store, slice)?;
            if !handled.insert(action_type.clone()) {
                return Err(Error::DuplicateHandler(action_type.clone()));
            }
        }
        for action_type in &builder.no_handler {
            validate::handler(&data, action_type, store, slice)?;
        }
        for (id, entry) in data.actions_of(store) {
            if id.slice != slice {
                continue;
            }
            let covered = entry
                .types
                .iter()
                .any(|t| handled.contains(t) || builder.no_handler.contains(t));
            if !covered {
                return Err(Error::MissingHandler(id.clone()));
            }
        }

        let mut claimed = HashSet::new();
        for r in &builder.selectors {
            if r.is_import() {
                return Err(Error::ImportedSelector(r.id().clone()));
            }
            let Some(entry) = data.selectors.get(r.id()) else {
                return Err(Error::UnknownSelector(r.id().clone()));
            };
            let id = r.id();
            if id.store != store || (id.slice != slice && id.slice != STORE_SLICE) {
                return Err(Error::ForeignSelector {
                    selector: id.clone(),
                    store: store.to_owned(),
                    slice: slice.to_owned(),
                });
            }
            if let Some(owner) = &entry.claimed_by {
                return Err(Error::SelectorAlreadyClaimed {
                    selector: id.clone(),
                    slice: owner.clone(),
                });
            }
            if !claimed.insert(id.clone()) {
                return Err(Error::DuplicateSelector(id.clone()));
            }
        }
        for (id, _) in data.selectors_of(store) {
            if id.slice == slice && !claimed.contains(id) {
                return Err(Error::MissingSelector(id.clone()));
            }
        }

        for id in &claimed {
            if let Some(entry) = data.selectors.get_mut(id) {
                entry.claimed_by = Some(slice.to_owned());
            }
        }
        let record = SliceRecord {
            initial: Rc::new(builder.initial),
            reducers: builder
                .reducers
                .entries
                .into_iter()
                .map(|(t, r)| (t, erase(r)))
                .collect(),
        };
        data.slices
            .insert((store.to_owned(), slice.to_owned()), record);
        let binding = data.binding(store);
        debug!(store, slice, "create slice");
        Ok(SliceHandle {
            name: slice.into(),
            binding,
            _phantom: PhantomData,
        })
    }
}
