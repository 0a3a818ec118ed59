//! Forward declarations of actions and selectors.
//!
//! An import is created by name before its target exists and resolves once the
//! target registers. Until then every use fails with
//! [`Error::UnresolvedImport`].

use std::{any::Any, cell::RefCell, fmt, rc::Rc};

use derive_ex::Ex;
use futures::future::LocalBoxFuture;
use tracing::debug;

use crate::{
    error::NameKind,
    id::{with_suffix, ACTION_SUFFIX, DEFAULT_STORE_NAME, SELECTOR_SUFFIX, STORE_SLICE},
    registry::Resolver,
    selector::{AsSelectorRef, Params, SelectorRef, SelectorSource},
    validate, Action, ActionRecord, ActionType, AsyncAction, AsyncActionTypes, Error, MemberId,
    Registry, Selector, StoreState,
};


enum ImportState<H> {
    Pending,
    Resolved(H),
    Mismatch,
}

/// Placeholder for a member registered later.
#[derive(Ex)]
#[derive_ex(Clone(bound()))]
pub struct Import<H> {
    id: Rc<MemberId>,
    state: Rc<RefCell<ImportState<H>>>,
}

pub type ActionImport<P, T> = Import<Action<P, T>>;
pub type AsyncActionImport<P, T> = Import<AsyncAction<P, T>>;
pub type SelectorImport<P, R> = Import<Selector<P, R>>;

impl<H: Clone + 'static> Import<H> {
    pub fn id(&self) -> &MemberId {
        &self.id
    }
    pub fn is_resolved(&self) -> bool {
        matches!(&*self.state.borrow(), ImportState::Resolved(_))
    }

    /// The target, if it has registered with the expected types.
    pub fn get(&self) -> Result<H, Error> {
        match &*self.state.borrow() {
            ImportState::Resolved(h) => Ok(h.clone()),
            ImportState::Pending => Err(Error::UnresolvedImport((*self.id).clone())),
            ImportState::Mismatch => Err(Error::ImportTypeMismatch((*self.id).clone())),
        }
    }
}
impl<H> fmt::Debug for Import<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.borrow() {
            ImportState::Pending => "pending",
            ImportState::Resolved(_) => "resolved",
            ImportState::Mismatch => "mismatch",
        };
        write!(f, "Import({}, {state})", self.id)
    }
}

impl<P: 'static, T: 'static> ActionImport<P, T> {
    pub fn invoke(&self, params: P) -> Result<ActionRecord, Error> {
        self.get()?.invoke(params)
    }
    pub fn action_type(&self) -> Result<ActionType, Error> {
        Ok(self.get()?.action_type().clone())
    }
}

impl<P: Clone + 'static, T: 'static> AsyncActionImport<P, T> {
    pub fn invoke(
        &self,
        params: P,
    ) -> Result<LocalBoxFuture<'static, Result<ActionRecord, Error>>, Error> {
        self.get()?.invoke(params)
    }
    pub fn action_types(&self) -> Result<AsyncActionTypes, Error> {
        Ok(self.get()?.action_types().clone())
    }
}

impl<P: Params, R: PartialEq + 'static> SelectorImport<P, R> {
    pub fn select(&self, state: &StoreState, params: P) -> Result<Rc<R>, Error> {
        self.get()?.select(state, params)
    }
    pub fn get_value(&self, params: P) -> Result<Rc<R>, Error> {
        self.get()?.get(params)
    }
}
impl<P: 'static, R: 'static> AsSelectorRef for SelectorImport<P, R> {
    fn selector_ref(&self) -> SelectorRef {
        SelectorRef::new((*self.id).clone(), true)
    }
}
impl<P: Params, R: PartialEq + 'static> SelectorSource<P, R> for SelectorImport<P, R> {
    fn resolve(&self) -> Result<Selector<P, R>, Error> {
        self.get()
    }
}

impl Registry {
    pub fn import_action<P: 'static, T: 'static>(
        &self,
        store: Option<&str>,
        slice: &str,
        name: &str,
    ) -> Result<ActionImport<P, T>, Error> {
        let id = member_id(store, Some(slice), name, NameKind::Action)?;
        Ok(self.import(id))
    }
    pub fn import_async_action<P: 'static, T: 'static>(
        &self,
        store: Option<&str>,
        slice: &str,
        name: &str,
    ) -> Result<AsyncActionImport<P, T>, Error> {
        let id = member_id(store, Some(slice), name, NameKind::Action)?;
        Ok(self.import(id))
    }

    /// Imports a selector. `slice` defaults to the store level.
    pub fn import_selector<P: 'static, R: 'static>(
        &self,
        store: Option<&str>,
        slice: Option<&str>,
        name: &str,
    ) -> Result<SelectorImport<P, R>, Error> {
        let id = member_id(store, slice, name, NameKind::Selector)?;
        Ok(self.import(id))
    }

    fn import<H: Clone + 'static>(&self, id: MemberId) -> Import<H> {
        let import = Import {
            id: Rc::new(id.clone()),
            state: Rc::new(RefCell::new(ImportState::Pending)),
        };
        let state = import.state.clone();
        let target = import.id.clone();
        let resolve: Resolver = Box::new(move |handle: &dyn Any| {
            let next = match handle.downcast_ref::<H>() {
                Some(h) => ImportState::Resolved(h.clone()),
                None => ImportState::Mismatch,
            };
            *state.borrow_mut() = next;
            debug!(import = %target, "resolve import");
        });
        let mut data = self.data_mut();
        match data.handle(&id) {
            Some(handle) => {
                drop(data);
                resolve(&*handle);
            }
            None => data.imports.entry(id).or_default().push(resolve),
        }
        import
    }
}

fn member_id(
    store: Option<&str>,
    slice: Option<&str>,
    name: &str,
    kind: NameKind,
) -> Result<MemberId, Error> {
    let store = store.unwrap_or(DEFAULT_STORE_NAME);
    let slice = slice.unwrap_or(STORE_SLICE);
    validate::name(NameKind::Store, store)?;
    if slice != STORE_SLICE {
        validate::name(NameKind::Slice, slice)?;
    }
    let suffix = match kind {
        NameKind::Selector => SELECTOR_SUFFIX,
        _ => ACTION_SUFFIX,
    };
    let member = with_suffix(name, suffix);
    validate::name(kind, &member)?;
    Ok(MemberId::new(store, slice, &member))
}
