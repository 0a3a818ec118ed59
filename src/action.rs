use std::{any::Any, fmt, rc::Rc};

use derive_ex::Ex;
use tracing::{debug, trace};

use crate::{
    error::NameKind,
    id::{with_suffix, ActionPhase, ACTION_SUFFIX, DEFAULT_STORE_NAME},
    registry::run_resolvers,
    store::StoreBinding,
    validate, ActionType, Error, MemberId, Registry, Store, StoreState, StoreStatus,
};

pub mod async_action;

#[cfg(test)]
mod tests;

/// Type-erased, shared value: slice states, payloads and hook results.
pub type Value = Rc<dyn Any>;

/// Settlement of a hook: its result, or the error it raised.
pub type HookOutcome = Result<Value, Error>;

/// Hook outcomes and policy attached to a dispatched record.
#[derive(Clone, Default)]
pub struct ActionMeta {
    /// Outcome of `precede_with`, on a PENDING record.
    pub on_precede: Option<HookOutcome>,
    /// Outcome of `continue_with_on_resolved`, on a RESOLVED record.
    pub on_resolved: Option<HookOutcome>,
    /// Outcome of `continue_with_on_rejected`, on a REJECTED record.
    pub on_rejected: Option<HookOutcome>,
    /// Outcome of `continue_with_on_settled`, on a RESOLVED or REJECTED record.
    pub on_settled: Option<HookOutcome>,
    /// Rethrow policy in effect, on a REJECTED record.
    pub rethrow: Option<bool>,
}

impl fmt::Debug for ActionMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn state(outcome: &Option<HookOutcome>) -> &'static str {
            match outcome {
                None => "none",
                Some(Ok(_)) => "ok",
                Some(Err(_)) => "err",
            }
        }
        f.debug_struct("ActionMeta")
            .field("on_precede", &state(&self.on_precede))
            .field("on_resolved", &state(&self.on_resolved))
            .field("on_rejected", &state(&self.on_rejected))
            .field("on_settled", &state(&self.on_settled))
            .field("rethrow", &self.rethrow)
            .finish()
    }
}

/// What a dispatch delivers to a reducer: `{slice, type, payload | error}`.
#[derive(Clone)]
pub struct ActionRecord {
    slice: Rc<str>,
    action_type: ActionType,
    payload: Option<Value>,
    param: Option<Value>,
    error: Option<Error>,
    meta: ActionMeta,
}

impl ActionRecord {
    pub(crate) fn new(slice: Rc<str>, action_type: ActionType) -> Self {
        Self {
            slice,
            action_type,
            payload: None,
            param: None,
            error: None,
            meta: ActionMeta::default(),
        }
    }
    pub fn slice_name(&self) -> &str {
        &self.slice
    }
    pub fn action_type(&self) -> &ActionType {
        &self.action_type
    }
    pub fn phase(&self) -> ActionPhase {
        self.action_type.phase()
    }

    /// Payload of a sync or RESOLVED record, or the param of a PENDING record.
    pub fn payload<T: 'static>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref()
    }
    pub fn payload_rc<T: 'static>(&self) -> Option<Rc<T>> {
        self.payload.clone()?.downcast().ok()
    }

    /// Param the async action was invoked with.
    pub fn param<P: 'static>(&self) -> Option<&P> {
        self.param.as_ref()?.downcast_ref()
    }

    /// Error of a REJECTED record.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }
    pub fn meta(&self) -> &ActionMeta {
        &self.meta
    }

    pub(crate) fn set_payload(&mut self, payload: Value) {
        self.payload = Some(payload);
    }
    pub(crate) fn set_param(&mut self, param: Value) {
        self.param = Some(param);
    }
    pub(crate) fn set_error(&mut self, error: Error) {
        self.error = Some(error);
    }
    pub(crate) fn meta_mut(&mut self) -> &mut ActionMeta {
        &mut self.meta
    }
}
impl fmt::Debug for ActionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRecord")
            .field("slice", &self.slice)
            .field("action_type", &self.action_type)
            .field("error", &self.error)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Read-only store accessors handed to action bodies and hooks.
#[derive(Clone, Debug)]
pub struct StoreAccess(Store);

impl StoreAccess {
    pub(crate) fn new(store: Store) -> Self {
        Self(store)
    }
    pub fn store_name(&self) -> &str {
        self.0.name()
    }
    pub fn get_state(&self) -> StoreState {
        self.0.get_state()
    }
    pub fn get_slice_state<S: 'static>(&self, slice: &str) -> Option<Rc<S>> {
        self.0.get_slice_state(slice)
    }
    pub fn status(&self) -> StoreStatus {
        self.0.status()
    }
}

struct ActionNode<P, T> {
    id: MemberId,
    action_type: ActionType,
    slice: Rc<str>,
    binding: StoreBinding,
    f: Box<dyn Fn(P, &StoreAccess) -> Result<T, Error>>,
}

/// A registered synchronous action.
#[derive(Ex)]
#[derive_ex(Clone(bound()))]
pub struct Action<P, T>(Rc<ActionNode<P, T>>);

impl<P: 'static, T: 'static> Action<P, T> {
    pub fn id(&self) -> &MemberId {
        &self.0.id
    }
    pub fn action_type(&self) -> &ActionType {
        &self.0.action_type
    }

    /// Runs the action body and dispatches its result.
    ///
    /// Returns the dispatched record. Fails before running the body if the
    /// store is not created or is reducing or selecting.
    pub fn invoke(&self, params: P) -> Result<ActionRecord, Error> {
        let store = self.0.binding.get()?;
        store.check_invocable()?;
        let access = StoreAccess::new(store.clone());
        let payload = (self.0.f)(params, &access)?;
        let mut record = ActionRecord::new(self.0.slice.clone(), self.0.action_type.clone());
        record.set_payload(Rc::new(payload));
        trace!(action = %self.0.id, "invoke");
        store.dispatch(&record)?;
        Ok(record)
    }
}
impl<P, T> fmt::Debug for Action<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Action").field(&self.0.id).finish()
    }
}

impl Registry {
    /// Registers a synchronous action in `store.slice`.
    ///
    /// `name` is suffixed with `Action` unless it already ends with it.
    pub fn create_action<P: 'static, T: 'static>(
        &self,
        store: Option<&str>,
        slice: &str,
        name: &str,
        f: impl Fn(P, &StoreAccess) -> Result<T, Error> + 'static,
    ) -> Result<Action<P, T>, Error> {
        let store = store.unwrap_or(DEFAULT_STORE_NAME);
        let id = MemberId::new(store, slice, &with_suffix(name, ACTION_SUFFIX));
        let (action, handle, resolvers) = {
            let mut data = self.data_mut();
            validate::open_store(&data, store)?;
            validate::open_slice(&data, store, slice)?;
            validate::new_member(&data, NameKind::Action, &id)?;
            let action_type = ActionType::new(Rc::new(id.clone()), ActionPhase::Sync);
            let action = Action(Rc::new(ActionNode {
                id: id.clone(),
                action_type: action_type.clone(),
                slice: slice.into(),
                binding: data.binding(store),
                f: Box::new(f),
            }));
            let handle: Value = Rc::new(action.clone());
            let resolvers = data.insert_action(id.clone(), vec![action_type], handle.clone());
            (action, handle, resolvers)
        };
        run_resolvers(resolvers, &handle);
        debug!(action = %id, "create action");
        Ok(action)
    }
}
