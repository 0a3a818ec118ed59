use std::{fmt, future::Future, rc::Rc};

use derive_ex::Ex;
use futures::future::{FutureExt, LocalBoxFuture};
use tracing::{debug, trace, warn};

use crate::{
    error::NameKind,
    id::{with_suffix, ACTION_SUFFIX, DEFAULT_STORE_NAME},
    registry::run_resolvers,
    store::StoreBinding,
    validate, ActionRecord, AsyncActionTypes, Error, HookOutcome, MemberId, Registry, Store,
    StoreAccess, Value,
};


type BodyFn<P, T> = Box<dyn Fn(P, StoreAccess) -> LocalBoxFuture<'static, Result<T, Error>>>;
type PrecedeFn<P> = Rc<dyn Fn(&P, &StoreAccess) -> HookOutcome>;
type ContinueFn = Rc<dyn Fn(ActionRecord, StoreAccess) -> LocalBoxFuture<'static, HookOutcome>>;

/// Rethrow policy and lifecycle hooks of an asynchronous action.
#[derive(Ex)]
#[derive_ex(Clone(bound()), Default)]
#[default(Self::new())]
pub struct AsyncActionOptions<P> {
    rethrow: bool,
    precede_with: Option<PrecedeFn<P>>,
    on_resolved: Option<ContinueFn>,
    on_rejected: Option<ContinueFn>,
    on_settled: Option<ContinueFn>,
}

impl<P> AsyncActionOptions<P> {
    pub fn new() -> Self {
        Self {
            rethrow: true,
            precede_with: None,
            on_resolved: None,
            on_rejected: None,
            on_settled: None,
        }
    }
}

impl<P: 'static> AsyncActionOptions<P> {
    /// Whether a rejection is re-raised from the caller's await point. Defaults to `true`.
    pub fn rethrow(mut self, rethrow: bool) -> Self {
        self.rethrow = rethrow;
        self
    }

    /// Runs before PENDING is dispatched; its outcome lands in `meta.on_precede`.
    pub fn precede_with<X: 'static>(
        mut self,
        f: impl Fn(&P, &StoreAccess) -> Result<X, Error> + 'static,
    ) -> Self {
        self.precede_with = Some(Rc::new(move |p, access| {
            f(p, access).map(|x| Rc::new(x) as Value)
        }));
        self
    }
    pub fn continue_with_on_resolved<X: 'static, Fut>(
        mut self,
        f: impl Fn(ActionRecord, StoreAccess) -> Fut + 'static,
    ) -> Self
    where
        Fut: Future<Output = Result<X, Error>> + 'static,
    {
        self.on_resolved = Some(continue_fn(f));
        self
    }
    pub fn continue_with_on_rejected<X: 'static, Fut>(
        mut self,
        f: impl Fn(ActionRecord, StoreAccess) -> Fut + 'static,
    ) -> Self
    where
        Fut: Future<Output = Result<X, Error>> + 'static,
    {
        self.on_rejected = Some(continue_fn(f));
        self
    }
    pub fn continue_with_on_settled<X: 'static, Fut>(
        mut self,
        f: impl Fn(ActionRecord, StoreAccess) -> Fut + 'static,
    ) -> Self
    where
        Fut: Future<Output = Result<X, Error>> + 'static,
    {
        self.on_settled = Some(continue_fn(f));
        self
    }
}
fn continue_fn<X: 'static, Fut>(
    f: impl Fn(ActionRecord, StoreAccess) -> Fut + 'static,
) -> ContinueFn
where
    Fut: Future<Output = Result<X, Error>> + 'static,
{
    Rc::new(move |record, access| {
        let fut = f(record, access);
        async move { fut.await.map(|x| Rc::new(x) as Value) }.boxed_local()
    })
}

async fn run_hook(
    hook: &Option<ContinueFn>,
    record: &ActionRecord,
    access: &StoreAccess,
) -> Option<HookOutcome> {
    match hook {
        Some(hook) => Some(hook(record.clone(), access.clone()).await),
        None => None,
    }
}

struct AsyncActionNode<P, T> {
    id: MemberId,
    types: AsyncActionTypes,
    slice: Rc<str>,
    binding: StoreBinding,
    f: BodyFn<P, T>,
    options: AsyncActionOptions<P>,
}

impl<P: 'static, T: 'static> AsyncActionNode<P, T> {
    fn record(&self, action_type: &crate::ActionType, param: &Value) -> ActionRecord {
        let mut record = ActionRecord::new(self.slice.clone(), action_type.clone());
        record.set_param(param.clone());
        record
    }

    async fn resolve(
        &self,
        store: &Store,
        access: &StoreAccess,
        param: Value,
        payload: T,
    ) -> Result<ActionRecord, Error> {
        let mut record = self.record(&self.types.resolved, &param);
        record.set_payload(Rc::new(payload));
        if let Err(e) = store.dispatch(&record) {
            return self.reject(store, access, param, e).await;
        }
        let on_resolved = run_hook(&self.options.on_resolved, &record, access).await;
        record.meta_mut().on_resolved = on_resolved;
        let on_settled = run_hook(&self.options.on_settled, &record, access).await;
        record.meta_mut().on_settled = on_settled;
        Ok(record)
    }

    async fn reject(
        &self,
        store: &Store,
        access: &StoreAccess,
        param: Value,
        error: Error,
    ) -> Result<ActionRecord, Error> {
        let mut record = self.record(&self.types.rejected, &param);
        record.set_error(error.clone());
        record.meta_mut().rethrow = Some(self.options.rethrow);
        if let Err(e) = store.dispatch(&record) {
            warn!(action = %self.id, error = %e, "rejected reducer failed");
        }
        let on_rejected = run_hook(&self.options.on_rejected, &record, access).await;
        record.meta_mut().on_rejected = on_rejected;
        let on_settled = run_hook(&self.options.on_settled, &record, access).await;
        record.meta_mut().on_settled = on_settled;
        if self.options.rethrow {
            Err(error)
        } else {
            Ok(record)
        }
    }
}

/// A registered asynchronous action with a PENDING / RESOLVED / REJECTED lifecycle.
#[derive(Ex)]
#[derive_ex(Clone(bound()))]
pub struct AsyncAction<P, T>(Rc<AsyncActionNode<P, T>>);

impl<P: Clone + 'static, T: 'static> AsyncAction<P, T> {
    pub fn id(&self) -> &MemberId {
        &self.0.id
    }
    pub fn action_types(&self) -> &AsyncActionTypes {
        &self.0.types
    }

    /// Starts the action.
    ///
    /// Guard checks, `precede_with` and the PENDING dispatch happen before this
    /// returns. The returned future runs the body, dispatches exactly one of
    /// RESOLVED or REJECTED, runs the continue hooks, and then applies the
    /// rethrow policy.
    pub fn invoke(
        &self,
        params: P,
    ) -> Result<LocalBoxFuture<'static, Result<ActionRecord, Error>>, Error> {
        let store = self.0.binding.get()?;
        store.check_invocable()?;
        let node = self.0.clone();
        let access = StoreAccess::new(store.clone());
        let param: Value = Rc::new(params.clone());

        let mut pending = node.record(&node.types.pending, &param);
        pending.set_payload(param.clone());
        if let Some(precede) = &node.options.precede_with {
            pending.meta_mut().on_precede = Some(precede(&params, &access));
        }
        trace!(action = %node.id, "invoke");
        let body = store
            .dispatch(&pending)
            .map(|_| (node.f)(params, access.clone()));

        Ok(async move {
            let outcome = match body {
                Ok(body) => body.await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(payload) => node.resolve(&store, &access, param, payload).await,
                Err(e) => node.reject(&store, &access, param, e).await,
            }
        }
        .boxed_local())
    }
}
impl<P, T> fmt::Debug for AsyncAction<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AsyncAction").field(&self.0.id).finish()
    }
}

impl Registry {
    /// Registers an asynchronous action in `store.slice`.
    pub fn create_async_action<P: Clone + 'static, T: 'static, Fut>(
        &self,
        store: Option<&str>,
        slice: &str,
        name: &str,
        f: impl Fn(P, StoreAccess) -> Fut + 'static,
        options: AsyncActionOptions<P>,
    ) -> Result<AsyncAction<P, T>, Error>
    where
        Fut: Future<Output = Result<T, Error>> + 'static,
    {
        let store = store.unwrap_or(DEFAULT_STORE_NAME);
        let id = MemberId::new(store, slice, &with_suffix(name, ACTION_SUFFIX));
        let (action, handle, resolvers) = {
            let mut data = self.data_mut();
            validate::open_store(&data, store)?;
            validate::open_slice(&data, store, slice)?;
            validate::new_member(&data, NameKind::Action, &id)?;
            let types = AsyncActionTypes::new(&id);
            let action = AsyncAction(Rc::new(AsyncActionNode {
                id: id.clone(),
                types: types.clone(),
                slice: slice.into(),
                binding: data.binding(store),
                f: Box::new(move |p, access| f(p, access).boxed_local()),
                options,
            }));
            let handle: Value = Rc::new(action.clone());
            let resolvers =
                data.insert_action(id.clone(), types.iter().cloned().collect(), handle.clone());
            (action, handle, resolvers)
        };
        run_resolvers(resolvers, &handle);
        debug!(action = %id, "create async action");
        Ok(action)
    }
}
