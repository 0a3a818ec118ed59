use std::{
    any::TypeId,
    cell::Cell,
    fmt,
    hash::Hash,
    marker::PhantomData,
    rc::Rc,
};

use derive_ex::Ex;
use tracing::debug;

use crate::{
    error::NameKind,
    id::{with_suffix, DEFAULT_STORE_NAME, SELECTOR_SUFFIX, STORE_SLICE},
    matrix::EntryData,
    registry::run_resolvers,
    store::StoreBinding,
    validate, Error, MemberId, Registry, Store, StoreState, StoreStatus, Value,
};


/// Call-time parameters of a selector.
///
/// `()` means "no params". Any other type makes the selector parameterized.
pub trait Params: Clone + Eq + Hash + 'static {}
impl<T: Clone + Eq + Hash + 'static> Params for T {}

fn is_parameterized<P: 'static>() -> bool {
    TypeId::of::<P>() != TypeId::of::<()>()
}

#[derive(Clone, Debug, Ex)]
#[derive_ex(Default)]
#[default(Self::new())]
pub struct SelectorOptions {
    /// Skip the combining stage when every input equals the previous one.
    pub memo_on_args: bool,
    /// Retain the result in a store-wide cache entry between direct calls.
    pub keep_memo: bool,
    /// Label of the "with params" call group. Required for parameterized selectors.
    pub params_signature: Option<String>,
}

impl SelectorOptions {
    pub fn new() -> Self {
        Self {
            memo_on_args: false,
            keep_memo: false,
            params_signature: None,
        }
    }
    pub fn memo_on_args(mut self, value: bool) -> Self {
        self.memo_on_args = value;
        self
    }
    pub fn keep_memo(mut self, value: bool) -> Self {
        self.keep_memo = value;
        self
    }
    pub fn params_signature(mut self, signature: &str) -> Self {
        self.params_signature = Some(signature.to_owned());
        self
    }
}

/// Accessors passed to every stage function.
pub struct SelectorContext<'a, P> {
    params: &'a P,
    store: &'a Store,
}

impl<'a, P> SelectorContext<'a, P> {
    pub fn params(&self) -> &'a P {
        self.params
    }
    pub fn store_name(&self) -> &'a str {
        self.store.name()
    }
    pub fn status(&self) -> StoreStatus {
        self.store.status()
    }
}

type StageFn<P, T> = Rc<dyn Fn(&StoreState, &SelectorContext<'_, P>) -> T>;
type UpstreamFn<P> = Rc<dyn Fn(&Store, &StoreState, &P) -> Result<Value, Error>>;
type CombineFn<P, R> = Rc<dyn Fn(&[Value], &SelectorContext<'_, P>) -> R>;

/// One non-final stage of a pipeline.
enum Stage<P> {
    Func {
        f: StageFn<P, Value>,
        eq: fn(&Value, &Value) -> bool,
    },
    Selector {
        id: MemberId,
        eval: UpstreamFn<P>,
        eq: fn(&Value, &Value) -> bool,
    },
}

impl<P: Params> Stage<P> {
    fn func<T: PartialEq + 'static>(
        f: impl Fn(&StoreState, &SelectorContext<'_, P>) -> T + 'static,
    ) -> Self {
        Stage::Func {
            f: Rc::new(move |state, cx| Rc::new(f(state, cx)) as Value),
            eq: eq_value::<T>,
        }
    }
    fn selector<Q: Params, T: PartialEq + 'static>(
        upstream: impl SelectorSource<Q, T> + 'static,
        map: impl Fn(&P) -> Q + 'static,
    ) -> Self {
        let id = upstream.selector_ref().id;
        Stage::Selector {
            id,
            eval: Rc::new(move |store, state, params| {
                let upstream = upstream.resolve()?;
                let value = upstream.0.evaluate_shared(store, state, &map(params))?;
                Ok(value as Value)
            }),
            eq: eq_value::<T>,
        }
    }
    fn eval(
        &self,
        store: &Store,
        state: &StoreState,
        cx: &SelectorContext<'_, P>,
    ) -> Result<Value, Error> {
        match self {
            Stage::Func { f, .. } => Ok(f(state, cx)),
            Stage::Selector { eval, .. } => eval(store, state, cx.params),
        }
    }
    fn is_same(&self, a: &Value, b: &Value) -> bool {
        match self {
            Stage::Func { eq, .. } | Stage::Selector { eq, .. } => eq(a, b),
        }
    }
}

fn eq_value<T: PartialEq + 'static>(a: &Value, b: &Value) -> bool {
    Rc::ptr_eq(a, b) || a.downcast_ref::<T>() == b.downcast_ref::<T>()
}

fn arg<T: 'static>(value: &Value) -> &T {
    match value.downcast_ref() {
        Some(value) => value,
        None => panic!("stage output is not `{}`", std::any::type_name::<T>()),
    }
}

enum Body<P, R> {
    Single(StageFn<P, R>),
    Pipeline {
        stages: Vec<Stage<P>>,
        combine: CombineFn<P, R>,
    },
}

pub(crate) struct SelectorNode<P, R> {
    id: MemberId,
    binding: StoreBinding,
    options: SelectorOptions,
    body: Body<P, R>,
    computing: Cell<bool>,
}

impl<P: Params, R: PartialEq + 'static> SelectorNode<P, R> {
    pub fn id(&self) -> &MemberId {
        &self.id
    }

    /// Runs the stages against `state`.
    ///
    /// With `memo_on_args`, the combining stage is skipped when every input
    /// equals the one recorded in `memo`.
    pub fn compute(
        &self,
        store: &Store,
        state: &StoreState,
        params: &P,
        memo: Memo<'_, R>,
    ) -> Result<Rc<R>, Error> {
        if self.computing.replace(true) {
            return Err(Error::CyclicSelector(self.id.clone()));
        }
        let _reset = ResetOnDrop(&self.computing);
        let cx = SelectorContext { params, store };
        match &self.body {
            Body::Single(f) => {
                let value = Rc::new(f(state, &cx));
                Ok(match memo {
                    Memo::Settle(data) => data.settle(value),
                    Memo::None | Memo::Peek(_) => value,
                })
            }
            Body::Pipeline { stages, combine } => {
                let args = stages
                    .iter()
                    .map(|stage| stage.eval(store, state, &cx))
                    .collect::<Result<Vec<_>, _>>()?;
                if self.options.memo_on_args {
                    let last = match &memo {
                        Memo::None => None,
                        Memo::Peek(data) => reuse(stages, data, &args),
                        Memo::Settle(data) => reuse(stages, data, &args),
                    };
                    if let Some(last) = last {
                        return Ok(last);
                    }
                }
                let value = Rc::new(combine(&args, &cx));
                match memo {
                    Memo::Settle(data) => {
                        if self.options.memo_on_args {
                            data.last_args = Some(args);
                        }
                        Ok(data.settle(value))
                    }
                    Memo::None | Memo::Peek(_) => Ok(value),
                }
            }
        }
    }

    /// Evaluates through the store's cache.
    ///
    /// Only the current commit writes into the cache. An older snapshot of
    /// the same store may still reuse the cached result when its inputs match.
    fn evaluate_shared(
        self: &Rc<Self>,
        store: &Store,
        state: &StoreState,
        params: &P,
    ) -> Result<Rc<R>, Error> {
        if !store.owns(state) || store.name() != self.id.store {
            return Err(Error::ForeignState {
                store: self.id.store.clone(),
                state: state.store_name().to_owned(),
            });
        }
        if store.is_current(state) {
            if self.options.keep_memo {
                return store.entry_or_insert(self, params, true).pull(store, state);
            }
            if let Some(entry) = store.find_entry(self, params) {
                return entry.pull(store, state);
            }
        } else if self.options.memo_on_args {
            if let Some(entry) = store.find_entry(self, params) {
                return entry.peek(store, state);
            }
        }
        self.compute(store, state, params, Memo::None)
    }
}

/// How [`SelectorNode::compute`] uses a cache entry.
pub(crate) enum Memo<'a, R> {
    None,
    /// Reuse the recorded result if the inputs match, but record nothing.
    Peek(&'a EntryData<R>),
    /// Record the result and the inputs it was computed from.
    Settle(&'a mut EntryData<R>),
}

fn reuse<P: Params, R>(stages: &[Stage<P>], data: &EntryData<R>, args: &[Value]) -> Option<Rc<R>> {
    let (Some(last_args), Some(last)) = (&data.last_args, &data.last_selected) else {
        return None;
    };
    let same = last_args.len() == args.len()
        && stages
            .iter()
            .zip(last_args.iter().zip(args))
            .all(|(stage, (a, b))| stage.is_same(a, b));
    same.then(|| last.clone())
}

struct ResetOnDrop<'a>(&'a Cell<bool>);
impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// A registered selector.
#[derive(Ex)]
#[derive_ex(Clone(bound()))]
pub struct Selector<P, R>(pub(crate) Rc<SelectorNode<P, R>>);

impl<P: Params, R: PartialEq + 'static> Selector<P, R> {
    pub fn id(&self) -> &MemberId {
        &self.0.id
    }
    pub fn options(&self) -> &SelectorOptions {
        &self.0.options
    }

    /// Evaluates the selector against `state`.
    ///
    /// Fails if the store is not created yet, if `state` belongs to another
    /// store, or if called from inside another selector's stage.
    pub fn select(&self, state: &StoreState, params: P) -> Result<Rc<R>, Error> {
        let store = self.0.binding.get()?;
        let _guard = store.enter_selecting()?;
        self.0.evaluate_shared(&store, state, &params)
    }

    /// Evaluates the selector against the store's current state.
    pub fn get(&self, params: P) -> Result<Rc<R>, Error> {
        let store = self.0.binding.get()?;
        self.select(&store.get_state(), params)
    }

    /// Drops the cached value for `params`.
    pub fn clear_cache(&self, params: P) -> Result<(), Error> {
        let store = self.0.binding.get()?;
        store.clear_entry(&self.0, &params);
        Ok(())
    }

    pub(crate) fn store(&self) -> Result<Store, Error> {
        self.0.binding.get()
    }
}
impl<P: 'static, R: 'static> fmt::Debug for Selector<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Selector");
        d.field("id", &self.0.id);
        if let Some(signature) = &self.0.options.params_signature {
            d.field("params_signature", signature);
        }
        d.finish()
    }
}

/// Identity of a selector handle as accepted by slice and store registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectorRef {
    id: MemberId,
    is_import: bool,
}
impl SelectorRef {
    pub(crate) fn new(id: MemberId, is_import: bool) -> Self {
        Self { id, is_import }
    }
    pub fn id(&self) -> &MemberId {
        &self.id
    }
    pub fn is_import(&self) -> bool {
        self.is_import
    }
}

pub trait AsSelectorRef {
    fn selector_ref(&self) -> SelectorRef;
}
impl AsSelectorRef for SelectorRef {
    fn selector_ref(&self) -> SelectorRef {
        self.clone()
    }
}
impl<P: 'static, R: 'static> AsSelectorRef for Selector<P, R> {
    fn selector_ref(&self) -> SelectorRef {
        SelectorRef::new(self.0.id.clone(), false)
    }
}

/// Anything that can stand in for a `Selector<P, R>`: the selector itself or an import of it.
pub trait SelectorSource<P: Params, R: PartialEq + 'static>: AsSelectorRef {
    fn resolve(&self) -> Result<Selector<P, R>, Error>;
}
impl<P: Params, R: PartialEq + 'static> SelectorSource<P, R> for Selector<P, R> {
    fn resolve(&self) -> Result<Selector<P, R>, Error> {
        Ok(self.clone())
    }
}

/// Builds a selector definition stage by stage.
///
/// `Args` is the tuple of input types collected so far; it fixes the
/// signature `combine` accepts.
pub struct SelectorBuilder<P, Args = ()> {
    name: String,
    store: Option<String>,
    slice: Option<String>,
    options: SelectorOptions,
    stages: Vec<Stage<P>>,
    _args: PhantomData<fn() -> Args>,
}

impl<P: Params> SelectorBuilder<P> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            store: None,
            slice: None,
            options: SelectorOptions::new(),
            stages: Vec::new(),
            _args: PhantomData,
        }
    }

    /// Finishes a single-stage selector.
    pub fn build<R: PartialEq + 'static>(
        self,
        f: impl Fn(&StoreState, &SelectorContext<'_, P>) -> R + 'static,
    ) -> SelectorDef<P, R> {
        self.finish(Body::Single(Rc::new(f)))
    }
}

impl<P: Params, Args> SelectorBuilder<P, Args> {
    pub fn store(mut self, store: &str) -> Self {
        self.store = Some(store.to_owned());
        self
    }
    pub fn slice(mut self, slice: &str) -> Self {
        self.slice = Some(slice.to_owned());
        self
    }
    pub fn options(mut self, options: SelectorOptions) -> Self {
        self.options = options;
        self
    }
    pub fn memo_on_args(mut self, value: bool) -> Self {
        self.options.memo_on_args = value;
        self
    }
    pub fn keep_memo(mut self, value: bool) -> Self {
        self.options.keep_memo = value;
        self
    }
    pub fn params_signature(mut self, signature: &str) -> Self {
        self.options.params_signature = Some(signature.to_owned());
        self
    }

    fn push<Next>(mut self, stage: Stage<P>) -> SelectorBuilder<P, Next> {
        self.stages.push(stage);
        SelectorBuilder {
            name: self.name,
            store: self.store,
            slice: self.slice,
            options: self.options,
            stages: self.stages,
            _args: PhantomData,
        }
    }
    fn finish<R>(self, body: Body<P, R>) -> SelectorDef<P, R> {
        let body = match body {
            Body::Pipeline { combine, .. } => Body::Pipeline {
                stages: self.stages,
                combine,
            },
            body => body,
        };
        SelectorDef {
            name: self.name,
            store: self.store,
            slice: self.slice,
            options: self.options,
            body,
        }
    }
}

macro_rules! impl_inputs {
    ($($a:ident)*; $next:ident) => {
        impl<P: Params, $($a: 'static,)*> SelectorBuilder<P, ($($a,)*)> {
            /// Adds a plain function stage.
            pub fn input<$next: PartialEq + 'static>(
                self,
                f: impl Fn(&StoreState, &SelectorContext<'_, P>) -> $next + 'static,
            ) -> SelectorBuilder<P, ($($a,)* $next,)> {
                self.push(Stage::func(f))
            }

            /// Adds a non-parameterized upstream selector stage.
            pub fn input_selector<$next: PartialEq + 'static>(
                self,
                upstream: &(impl SelectorSource<(), $next> + Clone + 'static),
            ) -> SelectorBuilder<P, ($($a,)* $next,)> {
                self.push(Stage::selector(upstream.clone(), |_: &P| ()))
            }

            /// Adds an upstream selector stage whose params are mapped from this selector's params.
            pub fn input_selector_with<Q: Params, $next: PartialEq + 'static>(
                self,
                upstream: &(impl SelectorSource<Q, $next> + Clone + 'static),
                map: impl Fn(&P) -> Q + 'static,
            ) -> SelectorBuilder<P, ($($a,)* $next,)> {
                self.push(Stage::selector(upstream.clone(), map))
            }
        }
    };
}
impl_inputs!(; A0);
impl_inputs!(A0; A1);
impl_inputs!(A0 A1; A2);
impl_inputs!(A0 A1 A2; A3);

macro_rules! impl_combine {
    ($($a:ident $i:tt)*) => {
        impl<P: Params, $($a: 'static,)*> SelectorBuilder<P, ($($a,)*)> {
            /// Finishes the pipeline with its combining stage.
            pub fn combine<R: PartialEq + 'static>(
                self,
                f: impl Fn($(&$a,)* &SelectorContext<'_, P>) -> R + 'static,
            ) -> SelectorDef<P, R> {
                #[allow(unused_variables)]
                let combine = move |args: &[Value], cx: &SelectorContext<'_, P>| {
                    f($(arg::<$a>(&args[$i]),)* cx)
                };
                self.finish(Body::Pipeline {
                    stages: Vec::new(),
                    combine: Rc::new(combine),
                })
            }
        }
    };
}
impl_combine!();
impl_combine!(A0 0);
impl_combine!(A0 0 A1 1);
impl_combine!(A0 0 A1 1 A2 2);
impl_combine!(A0 0 A1 1 A2 2 A3 3);

/// A selector ready for [`Registry::create_selector`].
pub struct SelectorDef<P, R> {
    name: String,
    store: Option<String>,
    slice: Option<String>,
    options: SelectorOptions,
    body: Body<P, R>,
}

impl Registry {
    pub fn create_selector<P: Params, R: PartialEq + 'static>(
        &self,
        def: SelectorDef<P, R>,
    ) -> Result<Selector<P, R>, Error> {
        let store = def.store.as_deref().unwrap_or(DEFAULT_STORE_NAME);
        let slice = def.slice.as_deref().unwrap_or(STORE_SLICE);
        let id = MemberId::new(store, slice, &with_suffix(&def.name, SELECTOR_SUFFIX));
        let (selector, handle, resolvers) = {
            let mut data = self.data_mut();
            validate::open_store(&data, store)?;
            validate::open_member_slice(&data, store, slice)?;
            validate::new_member(&data, NameKind::Selector, &id)?;
            if matches!(&def.body, Body::Pipeline { stages, .. } if stages.is_empty()) {
                return Err(Error::NoStages(id));
            }
            if let Body::Pipeline { stages, .. } = &def.body {
                for stage in stages {
                    if let Stage::Selector { id: upstream, .. } = stage {
                        if upstream.store != store {
                            return Err(Error::ForeignSelector {
                                selector: upstream.clone(),
                                store: store.to_owned(),
                                slice: slice.to_owned(),
                            });
                        }
                    }
                }
            }
            if def.options.memo_on_args && !def.options.keep_memo {
                return Err(Error::MemoWithoutKeepMemo(id));
            }
            if is_parameterized::<P>() && def.options.params_signature.is_none() {
                return Err(Error::MissingParamsSignature(id));
            }
            let selector = Selector(Rc::new(SelectorNode {
                id: id.clone(),
                binding: data.binding(store),
                options: def.options,
                body: def.body,
                computing: Cell::new(false),
            }));
            let handle: Value = Rc::new(selector.clone());
            let resolvers = data.insert_selector(id.clone(), handle.clone());
            (selector, handle, resolvers)
        };
        run_resolvers(resolvers, &handle);
        debug!(selector = %id, "create selector");
        Ok(selector)
    }
}
