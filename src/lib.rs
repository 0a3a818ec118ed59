//! Slice-based stores with memoized selectors and change-only observers.
//!
//! A [`Registry`] is the namespace every member is registered into.
//! Actions and selectors are registered first, then the slices that handle and
//! claim them, then the [`Store`] that composes the slices. Once the store is
//! created, actions dispatch into it and selectors evaluate against its
//! [`StoreState`] snapshots.
//!
//! ```
//! use slicemut::*;
//!
//! #[derive(Clone, Default)]
//! struct Counter {
//!     value: i32,
//! }
//!
//! let registry = Registry::new();
//! let increment = registry
//!     .create_action(None, "counter", "increment", |n: i32, _| Ok(n))
//!     .unwrap();
//! let value = registry
//!     .create_selector(
//!         SelectorBuilder::<()>::new("value")
//!             .build(|state, _| state.slice::<Counter>("counter").value),
//!     )
//!     .unwrap();
//! let counter = registry
//!     .create_slice(
//!         SliceBuilder::<Counter>::with_default("counter").on(
//!             increment.action_type(),
//!             |s, a| s.value += a.payload::<i32>().copied().unwrap_or_default(),
//!         ),
//!     )
//!     .unwrap();
//! let store = registry
//!     .create_store(StoreBuilder::new().slice(&counter).selector(&value))
//!     .unwrap();
//!
//! increment.invoke(5).unwrap();
//! assert_eq!(*value.select(&store.get_state(), ()).unwrap(), 5);
//! ```

mod action;
mod error;
mod id;
mod import;
mod matrix;
mod observe;
mod registry;
mod selector;
mod slice;
mod store;
mod subscription;
mod validate;

pub use action::{
    async_action::{AsyncAction, AsyncActionOptions},
    Action, ActionMeta, ActionRecord, HookOutcome, StoreAccess, Value,
};
pub use error::{Error, ErrorKind, NameKind, UserError};
pub use id::{
    ActionPhase, ActionType, AsyncActionTypes, MemberId, StateVersion, DEFAULT_STORE_NAME,
    SEPARATOR, STORE_SLICE,
};
pub use import::{ActionImport, AsyncActionImport, Import, SelectorImport};
pub use observe::{Observation, StateObservation};
pub use registry::Registry;
pub use selector::{
    AsSelectorRef, Params, Selector, SelectorBuilder, SelectorContext, SelectorDef,
    SelectorOptions, SelectorRef, SelectorSource,
};
pub use slice::{ReducerTable, SliceBuilder, SliceHandle};
pub use store::{Store, StoreBuilder, StoreState, StoreStatus};
pub use subscription::Subscription;
