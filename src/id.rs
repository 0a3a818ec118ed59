use std::{
    cell::Cell,
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
};

use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};


/// Separator used to build composite ids. Not allowed inside any name.
pub const SEPARATOR: char = '.';

/// Store name used when a factory is not given one.
pub const DEFAULT_STORE_NAME: &str = "default";

/// Reserved slice name for members that span the whole store.
pub const STORE_SLICE: &str = "@store";

pub(crate) const ACTION_SUFFIX: &str = "Action";
pub(crate) const SELECTOR_SUFFIX: &str = "Selector";

/// Canonical `store.slice.member` key.
///
/// Every registry map is keyed by this. It is reversible: [`FromStr`](std::str::FromStr)
/// recovers the three parts from the `Display` form.
#[derive(Clone, Debug, Display, FromStr, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{store}.{slice}.{member}")]
#[from_str(regex = "(?P<store>[^.]+)\\.(?P<slice>[^.]+)\\.(?P<member>[^.]+)")]
pub struct MemberId {
    pub store: String,
    pub slice: String,
    pub member: String,
}

impl MemberId {
    pub fn new(store: &str, slice: &str, member: &str) -> Self {
        Self {
            store: store.to_owned(),
            slice: slice.to_owned(),
            member: member.to_owned(),
        }
    }
    pub fn is_store_level(&self) -> bool {
        self.slice == STORE_SLICE
    }
    pub(crate) fn belongs_to(&self, store: &str, slice: &str) -> bool {
        self.store == store && self.slice == slice
    }
}

impl Serialize for MemberId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.collect_str(self)
    }
}
impl<'de> Deserialize<'de> for MemberId {
    fn deserialize<D>(deserializer: D) -> Result<MemberId, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid member id `{s}`")))
    }
}

/// Appends `suffix` unless `name` already ends with it.
pub(crate) fn with_suffix(name: &str, suffix: &str) -> String {
    if name.ends_with(suffix) {
        name.to_owned()
    } else {
        format!("{name}{suffix}")
    }
}

/// Lifecycle position of an [`ActionType`].
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[display(style = "SNAKE_CASE")]
pub enum ActionPhase {
    Sync,
    Pending,
    Rejected,
    Resolved,
}

/// Reducer-table key allocated once per action registration.
///
/// Equality is identity: two types registered under the same name in two
/// registries never compare equal.
#[derive(Clone, Display)]
#[display("{0}")]
pub struct ActionType(Rc<ActionTypeData>);

#[derive(Display)]
#[display("{owner}/{phase}")]
struct ActionTypeData {
    owner: Rc<MemberId>,
    phase: ActionPhase,
}

impl ActionType {
    pub(crate) fn new(owner: Rc<MemberId>, phase: ActionPhase) -> Self {
        Self(Rc::new(ActionTypeData { owner, phase }))
    }
    pub fn owner(&self) -> &MemberId {
        &self.0.owner
    }
    pub fn phase(&self) -> ActionPhase {
        self.0.phase
    }
}
impl PartialEq for ActionType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for ActionType {}
impl Hash for ActionType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0).hash(state)
    }
}
impl fmt::Debug for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionType({self})")
    }
}

/// The three types of an asynchronous action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AsyncActionTypes {
    pub pending: ActionType,
    pub rejected: ActionType,
    pub resolved: ActionType,
}
impl AsyncActionTypes {
    pub(crate) fn new(owner: &MemberId) -> Self {
        let owner = Rc::new(owner.clone());
        Self {
            pending: ActionType::new(owner.clone(), ActionPhase::Pending),
            rejected: ActionType::new(owner.clone(), ActionPhase::Rejected),
            resolved: ActionType::new(owner, ActionPhase::Resolved),
        }
    }
    pub fn iter(&self) -> impl Iterator<Item = &ActionType> {
        [&self.pending, &self.rejected, &self.resolved].into_iter()
    }
}

/// Opaque token replaced on every commit.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[display("v{0}")]
pub struct StateVersion(u64);

impl StateVersion {
    pub(crate) fn new(tokens: &Tokens) -> Self {
        Self(tokens.next())
    }
}

/// Version counter shared by every store of one registry.
#[derive(Clone, Default)]
pub(crate) struct Tokens(Rc<Cell<u64>>);

impl Tokens {
    pub fn next(&self) -> u64 {
        let value = self.0.get() + 1;
        self.0.set(value);
        value
    }
}
