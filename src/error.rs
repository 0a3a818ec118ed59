use std::rc::Rc;

use parse_display::Display;

use crate::{ActionType, MemberId};


/// What kind of name failed validation.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[display(style = "lowercase")]
pub enum NameKind {
    Store,
    Slice,
    Action,
    Selector,
}

/// Coarse classification of [`Error`].
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[display(style = "lowercase")]
pub enum ErrorKind {
    /// Raised by a factory; nothing was registered.
    Registration,
    /// Raised at a call boundary before any user code ran.
    Invocation,
    /// Raised by user code: an action body, a reducer or a hook.
    User,
}

#[non_exhaustive]
#[derive(Clone, Debug, Display)]
pub enum Error {
    #[display("invalid {kind} name `{name}`")]
    InvalidName { kind: NameKind, name: String },
    #[display("`{0}` is a reserved name")]
    ReservedName(String),
    #[display("`{0}` is already registered")]
    DuplicateMember(MemberId),
    #[display("store `{0}` is already created")]
    StoreFinalized(String),
    #[display("slice `{store}.{slice}` is already created")]
    SliceFinalized { store: String, slice: String },
    #[display("action type `{0}` is not registered in this registry")]
    UnknownAction(ActionType),
    #[display("handler for `{action_type}` does not belong to slice `{store}.{slice}`")]
    ForeignHandler {
        action_type: ActionType,
        store: String,
        slice: String,
    },
    #[display("more than one handler for `{0}`")]
    DuplicateHandler(ActionType),
    #[display("action `{0}` has no handler and no exemption")]
    MissingHandler(MemberId),
    #[display("selector `{0}` is not registered")]
    UnknownSelector(MemberId),
    #[display("selector `{selector}` does not belong to `{store}.{slice}`")]
    ForeignSelector {
        selector: MemberId,
        store: String,
        slice: String,
    },
    #[display("selector `{0}` is not listed")]
    MissingSelector(MemberId),
    #[display("selector `{selector}` is already claimed by slice `{slice}`")]
    SelectorAlreadyClaimed { selector: MemberId, slice: String },
    #[display("selector `{0}` must be passed by its direct handle, not an import")]
    ImportedSelector(MemberId),
    #[display("selector `{0}` is listed more than once")]
    DuplicateSelector(MemberId),
    #[display("slice `{slice}` does not belong to store `{store}`")]
    ForeignSlice { store: String, slice: String },
    #[display("slice `{0}` is listed more than once")]
    DuplicateSlice(String),
    #[display("slice `{store}.{slice}` is not listed")]
    MissingSlice { store: String, slice: String },
    #[display("`{0}` refers to a slice that was never created")]
    UnknownSlice(MemberId),
    #[display("selector `{0}` has no stage")]
    NoStages(MemberId),
    #[display("selector `{0}` requests `memo_on_args` without `keep_memo`")]
    MemoWithoutKeepMemo(MemberId),
    #[display("parameterized selector `{0}` needs a params signature")]
    MissingParamsSignature(MemberId),

    #[display("store `{0}` is not created")]
    UninitializedStore(String),
    #[display("store `{0}` is reducing; actions cannot be invoked from a reducer")]
    ReentrantFromReducer(String),
    #[display("store `{0}` is selecting; actions and selectors cannot be invoked from a selector")]
    ReentrantFromSelector(String),
    #[display("import `{0}` is not resolved")]
    UnresolvedImport(MemberId),
    #[display("import `{0}` was registered with different types")]
    ImportTypeMismatch(MemberId),
    #[display("store `{store}` holds no state of this type for slice `{slice}`")]
    MissingSliceState { store: String, slice: String },
    #[display("state of store `{state}` passed to a selector of store `{store}`")]
    ForeignState { store: String, state: String },
    #[display("detect cyclic dependency in selector `{0}`")]
    CyclicSelector(MemberId),

    #[display("{0}")]
    User(UserError),
}

impl Error {
    /// Wraps an error raised by user code.
    pub fn user(e: impl std::error::Error + 'static) -> Self {
        Error::User(UserError(Rc::new(e)))
    }

    /// A user error carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::user(MessageError(message.into()))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UninitializedStore(_)
            | Error::ReentrantFromReducer(_)
            | Error::ReentrantFromSelector(_)
            | Error::UnresolvedImport(_)
            | Error::ImportTypeMismatch(_)
            | Error::ForeignState { .. }
            | Error::MissingSliceState { .. }
            | Error::CyclicSelector(_) => ErrorKind::Invocation,
            Error::User(_) => ErrorKind::User,
            _ => ErrorKind::Registration,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::User(e) => Some(&*e.0),
            _ => None,
        }
    }
}

/// Error raised by user code, shared between the dispatched record and the caller.
#[derive(Clone)]
pub struct UserError(Rc<dyn std::error::Error>);

impl UserError {
    pub fn get(&self) -> &(dyn std::error::Error + 'static) {
        &*self.0
    }
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref()
    }
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl std::fmt::Display for UserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}
impl std::fmt::Debug for UserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

#[derive(Debug, Display)]
#[display("{0}")]
struct MessageError(String);

impl std::error::Error for MessageError {}
