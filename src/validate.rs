//! Registration rules shared by every factory.
//!
//! Factories call these in a fixed order (store, slice, member name, duplicate,
//! then kind-specific checks) and only mutate the registry after all of them pass.

use crate::{
    error::NameKind,
    id::{SEPARATOR, STORE_SLICE},
    registry::RegistryData,
    ActionType, Error, MemberId,
};


pub(crate) fn name(kind: NameKind, name: &str) -> Result<(), Error> {
    if name.is_empty() || name.contains(SEPARATOR) || name.contains(char::is_whitespace) {
        return Err(Error::InvalidName {
            kind,
            name: name.to_owned(),
        });
    }
    Ok(())
}

/// Store name is valid and the store is still open for registrations.
pub(crate) fn open_store(data: &RegistryData, store: &str) -> Result<(), Error> {
    name(NameKind::Store, store)?;
    if data.is_store_finalized(store) {
        return Err(Error::StoreFinalized(store.to_owned()));
    }
    Ok(())
}

/// Slice name is valid, not reserved, and the slice is not created yet.
pub(crate) fn open_slice(data: &RegistryData, store: &str, slice: &str) -> Result<(), Error> {
    name(NameKind::Slice, slice)?;
    if slice == STORE_SLICE {
        return Err(Error::ReservedName(slice.to_owned()));
    }
    if data.is_slice_finalized(store, slice) {
        return Err(Error::SliceFinalized {
            store: store.to_owned(),
            slice: slice.to_owned(),
        });
    }
    Ok(())
}

/// Like [`open_slice`], but also accepts the store-level slice.
pub(crate) fn open_member_slice(
    data: &RegistryData,
    store: &str,
    slice: &str,
) -> Result<(), Error> {
    if slice == STORE_SLICE {
        return Ok(());
    }
    open_slice(data, store, slice)
}

/// Member name is valid and nothing is registered under `id` yet.
pub(crate) fn new_member(data: &RegistryData, kind: NameKind, id: &MemberId) -> Result<(), Error> {
    name(kind, &id.member)?;
    if data.contains_member(id) {
        return Err(Error::DuplicateMember(id.clone()));
    }
    Ok(())
}

/// `action_type` was registered through this registry for `store.slice`.
pub(crate) fn handler(
    data: &RegistryData,
    action_type: &ActionType,
    store: &str,
    slice: &str,
) -> Result<(), Error> {
    let known = data
        .actions
        .get(action_type.owner())
        .is_some_and(|e| e.types.contains(action_type));
    if !known {
        return Err(Error::UnknownAction(action_type.clone()));
    }
    if !action_type.owner().belongs_to(store, slice) {
        return Err(Error::ForeignHandler {
            action_type: action_type.clone(),
            store: store.to_owned(),
            slice: slice.to_owned(),
        });
    }
    Ok(())
}
