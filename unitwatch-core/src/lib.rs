//! Unitwatch core library: unit types, name normalization, handles and the
//! remote collaborator contracts.
//!
//! Public API surface:
//! - [`types`]: kinds, names, object paths, listings, lifecycle properties
//! - [`naming`]: unit-name mangling and bus-label escaping
//! - [`handle`]: [`UnitHandle`]
//! - [`remote`]: directory, facade factory and notification channel traits
//! - [`error`]: [`RemoteError`], [`NameError`]
//! - [`memory`]: an in-memory daemon implementing every remote trait

pub mod error;
pub mod handle;
pub mod memory;
pub mod naming;
pub mod remote;
pub mod types;

pub use error::{NameError, RemoteError};
pub use handle::UnitHandle;
pub use remote::{FacadeFactory, ManagerSignal, NotificationChannel, UnitDirectory, UnitFacade};
pub use types::{
    property, ActiveState, LoadState, ObjectPath, PropertyMap, UnitKind, UnitLifecycle,
    UnitListing, UnitName,
};
