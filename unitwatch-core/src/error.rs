//! Error types for unitwatch-core.

use thiserror::Error;

/// Failures raised by the remote daemon or its transport.
///
/// Every collaborator trait in [`crate::remote`] reports through this type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The daemon or the bus connection could not be reached.
    #[error("daemon unreachable: {0}")]
    Unreachable(String),

    /// The daemon answered with something malformed or unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The daemon does not know the requested unit.
    #[error("no such unit: {0}")]
    NoSuchUnit(String),
}

/// Errors from unit-name handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    /// Blank input (empty or whitespace only).
    #[error("unit name is empty")]
    Empty,

    /// A kind string that is not one of the known unit kinds.
    #[error("unknown unit kind '{0}'; expected one of: automount, busname, device, mount, path, scope, service, slice, snapshot, socket, swap, target, timer")]
    UnknownKind(String),
}
