//! Error taxonomy for the runtime.
//!
//! Compare-and-swap conflicts never appear here: they are retried inside
//! the store's update loop and never surface to a caller. A non-blocking
//! lock attempt on a held semaphore is a `false` return, not an error.

use thiserror::Error;

use crate::rpc::CallId;

/// Errors from registering a pending call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A live entry already exists for this call id.
    #[error("callback with id '{id}' already registered")]
    DuplicateId { id: CallId },

    /// The registry was cleared and accepts no new entries.
    #[error("callback registry is shut down")]
    ShutDown,
}

/// Failures delivered as the terminal resolution of a pending call.
///
/// Exactly one of these (or a success) reaches the single caller awaiting
/// a given call; a resolution after the first is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallFailure {
    /// No reply arrived before the deadline. Purely local; never placed
    /// on the wire.
    #[error("timeout for request '{id}': {description}")]
    Timeout { id: CallId, description: String },

    /// The transport or the remote side failed.
    #[error("remote failure: {0}")]
    Remote(RemoteError),

    /// The runtime shut down before the call resolved.
    #[error("shut down before resolution")]
    Shutdown,
}

/// Opaque failures from the outbound transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The transport could not carry the message.
    #[error("transport failed: {reason}")]
    Transport { reason: String },

    /// No endpoint is registered under the target address.
    #[error("unknown target address '{address}'")]
    UnknownTarget { address: String },

    /// The remote side answered with an error response.
    #[error("remote fault {code}: {message}")]
    Fault { code: i64, message: String },
}

impl RemoteError {
    /// Create a transport failure.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create an unknown-target failure.
    pub fn unknown_target(address: impl Into<String>) -> Self {
        Self::UnknownTarget {
            address: address.into(),
        }
    }
}

impl From<RemoteError> for CallFailure {
    fn from(err: RemoteError) -> Self {
        Self::Remote(err)
    }
}

/// Errors from the repeat-task layer.
#[derive(Debug, Error)]
pub enum RepeatError {
    /// The descriptor store failed.
    #[error(transparent)]
    Store(#[from] hermod_state::StoreError),

    /// A remote registration or invocation failed.
    #[error(transparent)]
    Call(#[from] CallFailure),

    /// No descriptor exists under this id.
    #[error("unknown repeat task '{id}'")]
    UnknownRepeat { id: String },
}
