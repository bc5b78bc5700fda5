//! Unified error type for hubcall.

use hubcall_messenger::MessengerError;
use hubcall_protocol::{ProtocolError, RemoteFailure};
use hubcall_transport::TransportError;
use serde::de::DeserializeOwned;

/// Top-level error that wraps all crate-specific errors.
///
/// Local contract violations arrive as `Messenger`; anything that went
/// wrong on the other side of a remote call arrives as `Remote`.
#[derive(Debug, thiserror::Error)]
pub enum HubcallError {
    /// A transport-level error (connect, send, closed).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid interface).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A messenger contract violation (bad registration, unknown method).
    #[error(transparent)]
    Messenger(#[from] MessengerError),

    /// The remote call failed: not found, connection lost, or the
    /// implementor returned an error.
    #[error(transparent)]
    Remote(#[from] RemoteFailure),
}

impl HubcallError {
    /// Recovers the implementor's original error, if it was an `E`.
    ///
    /// ```rust
    /// # use hubcall::HubcallError;
    /// # use hubcall::protocol::{RemoteFailure, ThrownError};
    /// #[derive(Debug, PartialEq, thiserror::Error, serde::Serialize, serde::Deserialize)]
    /// #[error("insufficient funds")]
    /// struct InsufficientFunds;
    ///
    /// let err: HubcallError =
    ///     RemoteFailure::Thrown(ThrownError::new(&InsufficientFunds)).into();
    /// assert_eq!(err.thrown::<InsufficientFunds>(), Some(InsufficientFunds));
    /// ```
    pub fn thrown<E: DeserializeOwned>(&self) -> Option<E> {
        match self {
            HubcallError::Remote(RemoteFailure::Thrown(thrown)) => thrown.downcast(),
            _ => None,
        }
    }

    /// Returns `true` if nobody implements the target.
    pub fn is_remote_not_found(&self) -> bool {
        matches!(self, HubcallError::Remote(RemoteFailure::RemoteNotFound { .. }))
    }

    /// Returns `true` if the connection dropped while the call was out.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, HubcallError::Remote(RemoteFailure::ConnectionLost { .. }))
    }
}
