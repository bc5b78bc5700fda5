//! Invocation results and the failures a remote call can end in.

use std::any::type_name;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationResult {
    /// The method returned. Void methods return `null`.
    Value(Value),
    Failure(RemoteFailure),
}

impl InvocationResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, InvocationResult::Failure(_))
    }

    /// Converts into a `Result`.
    pub fn into_result(self) -> Result<Value, RemoteFailure> {
        match self {
            InvocationResult::Value(value) => Ok(value),
            InvocationResult::Failure(failure) => Err(failure),
        }
    }

    pub fn connection_lost(reason: impl Into<String>) -> Self {
        InvocationResult::Failure(RemoteFailure::ConnectionLost {
            reason: reason.into(),
        })
    }

    pub fn illegal_state(reason: impl Into<String>) -> Self {
        InvocationResult::Failure(RemoteFailure::IllegalState {
            reason: reason.into(),
        })
    }
}

impl From<Result<Value, ThrownError>> for InvocationResult {
    fn from(result: Result<Value, ThrownError>) -> Self {
        match result {
            Ok(value) => InvocationResult::Value(value),
            Err(thrown) => InvocationResult::Failure(RemoteFailure::Thrown(thrown)),
        }
    }
}

/// Why a call did not produce a value.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteFailure {
    /// No node has an implementor registered for the endpoint.
    #[error("no implementor found for {endpoint}")]
    RemoteNotFound { endpoint: String },

    /// The connection carrying the call went away before a result came
    /// back.
    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// The implementor returned an error.
    #[error(transparent)]
    Thrown(ThrownError),

    /// The implementor's interface has no method matching the call.
    #[error("{interface} has no method matching {method}")]
    NoSuchMethod { interface: String, method: String },

    /// The cluster broke a routing contract, e.g. two implementors for a
    /// unicast target.
    #[error("illegal state: {reason}")]
    IllegalState { reason: String },
}

/// An error returned by an implementor, carried across the network.
///
/// Keeps the Rust type name and the serialized error so the caller can
/// get the original type back with [`downcast`](Self::downcast).
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{type_name}: {message}")]
pub struct ThrownError {
    pub type_name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Type name recorded for errors built from a plain message.
const MESSAGE_TYPE: &str = "message";

/// Type name recorded for implementors that panicked.
const PANIC_TYPE: &str = "panic";

impl ThrownError {
    /// Captures a typed error.
    pub fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Serialize,
    {
        Self {
            type_name: type_name::<E>().to_owned(),
            message: error.to_string(),
            payload: serde_json::to_value(error).ok(),
        }
    }

    /// An error that is only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            type_name: MESSAGE_TYPE.to_owned(),
            message: message.into(),
            payload: None,
        }
    }

    /// An implementor that panicked instead of returning.
    pub fn panic(message: impl Into<String>) -> Self {
        Self {
            type_name: PANIC_TYPE.to_owned(),
            message: message.into(),
            payload: None,
        }
    }

    pub fn is_panic(&self) -> bool {
        self.type_name == PANIC_TYPE
    }

    /// Returns `true` if this was captured from an `E`.
    pub fn is<E>(&self) -> bool {
        self.type_name == type_name::<E>()
    }

    /// Rebuilds the original error, if it was an `E`.
    pub fn downcast<E: DeserializeOwned>(&self) -> Option<E> {
        if !self.is::<E>() {
            return None;
        }
        let payload = self.payload.clone()?;
        serde_json::from_value(payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, thiserror::Error, Serialize, Deserialize)]
    enum LedgerError {
        #[error("overdrawn by {0}")]
        Overdrawn(u32),
    }

    #[derive(Debug, thiserror::Error, Serialize, Deserialize)]
    #[error("other")]
    struct OtherError;

    #[test]
    fn test_thrown_error_downcast_restores_original() {
        let thrown = ThrownError::new(&LedgerError::Overdrawn(12));
        assert_eq!(thrown.message, "overdrawn by 12");
        assert_eq!(
            thrown.downcast::<LedgerError>(),
            Some(LedgerError::Overdrawn(12))
        );
    }

    #[test]
    fn test_thrown_error_downcast_wrong_type_returns_none() {
        let thrown = ThrownError::new(&LedgerError::Overdrawn(1));
        assert!(thrown.downcast::<OtherError>().is_none());
        assert!(!thrown.is::<OtherError>());
    }

    #[test]
    fn test_thrown_error_survives_json_round_trip() {
        let thrown = ThrownError::new(&LedgerError::Overdrawn(3));
        let json = serde_json::to_string(&thrown).unwrap();
        let back: ThrownError = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.downcast::<LedgerError>(),
            Some(LedgerError::Overdrawn(3))
        );
    }

    #[test]
    fn test_thrown_error_msg_has_no_payload() {
        let thrown = ThrownError::msg("boom");
        assert_eq!(thrown.to_string(), "message: boom");
        assert!(thrown.payload.is_none());
        assert!(!thrown.is_panic());
        assert!(ThrownError::panic("oops").is_panic());
    }

    #[test]
    fn test_remote_failure_json_shape() {
        let failure = RemoteFailure::RemoteNotFound {
            endpoint: "calc".into(),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "kind": "remote_not_found", "endpoint": "calc" })
        );
    }

    #[test]
    fn test_invocation_result_into_result() {
        let ok = InvocationResult::Value(serde_json::json!(6));
        assert_eq!(ok.into_result().unwrap(), serde_json::json!(6));

        let lost = InvocationResult::connection_lost("gone");
        assert!(lost.is_failure());
        assert!(matches!(
            lost.into_result(),
            Err(RemoteFailure::ConnectionLost { .. })
        ));
    }

    #[test]
    fn test_invocation_result_from_thrown() {
        let result: InvocationResult = Err(ThrownError::msg("no")).into();
        assert!(matches!(
            result,
            InvocationResult::Failure(RemoteFailure::Thrown(_))
        ));
    }
}
