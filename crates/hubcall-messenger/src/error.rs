//! Error types for the messenger layer.
//!
//! These are contract violations detected locally, at the call site.
//! Failures that happen somewhere else in the cluster come back as
//! [`InvocationResult::Failure`](hubcall_protocol::InvocationResult)
//! values instead.

use hubcall_protocol::ProtocolError;
use hubcall_transport::TransportError;

/// Errors that can occur during messenger operations.
#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    /// The implementor does not satisfy the endpoint's interface.
    #[error("implementor for {endpoint} does not implement {interface}")]
    NotImplementing {
        endpoint: String,
        interface: &'static str,
    },

    /// The implementor being removed was never added.
    #[error("implementor is not registered with {endpoint}")]
    NotRegistered { endpoint: String },

    /// No local endpoint has this name.
    #[error("no local endpoint named {0}")]
    UnknownEndpoint(String),

    /// The endpoint already exists with another interface or threading mode.
    #[error("endpoint {endpoint} already exists with a different interface or threading mode")]
    EndpointMismatch { endpoint: String },

    /// A unicast path found the wrong number of implementors.
    #[error("expected exactly one implementor for {endpoint}, found {found}")]
    ImplementorCount { endpoint: String, found: usize },

    /// A remote name is already registered on this node.
    #[error("{0} already has a registered implementor")]
    DuplicateRemote(String),

    /// Channel interfaces can't have methods that return values.
    #[error("channel method {interface}::{method} must not return a value")]
    ChannelMethodNotVoid {
        interface: &'static str,
        method: &'static str,
    },

    /// No declared method accepts the given name and arguments.
    #[error("{interface} has no method {method} accepting these arguments")]
    NoSuchMethod {
        interface: &'static str,
        method: String,
    },

    /// Encoding or decoding failed, or an interface is invalid.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The transport refused to send.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
