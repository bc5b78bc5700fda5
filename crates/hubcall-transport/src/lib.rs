//! Transport abstraction layer for hubcall.
//!
//! The messaging core never touches sockets. It talks to a
//! [`NodeMessenger`]: something that can send bytes to a node, broadcast
//! bytes to every node, tell us who we are and who the server is, and
//! hand out one ordered stream of [`NetEvent`]s (incoming messages and
//! connection-loss notifications).
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryNetwork`]: an in-process star network. Used by tests and by
//!   single-process deployments.
//! - [`WebSocketServer`] / [`WebSocketClient`] (feature `websocket`,
//!   default): a star network over `tokio-tungstenite`.
//!
//! # Topology
//!
//! ```text
//!            ┌──────────┐
//!   node-1 ──┤  server  ├── node-2
//!            │ (node-0) │
//!            └────┬─────┘
//!                 │
//!               node-3
//! ```
//!
//! Exactly one node is "the server". Every other node holds a single
//! connection to it.

#![allow(async_fn_in_trait)]

mod error;
mod frame;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use frame::{BROADCAST, decode_frame, encode_frame};
pub use memory::{MemoryMessenger, MemoryNetwork};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketClient, WebSocketServer};

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Opaque identifier for a node in the network.
///
/// Serialized as a plain number so it can travel inside wire messages
/// (the hub stamps the invoker's `NodeId` onto forwarded calls).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Creates a new `NodeId` from a raw `u64`.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Something that happened on the network, delivered in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    /// A message arrived from `from`.
    Message { from: NodeId, data: Vec<u8> },

    /// Server side: a peer disconnected.
    NodeLeft(NodeId),

    /// Client side: the connection to the server is gone.
    ConnectionLost,
}

/// Receiver half of a node's ordered event stream.
pub type EventStream = mpsc::UnboundedReceiver<NetEvent>;

/// A node's view of the network: point-to-point send, broadcast, identity,
/// and an ordered event stream.
///
/// The futures returned by `send`/`broadcast` are `Send` so callers can
/// drive them from spawned tasks.
pub trait NodeMessenger: Send + Sync + 'static {
    /// The identity of this node.
    fn local_node(&self) -> NodeId;

    /// The identity of the distinguished server node.
    fn server_node(&self) -> NodeId;

    /// Returns `true` if this node is the server.
    fn is_server(&self) -> bool {
        self.local_node() == self.server_node()
    }

    /// Sends `data` to a single node.
    fn send(
        &self,
        to: NodeId,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Sends `data` to every other node.
    fn broadcast(
        &self,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Hands out the ordered event stream. Only the first caller gets it.
    fn take_events(&self) -> Result<EventStream, TransportError>;
}
