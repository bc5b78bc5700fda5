//! The messages nodes and the hub exchange.
//!
//! "Hub" messages travel from a node to the server, "spoke" messages from
//! the server to a node.
//!
//! ```text
//!  caller                 hub (server)               implementor
//!    │  HubInvoke            │                            │
//!    ├──────────────────────►│  SpokeInvoke (+invoker)    │
//!    │                       ├───────────────────────────►│
//!    │                       │  HubInvocationResults      │
//!    │ SpokeInvocationResults│◄───────────────────────────┤
//!    │◄──────────────────────┤                            │
//! ```

use hubcall_transport::NodeId;
use serde::{Deserialize, Serialize};

use crate::{CallId, InvocationResult, MethodCall};

/// Every message the messaging core puts on the wire.
///
/// Internally tagged by `type`:
/// `{"type":"HasEndPointImplementor","endpoint":"calc"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// Node → hub: this node now has a local implementor for `endpoint`.
    HasEndPointImplementor { endpoint: String },

    /// Node → hub: this node no longer has one.
    NoLongerHasEndPointImplementor { endpoint: String },

    /// Node → hub: route a call. `call_id` is present only when
    /// `needs_response` is set.
    HubInvoke {
        call_id: Option<CallId>,
        needs_response: bool,
        call: MethodCall,
    },

    /// Hub → node: run a call on behalf of `invoker`.
    SpokeInvoke {
        call_id: Option<CallId>,
        needs_response: bool,
        call: MethodCall,
        invoker: NodeId,
    },

    /// Node → hub: the result of a `SpokeInvoke`.
    HubInvocationResults {
        call_id: CallId,
        result: InvocationResult,
    },

    /// Hub → node: the result of the caller's `HubInvoke`.
    SpokeInvocationResults {
        call_id: CallId,
        result: InvocationResult,
    },
}

impl WireMessage {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::HasEndPointImplementor { .. } => "HasEndPointImplementor",
            WireMessage::NoLongerHasEndPointImplementor { .. } => {
                "NoLongerHasEndPointImplementor"
            }
            WireMessage::HubInvoke { .. } => "HubInvoke",
            WireMessage::SpokeInvoke { .. } => "SpokeInvoke",
            WireMessage::HubInvocationResults { .. } => "HubInvocationResults",
            WireMessage::SpokeInvocationResults { .. } => {
                "SpokeInvocationResults"
            }
        }
    }
}
