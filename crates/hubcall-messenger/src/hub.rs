//! Server-side directory and router.
//!
//! The [`Hub`] knows which nodes have a local implementor for each
//! endpoint name, and forwards calls between the calling node and the
//! implementing node(s). It is a plain state machine: every input
//! returns the messages to send, and the messenger does the sending.
//!
//! | input                          | output                                    |
//! |--------------------------------|-------------------------------------------|
//! | `HasEndPointImplementor`       | none                                      |
//! | `HubInvoke`, no response       | `SpokeInvoke` to every other implementor  |
//! | `HubInvoke`, response, 0 nodes | `RemoteNotFound` back to the caller       |
//! | `HubInvoke`, response, 1 node  | `SpokeInvoke` to that node                |
//! | `HubInvocationResults`         | `SpokeInvocationResults` to the caller    |
//! | node removed                   | `ConnectionLost` to callers waiting on it |

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hubcall_protocol::{
    CallId, InvocationResult, MethodCall, RemoteFailure, WireMessage,
};
use hubcall_transport::NodeId;
use tokio::time::Instant;

use crate::MessengerConfig;

/// Messages the hub wants delivered, in order.
pub(crate) type Outbound = Vec<(NodeId, WireMessage)>;

/// A call the hub forwarded and is waiting on.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    caller: NodeId,
    implementor: NodeId,
}

#[derive(Debug, Default)]
struct HubState {
    directory: HashMap<String, HashSet<NodeId>>,
    in_flight: HashMap<CallId, InFlight>,
}

/// Directory of "who implements what", owned by the server node.
pub struct Hub {
    config: MessengerConfig,
    state: Mutex<HubState>,
}

impl Hub {
    pub(crate) fn new(config: MessengerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HubState::default()),
        }
    }

    /// Returns `true` if any node implements `endpoint`.
    pub fn has_implementors(&self, endpoint: &str) -> bool {
        self.lock().directory.contains_key(endpoint)
    }

    /// The nodes implementing `endpoint`, sorted.
    pub fn implementors_of(&self, endpoint: &str) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .lock()
            .directory
            .get(endpoint)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        nodes.sort();
        nodes
    }

    /// Number of calls forwarded and not yet answered.
    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Polls until some node implements `endpoint` or `timeout` elapses.
    /// A zero timeout waits as long as the configured maximum.
    pub async fn wait_for_nodes_to_implement(
        &self,
        endpoint: &str,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + self.config.effective_timeout(timeout);
        loop {
            if self.has_implementors(endpoint) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Applies one message from `from`.
    pub(crate) fn handle(&self, from: NodeId, msg: WireMessage) -> Outbound {
        match msg {
            WireMessage::HasEndPointImplementor { endpoint } => {
                self.add_node(endpoint, from);
                Vec::new()
            }
            WireMessage::NoLongerHasEndPointImplementor { endpoint } => {
                self.remove_node(&endpoint, from);
                Vec::new()
            }
            WireMessage::HubInvoke {
                call_id,
                needs_response,
                call,
            } => self.route(from, call_id, needs_response, call),
            WireMessage::HubInvocationResults { call_id, result } => {
                self.complete(from, call_id, result)
            }
            other => {
                tracing::warn!(%from, kind = other.kind(), "hub ignoring spoke-bound message");
                Vec::new()
            }
        }
    }

    /// Forgets `node`: its registrations, calls it made, and calls
    /// waiting on it (whose callers are told the connection was lost).
    pub(crate) fn node_removed(&self, node: NodeId) -> Outbound {
        let mut state = self.lock();

        let mut dropped = Vec::new();
        state.directory.retain(|endpoint, nodes| {
            if nodes.remove(&node) {
                dropped.push(endpoint.clone());
            }
            !nodes.is_empty()
        });

        let mut outbound = Vec::new();
        state.in_flight.retain(|call_id, flight| {
            if flight.implementor == node {
                if flight.caller != node {
                    outbound.push((
                        flight.caller,
                        WireMessage::SpokeInvocationResults {
                            call_id: call_id.clone(),
                            result: InvocationResult::connection_lost(format!(
                                "{node} disconnected"
                            )),
                        },
                    ));
                }
                false
            } else {
                flight.caller != node
            }
        });

        tracing::info!(
            %node,
            endpoints = ?dropped,
            released = outbound.len(),
            "node removed from hub"
        );
        outbound
    }

    fn add_node(&self, endpoint: String, node: NodeId) {
        tracing::debug!(%node, %endpoint, "node has implementor");
        self.lock().directory.entry(endpoint).or_default().insert(node);
    }

    fn remove_node(&self, endpoint: &str, node: NodeId) {
        let mut state = self.lock();
        let Some(nodes) = state.directory.get_mut(endpoint) else {
            tracing::warn!(%node, %endpoint, "removal for unknown endpoint");
            return;
        };
        if !nodes.remove(&node) {
            tracing::warn!(%node, %endpoint, "removal from node that was not registered");
        }
        if nodes.is_empty() {
            state.directory.remove(endpoint);
        }
        tracing::debug!(%node, %endpoint, "node no longer has implementor");
    }

    fn route(
        &self,
        from: NodeId,
        call_id: Option<CallId>,
        needs_response: bool,
        call: MethodCall,
    ) -> Outbound {
        let mut state = self.lock();

        // The calling node has already run its own local implementors.
        let targets: Vec<NodeId> = state
            .directory
            .get(&call.endpoint)
            .map(|nodes| nodes.iter().copied().filter(|n| *n != from).collect())
            .unwrap_or_default();

        if !needs_response {
            tracing::debug!(
                %from,
                endpoint = %call.endpoint,
                targets = targets.len(),
                "fanning out call"
            );
            return targets
                .into_iter()
                .map(|to| {
                    (
                        to,
                        WireMessage::SpokeInvoke {
                            call_id: None,
                            needs_response: false,
                            call: call.clone(),
                            invoker: from,
                        },
                    )
                })
                .collect();
        }

        let Some(call_id) = call_id else {
            tracing::warn!(%from, endpoint = %call.endpoint, "call needing a response has no call id");
            return Vec::new();
        };

        let result = match targets.as_slice() {
            [] => InvocationResult::Failure(RemoteFailure::RemoteNotFound {
                endpoint: call.endpoint.clone(),
            }),
            [implementor] => {
                let implementor = *implementor;
                tracing::debug!(%from, %implementor, endpoint = %call.endpoint, %call_id, "forwarding call");
                state.in_flight.insert(
                    call_id.clone(),
                    InFlight {
                        caller: from,
                        implementor,
                    },
                );
                return vec![(
                    implementor,
                    WireMessage::SpokeInvoke {
                        call_id: Some(call_id),
                        needs_response: true,
                        call,
                        invoker: from,
                    },
                )];
            }
            many => {
                tracing::error!(
                    endpoint = %call.endpoint,
                    nodes = ?many,
                    "multiple implementors found for a remote"
                );
                InvocationResult::illegal_state(format!(
                    "multiple implementors found for remote {}",
                    call.endpoint
                ))
            }
        };

        vec![(from, WireMessage::SpokeInvocationResults { call_id, result })]
    }

    fn complete(
        &self,
        from: NodeId,
        call_id: CallId,
        result: InvocationResult,
    ) -> Outbound {
        let mut state = self.lock();
        match state.in_flight.get(&call_id).copied() {
            None => {
                tracing::warn!(%from, %call_id, "result for unknown call");
                Vec::new()
            }
            Some(flight) if flight.implementor != from => {
                tracing::warn!(
                    %from,
                    expected = %flight.implementor,
                    %call_id,
                    "result from a node the call was not sent to"
                );
                Vec::new()
            }
            Some(flight) => {
                state.in_flight.remove(&call_id);
                vec![(
                    flight.caller,
                    WireMessage::SpokeInvocationResults { call_id, result },
                )]
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
