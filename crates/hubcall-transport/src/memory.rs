//! In-process star network.
//!
//! Every node gets an unbounded channel of [`NetEvent`]s. Sending to a
//! node pushes onto its channel, so delivery is ordered per sender and
//! never blocks. [`MemoryNetwork::disconnect`] severs a node the way a
//! dropped socket would: the node sees `ConnectionLost`, the server sees
//! `NodeLeft`, and further sends from or to that node fail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::{EventStream, NetEvent, NodeId, NodeMessenger, TransportError};

/// The node id the memory network gives its server.
const SERVER_ID: u64 = 0;

struct NetworkState {
    next_id: u64,
    server: NodeId,
    nodes: HashMap<NodeId, mpsc::UnboundedSender<NetEvent>>,
}

impl NetworkState {
    fn deliver(
        &self,
        from: NodeId,
        to: NodeId,
        data: Vec<u8>,
    ) -> Result<(), TransportError> {
        if !self.nodes.contains_key(&from) {
            return Err(TransportError::ConnectionClosed(format!(
                "{from} is disconnected"
            )));
        }
        let target = self
            .nodes
            .get(&to)
            .ok_or(TransportError::UnknownNode(to))?;
        target
            .send(NetEvent::Message { from, data })
            .map_err(|_| TransportError::UnknownNode(to))
    }
}

/// Handle to an in-process network. Cheap to clone.
#[derive(Clone)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// Creates a network and returns it together with the server's messenger.
    pub fn new() -> (Self, MemoryMessenger) {
        let server = NodeId::new(SERVER_ID);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut nodes = HashMap::new();
        nodes.insert(server, tx);

        let network = Self {
            state: Arc::new(Mutex::new(NetworkState {
                next_id: SERVER_ID + 1,
                server,
                nodes,
            })),
        };
        let messenger = network.messenger(server, rx);
        tracing::debug!(%server, "memory network created");
        (network, messenger)
    }

    /// Connects a new client node to the server.
    pub fn join(&self) -> MemoryMessenger {
        let (tx, rx) = mpsc::unbounded_channel();
        let node = {
            let mut state = self.lock();
            let node = NodeId::new(state.next_id);
            state.next_id += 1;
            state.nodes.insert(node, tx);
            node
        };
        tracing::debug!(%node, "node joined memory network");
        self.messenger(node, rx)
    }

    /// Severs `node` from the network.
    ///
    /// Disconnecting the server severs every client.
    pub fn disconnect(&self, node: NodeId) {
        let mut state = self.lock();
        let server = state.server;

        if node == server {
            for (_, tx) in state.nodes.drain() {
                let _ = tx.send(NetEvent::ConnectionLost);
            }
            tracing::info!(%node, "server disconnected from memory network");
            return;
        }

        if let Some(tx) = state.nodes.remove(&node) {
            let _ = tx.send(NetEvent::ConnectionLost);
            if let Some(server_tx) = state.nodes.get(&server) {
                let _ = server_tx.send(NetEvent::NodeLeft(node));
            }
            tracing::info!(%node, "node disconnected from memory network");
        }
    }

    /// Returns `true` if `node` is still connected.
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.lock().nodes.contains_key(&node)
    }

    fn messenger(
        &self,
        local: NodeId,
        events: mpsc::UnboundedReceiver<NetEvent>,
    ) -> MemoryMessenger {
        let server = self.lock().server;
        MemoryMessenger {
            local,
            server,
            state: Arc::clone(&self.state),
            events: Mutex::new(Some(events)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One node's endpoint on a [`MemoryNetwork`].
pub struct MemoryMessenger {
    local: NodeId,
    server: NodeId,
    state: Arc<Mutex<NetworkState>>,
    events: Mutex<Option<EventStream>>,
}

impl MemoryMessenger {
    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NodeMessenger for MemoryMessenger {
    fn local_node(&self) -> NodeId {
        self.local
    }

    fn server_node(&self) -> NodeId {
        self.server
    }

    async fn send(
        &self,
        to: NodeId,
        data: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.lock().deliver(self.local, to, data)
    }

    async fn broadcast(&self, data: Vec<u8>) -> Result<(), TransportError> {
        let state = self.lock();
        let targets: Vec<NodeId> = state
            .nodes
            .keys()
            .copied()
            .filter(|node| *node != self.local)
            .collect();
        for to in targets {
            state.deliver(self.local, to, data.clone())?;
        }
        Ok(())
    }

    fn take_events(&self) -> Result<EventStream, TransportError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TransportError::EventsTaken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_delivers_message_with_origin() {
        let (network, server) = MemoryNetwork::new();
        let client = network.join();
        let mut events = server.take_events().unwrap();

        client.send(server.local_node(), b"hi".to_vec()).await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(NetEvent::Message {
                from: client.local_node(),
                data: b"hi".to_vec(),
            })
        );
    }

    #[tokio::test]
    async fn test_send_to_unknown_node_returns_error() {
        let (_network, server) = MemoryNetwork::new();
        let result = server.send(NodeId::new(99), vec![1]).await;
        assert!(matches!(result, Err(TransportError::UnknownNode(_))));
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let (network, server) = MemoryNetwork::new();
        let a = network.join();
        let b = network.join();
        let mut server_events = server.take_events().unwrap();
        let mut a_events = a.take_events().unwrap();
        let mut b_events = b.take_events().unwrap();

        a.broadcast(vec![7]).await.unwrap();

        assert!(matches!(
            server_events.recv().await,
            Some(NetEvent::Message { .. })
        ));
        assert!(matches!(
            b_events.recv().await,
            Some(NetEvent::Message { .. })
        ));
        assert!(a_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_both_sides() {
        let (network, server) = MemoryNetwork::new();
        let client = network.join();
        let mut server_events = server.take_events().unwrap();
        let mut client_events = client.take_events().unwrap();

        network.disconnect(client.local_node());

        assert_eq!(client_events.recv().await, Some(NetEvent::ConnectionLost));
        assert_eq!(
            server_events.recv().await,
            Some(NetEvent::NodeLeft(client.local_node()))
        );
        assert!(!network.is_connected(client.local_node()));
    }

    #[tokio::test]
    async fn test_send_after_disconnect_returns_error() {
        let (network, server) = MemoryNetwork::new();
        let client = network.join();
        network.disconnect(client.local_node());

        let result = client.send(server.local_node(), vec![1]).await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed(_))));
    }

    #[test]
    fn test_take_events_twice_returns_error() {
        let (_network, server) = MemoryNetwork::new();
        assert!(server.take_events().is_ok());
        assert!(matches!(
            server.take_events(),
            Err(TransportError::EventsTaken)
        ));
    }

    #[test]
    fn test_is_server_only_for_server_node() {
        let (network, server) = MemoryNetwork::new();
        let client = network.join();
        assert!(server.is_server());
        assert!(!client.is_server());
        assert_eq!(client.server_node(), server.local_node());
    }
}
