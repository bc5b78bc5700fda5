//! WebSocket star network using `tokio-tungstenite`.
//!
//! The server accepts connections, assigns each peer a [`NodeId`] in a
//! handshake frame, and relays frames addressed to other peers. Each
//! connection has one reader task (which preserves the peer's ordering on
//! the shared event stream) and one writer task fed by an unbounded
//! channel, so `send` never waits on the socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::frame::{decode_handshake, encode_handshake};
use crate::{
    BROADCAST, EventStream, NetEvent, NodeId, NodeMessenger, TransportError,
    decode_frame, encode_frame,
};

/// The server always owns node id 0; peers count up from 1.
const SERVER_NODE: NodeId = NodeId(0);

/// Counter for generating unique peer ids.
static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// What a writer task should do next.
enum Outbound {
    Frame(Vec<u8>),
    Close,
}

type PeerTable = Arc<Mutex<HashMap<NodeId, mpsc::UnboundedSender<Outbound>>>>;

fn lock_peers(
    peers: &PeerTable,
) -> MutexGuard<'_, HashMap<NodeId, mpsc::UnboundedSender<Outbound>>> {
    peers.lock().unwrap_or_else(PoisonError::into_inner)
}

fn io_error(
    kind: std::io::ErrorKind,
    e: tungstenite::Error,
) -> std::io::Error {
    std::io::Error::new(kind, e)
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// The server side of a WebSocket star network.
pub struct WebSocketServer {
    local_addr: SocketAddr,
    peers: PeerTable,
    events: Mutex<Option<EventStream>>,
}

impl WebSocketServer {
    /// Binds the server and starts accepting peers in the background.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        let local_addr =
            listener.local_addr().map_err(TransportError::AcceptFailed)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let peers: PeerTable = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(accept_loop(listener, Arc::clone(&peers), events_tx));

        tracing::info!(%local_addr, "WebSocket server listening");
        Ok(Self {
            local_addr,
            peers,
            events: Mutex::new(Some(events_rx)),
        })
    }

    /// Returns the address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the ids of all currently connected peers.
    pub fn peers(&self) -> Vec<NodeId> {
        lock_peers(&self.peers).keys().copied().collect()
    }

    /// Closes the connection to `node`. Returns `false` if it wasn't connected.
    pub fn disconnect(&self, node: NodeId) -> bool {
        match lock_peers(&self.peers).get(&node) {
            Some(tx) => tx.send(Outbound::Close).is_ok(),
            None => false,
        }
    }
}

impl NodeMessenger for WebSocketServer {
    fn local_node(&self) -> NodeId {
        SERVER_NODE
    }

    fn server_node(&self) -> NodeId {
        SERVER_NODE
    }

    async fn send(
        &self,
        to: NodeId,
        data: Vec<u8>,
    ) -> Result<(), TransportError> {
        let frame = encode_frame(SERVER_NODE, &data);
        let peers = lock_peers(&self.peers);
        let peer = peers.get(&to).ok_or(TransportError::UnknownNode(to))?;
        peer.send(Outbound::Frame(frame))
            .map_err(|_| TransportError::UnknownNode(to))
    }

    async fn broadcast(&self, data: Vec<u8>) -> Result<(), TransportError> {
        let frame = encode_frame(SERVER_NODE, &data);
        for peer in lock_peers(&self.peers).values() {
            let _ = peer.send(Outbound::Frame(frame.clone()));
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

async fn accept_loop(
    listener: TcpListener,
    peers: PeerTable,
    events: mpsc::UnboundedSender<NetEvent>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                continue;
            }
        };
        if events.is_closed() {
            tracing::info!("event consumer gone, accept loop stopping");
            break;
        }

        let peers = Arc::clone(&peers);
        let events = events.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_peer(stream, addr, peers, events).await {
                tracing::debug!(%addr, error = %e, "peer connection ended with error");
            }
        });
    }
}

/// Runs one peer connection from handshake to close.
async fn serve_peer(
    stream: TcpStream,
    addr: SocketAddr,
    peers: PeerTable,
    events: mpsc::UnboundedSender<NetEvent>,
) -> Result<(), TransportError> {
    let ws = tokio_tungstenite::accept_async(stream).await.map_err(|e| {
        TransportError::AcceptFailed(io_error(
            std::io::ErrorKind::ConnectionRefused,
            e,
        ))
    })?;

    let node = NodeId::new(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed));
    let (mut sink, mut stream) = ws.split();
    sink.send(Message::Binary(encode_handshake(SERVER_NODE, node).into()))
        .await
        .map_err(|e| {
            TransportError::SendFailed(io_error(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })?;

    let (tx, rx) = mpsc::unbounded_channel();
    lock_peers(&peers).insert(node, tx);
    let writer = tokio::spawn(write_frames(sink, rx));
    tracing::info!(%node, %addr, "peer connected");

    let result = relay_frames(node, &mut stream, &peers, &events).await;

    lock_peers(&peers).remove(&node);
    writer.abort();
    let _ = events.send(NetEvent::NodeLeft(node));
    tracing::info!(%node, "peer disconnected");
    result
}

/// Reads frames from one peer and delivers or relays them.
async fn relay_frames<S>(
    node: NodeId,
    stream: &mut S,
    peers: &PeerTable,
    events: &mpsc::UnboundedSender<NetEvent>,
) -> Result<(), TransportError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        let data: Vec<u8> = match msg {
            Ok(Message::Binary(data)) => data.into(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue, // skip text/ping/pong/frame
            Err(e) => {
                return Err(TransportError::ReceiveFailed(io_error(
                    std::io::ErrorKind::ConnectionReset,
                    e,
                )));
            }
        };

        let (to, payload) = match decode_frame(&data) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(%node, error = %e, "dropping malformed frame");
                continue;
            }
        };

        if to == SERVER_NODE || to == BROADCAST {
            let _ = events.send(NetEvent::Message {
                from: node,
                data: payload.to_vec(),
            });
        }

        if to == BROADCAST {
            let relayed = encode_frame(node, payload);
            for (peer, tx) in lock_peers(peers).iter() {
                if *peer != node {
                    let _ = tx.send(Outbound::Frame(relayed.clone()));
                }
            }
        } else if to != SERVER_NODE {
            let relayed = encode_frame(node, payload);
            match lock_peers(peers).get(&to) {
                Some(tx) => {
                    let _ = tx.send(Outbound::Frame(relayed));
                }
                None => {
                    tracing::warn!(%node, %to, "relay target not connected");
                }
            }
        }
    }
    Ok(())
}

async fn write_frames<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send(Message::Binary(frame.into())).await {
                    tracing::debug!(error = %e, "write failed, closing writer");
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.close().await;
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A client node connected to a [`WebSocketServer`].
pub struct WebSocketClient {
    local: NodeId,
    server: NodeId,
    outbound: mpsc::UnboundedSender<Outbound>,
    connected: Arc<AtomicBool>,
    events: Mutex<Option<EventStream>>,
}

impl WebSocketClient {
    /// Connects to the server at `addr` (`host:port`) and waits for the
    /// handshake that assigns this node its id.
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let url = format!("ws://{addr}");
        let (ws, _) =
            tokio_tungstenite::connect_async(url).await.map_err(|e| {
                TransportError::ConnectFailed(io_error(
                    std::io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;
        let (sink, mut stream) = ws.split();

        let handshake: Vec<u8> = loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => break data.into(),
                Some(Ok(Message::Close(_))) | None => {
                    return Err(TransportError::ConnectionClosed(
                        "closed before handshake".into(),
                    ));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(io_error(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        };
        let (server, local) = decode_handshake(&handshake)?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(write_frames(sink, outbound_rx));
        tokio::spawn(read_frames(
            local,
            stream,
            events_tx,
            Arc::clone(&connected),
        ));

        tracing::info!(%local, %server, addr, "connected to server");
        Ok(Self {
            local,
            server,
            outbound: outbound_tx,
            connected,
            events: Mutex::new(Some(events_rx)),
        })
    }

    /// Returns `true` until the connection to the server is lost.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Closes the connection to the server.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    fn push(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed(format!(
                "{} lost its server connection",
                self.local
            )));
        }
        self.outbound.send(Outbound::Frame(frame)).map_err(|_| {
            TransportError::ConnectionClosed("writer task stopped".into())
        })
    }
}

impl NodeMessenger for WebSocketClient {
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
        self.push(encode_frame(to, &data))
    }

    async fn broadcast(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.push(encode_frame(BROADCAST, &data))
    }

    fn take_events(&self) -> Result<EventStream, TransportError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TransportError::EventsTaken)
    }
}

async fn read_frames<S>(
    local: NodeId,
    mut stream: S,
    events: mpsc::UnboundedSender<NetEvent>,
    connected: Arc<AtomicBool>,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        let data: Vec<u8> = match msg {
            Ok(Message::Binary(data)) => data.into(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(%local, error = %e, "recv error");
                break;
            }
        };
        match decode_frame(&data) {
            Ok((from, payload)) => {
                let _ = events.send(NetEvent::Message {
                    from,
                    data: payload.to_vec(),
                });
            }
            Err(e) => {
                tracing::warn!(%local, error = %e, "dropping malformed frame");
            }
        }
    }

    connected.store(false, Ordering::Release);
    let _ = events.send(NetEvent::ConnectionLost);
    tracing::info!(%local, "connection to server lost");
}
