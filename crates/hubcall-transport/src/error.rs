use crate::NodeId;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The destination node is not connected to this network.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// A frame arrived that could not be parsed.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Connecting to the server failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// The event stream was already handed out to another consumer.
    #[error("event stream already taken")]
    EventsTaken,
}
