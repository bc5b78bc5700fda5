//! Peer-addressed framing for star transports.
//!
//! Every frame starts with an 8-byte big-endian node id. On the way to
//! the server it names the destination; on the way from the server it
//! names the origin. [`BROADCAST`] as destination means "everyone".

use crate::{NodeId, TransportError};

/// Destination id meaning "every node except the sender".
pub const BROADCAST: NodeId = NodeId(u64::MAX);

const HEADER_LEN: usize = 8;

/// Prefixes `data` with the peer header.
pub fn encode_frame(peer: NodeId, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + data.len());
    frame.extend_from_slice(&peer.into_inner().to_be_bytes());
    frame.extend_from_slice(data);
    frame
}

/// Splits a frame into its peer header and payload.
pub fn decode_frame(frame: &[u8]) -> Result<(NodeId, &[u8]), TransportError> {
    if frame.len() < HEADER_LEN {
        return Err(TransportError::MalformedFrame(format!(
            "frame of {} bytes is shorter than the header",
            frame.len()
        )));
    }
    let (header, payload) = frame.split_at(HEADER_LEN);
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(header);
    Ok((NodeId::new(u64::from_be_bytes(raw)), payload))
}

/// Encodes the handshake the server sends to a freshly accepted client:
/// the server's id followed by the id assigned to the client.
#[cfg_attr(not(feature = "websocket"), allow(dead_code))]
pub(crate) fn encode_handshake(server: NodeId, assigned: NodeId) -> Vec<u8> {
    encode_frame(server, &assigned.into_inner().to_be_bytes())
}

/// Parses the handshake frame, returning `(server, assigned)`.
#[cfg_attr(not(feature = "websocket"), allow(dead_code))]
pub(crate) fn decode_handshake(
    frame: &[u8],
) -> Result<(NodeId, NodeId), TransportError> {
    let (server, rest) = decode_frame(frame)?;
    let (assigned, trailing) = decode_frame(rest)?;
    if !trailing.is_empty() {
        return Err(TransportError::MalformedFrame(
            "handshake has trailing bytes".into(),
        ));
    }
    Ok((server, assigned))
}
