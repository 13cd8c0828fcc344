//! Peer wire protocol (BEP-3)
//!
//! Handshake, message framing and the per-connection choke/interest state.
//! No extensions are negotiated: reserved bytes are always zero.

mod bitfield;
mod connection;
mod error;
mod message;
mod peer_id;
mod transport;

pub use bitfield::Bitfield;
pub use connection::{ChokingState, ConnectionState, PeerConnection};
pub use error::PeerError;
pub use message::{Handshake, Message, MessageId, HANDSHAKE_LEN};
pub use peer_id::PeerId;
pub use transport::PeerTransport;

#[cfg(test)]
mod tests;
