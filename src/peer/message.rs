use super::error::PeerError;
use super::peer_id::PeerId;
use crate::constants::{PROTOCOL_STRING, RESERVED_BYTES};
use crate::metainfo::InfoHash;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const HANDSHAKE_LEN: usize = 68;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Port = 9,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            9 => Ok(MessageId::Port),
            _ => Err(PeerError::InvalidMessageId(value)),
        }
    }
}

/// The 68-byte connection preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            reserved: RESERVED_BYTES,
            info_hash,
            peer_id,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL_STRING.len() as u8);
        buf.put_slice(PROTOCOL_STRING);
        buf.put_slice(&self.reserved);
        buf.put_slice(self.info_hash.as_bytes());
        buf.put_slice(self.peer_id.as_bytes());
        buf.freeze()
    }

    /// Parses a handshake from the first [`HANDSHAKE_LEN`] bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        let mut buf = data
            .get(..HANDSHAKE_LEN)
            .ok_or(PeerError::InvalidHandshake)?;

        let pstrlen = buf.get_u8() as usize;
        if pstrlen != PROTOCOL_STRING.len() || &buf[..pstrlen] != PROTOCOL_STRING {
            return Err(PeerError::InvalidHandshake);
        }
        buf.advance(pstrlen);

        let mut reserved = [0u8; 8];
        buf.copy_to_slice(&mut reserved);
        let mut info_hash = [0u8; 20];
        buf.copy_to_slice(&mut info_hash);
        let mut peer_id = [0u8; 20];
        buf.copy_to_slice(&mut peer_id);

        Ok(Self {
            reserved,
            info_hash: InfoHash::new(info_hash),
            peer_id: PeerId(peer_id),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece: u32 },
    Bitfield(Bytes),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, data: Bytes },
    Cancel { index: u32, begin: u32, length: u32 },
    /// DHT port advertisement. Accepted and ignored.
    Port(u16),
}

impl Message {
    pub fn id(&self) -> Option<MessageId> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Bitfield(_) => Some(MessageId::Bitfield),
            Message::Request { .. } => Some(MessageId::Request),
            Message::Piece { .. } => Some(MessageId::Piece),
            Message::Cancel { .. } => Some(MessageId::Cancel),
            Message::Port(_) => Some(MessageId::Port),
        }
    }

    /// Encodes the message with its 4-byte length prefix.
    pub fn encode(&self) -> Bytes {
        let Some(id) = self.id() else {
            return Bytes::from_static(&[0, 0, 0, 0]);
        };

        let payload_len = self.payload_len();
        let mut buf = BytesMut::with_capacity(5 + payload_len);
        buf.put_u32(1 + payload_len as u32);
        buf.put_u8(id as u8);

        match self {
            Message::Have { piece } => buf.put_u32(*piece),
            Message::Bitfield(bits) => buf.put_slice(bits),
            Message::Request {
                index,
                begin,
                length,
            }
            | Message::Cancel {
                index,
                begin,
                length,
            } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, data } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(data);
            }
            Message::Port(port) => buf.put_u16(*port),
            _ => {}
        }

        buf.freeze()
    }

    /// Bytes that follow the id byte on the wire.
    fn payload_len(&self) -> usize {
        match self {
            Message::Have { .. } => 4,
            Message::Bitfield(bits) => bits.len(),
            Message::Request { .. } | Message::Cancel { .. } => 12,
            Message::Piece { data, .. } => 8 + data.len(),
            Message::Port(_) => 2,
            _ => 0,
        }
    }

    /// Decodes one length-prefixed frame. `data` must hold the whole frame.
    pub fn decode(mut data: Bytes) -> Result<Self, PeerError> {
        if data.len() < 4 {
            return Err(PeerError::InvalidMessage("too short".into()));
        }

        let length = data.get_u32() as usize;

        if length == 0 {
            return Ok(Message::KeepAlive);
        }

        if data.remaining() < length {
            return Err(PeerError::InvalidMessage("incomplete message".into()));
        }

        let id = MessageId::try_from(data.get_u8())?;
        let payload_len = length - 1;

        let expect = |expected: usize, name: &str| {
            if payload_len == expected {
                Ok(())
            } else {
                Err(PeerError::InvalidMessage(format!(
                    "{} payload is {} bytes, expected {}",
                    name, payload_len, expected
                )))
            }
        };

        match id {
            MessageId::Choke => expect(0, "choke").map(|_| Message::Choke),
            MessageId::Unchoke => expect(0, "unchoke").map(|_| Message::Unchoke),
            MessageId::Interested => expect(0, "interested").map(|_| Message::Interested),
            MessageId::NotInterested => {
                expect(0, "not interested").map(|_| Message::NotInterested)
            }
            MessageId::Have => {
                expect(4, "have")?;
                Ok(Message::Have {
                    piece: data.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield(data.copy_to_bytes(payload_len))),
            MessageId::Request => {
                expect(12, "request")?;
                Ok(Message::Request {
                    index: data.get_u32(),
                    begin: data.get_u32(),
                    length: data.get_u32(),
                })
            }
            MessageId::Piece => {
                if payload_len < 8 {
                    return Err(PeerError::InvalidMessage("piece too short".into()));
                }
                let index = data.get_u32();
                let begin = data.get_u32();
                let block_data = data.copy_to_bytes(payload_len - 8);
                Ok(Message::Piece {
                    index,
                    begin,
                    data: block_data,
                })
            }
            MessageId::Cancel => {
                expect(12, "cancel")?;
                Ok(Message::Cancel {
                    index: data.get_u32(),
                    begin: data.get_u32(),
                    length: data.get_u32(),
                })
            }
            MessageId::Port => {
                expect(2, "port")?;
                Ok(Message::Port(data.get_u16()))
            }
        }
    }
}
