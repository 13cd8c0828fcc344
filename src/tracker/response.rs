use super::error::TrackerError;
use crate::bencode::{decode, Dict, Value};
use crate::constants::DEFAULT_ANNOUNCE_INTERVAL;
use crate::peer::PeerId;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// A peer returned from a tracker.
///
/// The peer ID is only present in non-compact responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// The peer's socket address (IP and port).
    pub addr: SocketAddr,
    /// The peer's 20-byte ID, if the tracker sent one.
    pub peer_id: Option<PeerId>,
}

impl Peer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            peer_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    None,
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::None => "",
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Seconds the tracker wants us to wait before the next announce.
    pub interval: u32,
    pub min_interval: Option<u32>,
    pub complete: Option<u32>,
    pub incomplete: Option<u32>,
    pub peers: Vec<Peer>,
    pub warning_message: Option<String>,
    pub tracker_id: Option<String>,
}

impl AnnounceResponse {
    pub fn new(interval: u32) -> Self {
        Self {
            interval,
            min_interval: None,
            complete: None,
            incomplete: None,
            peers: Vec::new(),
            warning_message: None,
            tracker_id: None,
        }
    }

    /// The re-announce period. A zero interval falls back to the default,
    /// and a `min interval` above it wins.
    pub fn interval_duration(&self) -> Duration {
        let interval = match self.interval {
            0 => DEFAULT_ANNOUNCE_INTERVAL,
            secs => Duration::from_secs(u64::from(secs)),
        };
        let floor = Duration::from_secs(u64::from(self.min_interval.unwrap_or(0)));
        interval.max(floor)
    }
}

/// One entry of a compact peer list: 4-byte IPv4 address, 2-byte port,
/// both big-endian.
#[derive(Debug, Clone, Copy)]
pub struct CompactPeer {
    pub ip: IpAddr,
    pub port: u16,
}

impl CompactPeer {
    pub const LEN: usize = 6;

    pub fn from_v4_bytes(bytes: &[u8]) -> Option<Self> {
        let &[a, b, c, d, hi, lo, ..] = bytes else {
            return None;
        };
        Some(Self {
            ip: IpAddr::V4(Ipv4Addr::new(a, b, c, d)),
            port: u16::from_be_bytes([hi, lo]),
        })
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// Parses a compact peer string. A trailing partial entry is ignored.
pub fn parse_compact_peers(data: &[u8]) -> Vec<Peer> {
    data.chunks_exact(CompactPeer::LEN)
        .filter_map(CompactPeer::from_v4_bytes)
        .map(|p| Peer::new(p.to_socket_addr()))
        .collect()
}

/// Dictionary-model peers. Entries without a parseable `ip` and `port`
/// are skipped rather than failing the whole response.
fn parse_peer_dicts(list: &[Value]) -> Vec<Peer> {
    list.iter()
        .filter_map(Value::as_dict)
        .filter_map(|entry| {
            let ip: IpAddr = entry.get(b"ip")?.as_str()?.parse().ok()?;
            let port = u16::try_from(entry.get(b"port")?.as_integer()?).ok()?;
            let peer_id = entry
                .get(b"peer id")
                .and_then(Value::as_bytes)
                .and_then(|b| PeerId::from_bytes(b));
            Some(Peer {
                addr: SocketAddr::new(ip, port),
                peer_id,
            })
        })
        .collect()
}

fn optional_u32(dict: &Dict, key: &[u8]) -> Option<u32> {
    dict.get(key)
        .and_then(|v| v.as_integer())
        .and_then(|v| u32::try_from(v).ok())
}

/// Decodes a bencoded announce response body.
pub fn parse_announce_response(body: &[u8]) -> Result<AnnounceResponse, TrackerError> {
    let value = decode(body)?;
    let dict = value
        .as_dict()
        .ok_or_else(|| TrackerError::InvalidResponse("expected dict".into()))?;

    if let Some(failure) = dict.get(b"failure reason") {
        let reason = failure
            .as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .ok_or_else(|| TrackerError::InvalidResponse("failure reason is not a string".into()))?;
        return Err(TrackerError::Rejected(reason));
    }

    let interval = dict
        .get(b"interval")
        .and_then(|v| v.as_integer())
        .ok_or_else(|| TrackerError::InvalidResponse("missing interval".into()))?;
    let interval = u32::try_from(interval)
        .map_err(|_| TrackerError::InvalidResponse(format!("invalid interval {}", interval)))?;

    let mut response = AnnounceResponse::new(interval);

    response.min_interval = optional_u32(dict, b"min interval");
    response.complete = optional_u32(dict, b"complete");
    response.incomplete = optional_u32(dict, b"incomplete");

    response.warning_message = dict
        .get(b"warning message")
        .and_then(|v| v.as_str())
        .map(String::from);

    response.tracker_id = dict
        .get(b"tracker id")
        .and_then(|v| v.as_str())
        .map(String::from);

    match dict.get(b"peers") {
        Some(Value::Bytes(bytes)) => response.peers = parse_compact_peers(bytes),
        Some(Value::List(list)) => response.peers = parse_peer_dicts(list),
        Some(other) => {
            return Err(TrackerError::InvalidResponse(format!(
                "peers is a {}",
                other.kind()
            )))
        }
        None => {}
    }

    Ok(response)
}
