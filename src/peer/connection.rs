use super::bitfield::Bitfield;
use super::error::PeerError;
use super::message::{Handshake, Message};
use super::peer_id::PeerId;
use super::transport::PeerTransport;
use crate::constants::{CONNECTION_TIMEOUT, HANDSHAKE_TIMEOUT};
use crate::metainfo::InfoHash;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Lifecycle of a peer connection.
///
/// `Connecting` and `Handshaking` are passed through inside
/// [`PeerConnection::connect`], [`PeerConnection::outbound`] and
/// [`PeerConnection::accept`], before a connection value exists. They only
/// show up in trace logs; [`PeerConnection::state`] is `Ready` or `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP connection in progress.
    Connecting,
    /// Connected, exchanging the BitTorrent handshake.
    Handshaking,
    /// Handshake verified; messages flow.
    Ready,
    /// Closed after an error or on request. Terminal.
    Closed,
}

/// The four independent choke/interest flags of a ready connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChokingState {
    /// We refuse to serve the peer.
    pub am_choking: bool,
    pub am_interested: bool,
    /// The peer refuses to serve us.
    pub peer_choking: bool,
    pub peer_interested: bool,
}

impl Default for ChokingState {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

/// A connection to a BitTorrent peer.
///
/// Tracks the handshake, the choke/interest flags and the peer's bitfield.
/// Any I/O error, malformed frame or timeout closes the connection.
///
/// # Examples
///
/// ```no_run
/// use piecemeal::metainfo::InfoHash;
/// use piecemeal::peer::{Message, PeerConnection, PeerId};
/// use std::net::SocketAddr;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let addr: SocketAddr = "192.168.1.100:6881".parse()?;
/// let info_hash = InfoHash::new([0u8; 20]);
///
/// let mut conn = PeerConnection::connect(addr, info_hash, PeerId::generate(), 128).await?;
/// conn.send(Message::Interested).await?;
/// # Ok(())
/// # }
/// ```
pub struct PeerConnection<S = TcpStream> {
    addr: Option<SocketAddr>,
    peer_id: PeerId,
    state: ConnectionState,
    choking: ChokingState,
    bitfield: Bitfield,
    connected_at: Instant,
    last_message_at: Instant,
    bytes_downloaded: u64,
    bytes_uploaded: u64,
    transport: Option<PeerTransport<S>>,
}

impl PeerConnection<TcpStream> {
    /// Opens a TCP connection and performs the outbound handshake.
    pub async fn connect(
        addr: SocketAddr,
        info_hash: InfoHash,
        our_peer_id: PeerId,
        piece_count: usize,
    ) -> Result<Self, PeerError> {
        trace!(%addr, state = ?ConnectionState::Connecting, "connecting to peer");
        let stream = timeout(CONNECTION_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::Timeout)??;

        let mut conn = Self::outbound(stream, info_hash, our_peer_id, piece_count).await?;
        conn.addr = Some(addr);
        Ok(conn)
    }
}

impl<S> PeerConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Performs the outbound handshake over an established stream: send
    /// ours, then require the peer to echo our info hash.
    pub async fn outbound(
        stream: S,
        info_hash: InfoHash,
        our_peer_id: PeerId,
        piece_count: usize,
    ) -> Result<Self, PeerError> {
        trace!(state = ?ConnectionState::Handshaking, "sending handshake");
        let mut transport = PeerTransport::new(stream);

        let theirs = timeout(HANDSHAKE_TIMEOUT, async {
            transport
                .send_handshake(&Handshake::new(info_hash, our_peer_id))
                .await?;
            let theirs = transport.receive_handshake().await?;
            if theirs.info_hash != info_hash {
                return Err(PeerError::HandshakeMismatch);
            }
            Ok(theirs)
        })
        .await
        .map_err(|_| PeerError::Timeout)??;

        Ok(Self::ready(transport, theirs.peer_id, piece_count))
    }

    /// Performs the inbound handshake: read the peer's preamble, check it is
    /// for our torrent, then answer.
    pub async fn accept(
        stream: S,
        info_hash: InfoHash,
        our_peer_id: PeerId,
        piece_count: usize,
    ) -> Result<Self, PeerError> {
        trace!(state = ?ConnectionState::Handshaking, "awaiting handshake");
        let mut transport = PeerTransport::new(stream);

        let theirs = timeout(HANDSHAKE_TIMEOUT, async {
            let theirs = transport.receive_handshake().await?;
            if theirs.info_hash != info_hash {
                return Err(PeerError::HandshakeMismatch);
            }
            transport
                .send_handshake(&Handshake::new(info_hash, our_peer_id))
                .await?;
            Ok(theirs)
        })
        .await
        .map_err(|_| PeerError::Timeout)??;

        Ok(Self::ready(transport, theirs.peer_id, piece_count))
    }

    fn ready(transport: PeerTransport<S>, peer_id: PeerId, piece_count: usize) -> Self {
        debug!(?peer_id, "handshake complete");
        let now = Instant::now();
        Self {
            addr: None,
            peer_id,
            state: ConnectionState::Ready,
            choking: ChokingState::default(),
            bitfield: Bitfield::new(piece_count),
            connected_at: now,
            last_message_at: now,
            bytes_downloaded: 0,
            bytes_uploaded: 0,
            transport: Some(transport),
        }
    }

    /// Sends a message and updates our side of the choke/interest flags.
    ///
    /// A `request` is refused with [`PeerError::RequestNotPermitted`], and
    /// never written, unless the peer has unchoked us and we are interested.
    pub async fn send(&mut self, message: Message) -> Result<(), PeerError> {
        if matches!(message, Message::Request { .. }) && !self.can_request() {
            return Err(PeerError::RequestNotPermitted);
        }

        let transport = self.transport.as_mut().ok_or(PeerError::ConnectionClosed)?;
        if let Err(e) = transport.send_message(&message).await {
            self.close();
            return Err(e);
        }

        match &message {
            Message::Choke => self.choking.am_choking = true,
            Message::Unchoke => self.choking.am_choking = false,
            Message::Interested => self.choking.am_interested = true,
            Message::NotInterested => self.choking.am_interested = false,
            Message::Piece { data, .. } => self.bytes_uploaded += data.len() as u64,
            _ => {}
        }

        Ok(())
    }

    pub async fn send_request(
        &mut self,
        index: u32,
        begin: u32,
        length: u32,
    ) -> Result<(), PeerError> {
        self.send(Message::Request {
            index,
            begin,
            length,
        })
        .await
    }

    /// Receives the next message and applies it to the connection state.
    ///
    /// Keep-alives are returned like any other message. Cancel safe.
    pub async fn receive(&mut self) -> Result<Message, PeerError> {
        let transport = self.transport.as_mut().ok_or(PeerError::ConnectionClosed)?;

        let result = match transport.receive_message().await {
            Ok(message) => self.apply(&message).map(|_| message),
            Err(e) => Err(e),
        };

        if result.is_err() {
            self.close();
        }
        result
    }

    fn apply(&mut self, message: &Message) -> Result<(), PeerError> {
        self.last_message_at = Instant::now();

        match message {
            Message::Choke => self.choking.peer_choking = true,
            Message::Unchoke => self.choking.peer_choking = false,
            Message::Interested => self.choking.peer_interested = true,
            Message::NotInterested => self.choking.peer_interested = false,
            Message::Have { piece } => {
                self.check_index(*piece, "have")?;
                self.bitfield.set(*piece as usize);
            }
            Message::Bitfield(bytes) => {
                self.bitfield = Bitfield::from_payload(bytes, self.bitfield.piece_count())?;
            }
            Message::Request { index, .. } => self.check_index(*index, "request")?,
            Message::Cancel { index, .. } => self.check_index(*index, "cancel")?,
            Message::Piece { index, data, .. } => {
                self.check_index(*index, "piece")?;
                self.bytes_downloaded += data.len() as u64;
            }
            Message::KeepAlive | Message::Port(_) => {}
        }

        Ok(())
    }

    fn check_index(&self, index: u32, what: &str) -> Result<(), PeerError> {
        if index as usize >= self.bitfield.piece_count() {
            return Err(PeerError::Protocol(format!(
                "{} for piece {} of {}",
                what,
                index,
                self.bitfield.piece_count()
            )));
        }
        Ok(())
    }

    /// Longest wait for the next frame before the connection counts as idle.
    pub fn set_read_timeout(&mut self, read_timeout: Duration) {
        if let Some(transport) = self.transport.as_mut() {
            transport.set_read_timeout(read_timeout);
        }
    }

    /// Drops the transport. Idempotent.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            debug!(peer_id = ?self.peer_id, addr = ?self.addr, "connection closed");
        }
        self.state = ConnectionState::Closed;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready && self.transport.is_some()
    }

    /// True iff the peer has unchoked us and we have declared interest.
    pub fn can_request(&self) -> bool {
        self.is_ready() && !self.choking.peer_choking && self.choking.am_interested
    }

    pub fn choking(&self) -> ChokingState {
        self.choking
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Pieces the peer has advertised.
    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn last_message_at(&self) -> Instant {
        self.last_message_at
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }
}
