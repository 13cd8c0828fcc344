use super::*;
use crate::metainfo::InfoHash;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

const INFO_HASH: [u8; 20] = [7u8; 20];

async fn connected(
    piece_count: usize,
) -> (PeerConnection<DuplexStream>, PeerTransport<DuplexStream>) {
    let (local, far) = duplex(1 << 16);
    let info_hash = InfoHash::new(INFO_HASH);
    let mut remote = PeerTransport::new(far);

    let (conn, _) = tokio::join!(
        PeerConnection::outbound(local, info_hash, PeerId::generate(), piece_count),
        async {
            let hs = remote.receive_handshake().await.unwrap();
            remote
                .send_handshake(&Handshake::new(hs.info_hash, PeerId::generate()))
                .await
                .unwrap();
        }
    );

    (conn.unwrap(), remote)
}

#[test]
fn test_peer_id_generate() {
    let id1 = PeerId::generate();
    let id2 = PeerId::generate();
    assert_ne!(id1, id2);
    assert_eq!(&id1.as_bytes()[..8], b"-PM0001-");
    assert_eq!(id1.client_id(), Some("PM0001"));
    assert!(PeerId::from_bytes(&[0u8; 19]).is_none());
}

#[test]
fn test_bitfield() {
    let mut bf = Bitfield::new(100);
    assert!(!bf.has(0));
    assert_eq!(bf.as_bytes().len(), 13);

    bf.set(0);
    bf.set(99);
    assert!(bf.has(0));
    assert!(bf.has(99));

    bf.clear(0);
    assert!(!bf.has(0));
    assert!(!bf.has(100));
    assert_eq!(bf.count(), 1);
    assert_eq!(bf.iter_set().collect::<Vec<_>>(), vec![99]);
}

#[test]
fn test_bitfield_high_bit_first() {
    let bf = Bitfield::from_payload(&[0x80, 0x40], 16).unwrap();
    assert!(bf.has(0));
    assert!(!bf.has(1));
    assert!(bf.has(9));
    assert_eq!(bf.count(), 2);
}

#[test]
fn test_bitfield_full_clears_spare_bits() {
    let bf = Bitfield::full(10);
    assert_eq!(bf.as_bytes(), &[0xFF, 0xC0]);
    assert!(bf.is_complete());
}

#[test]
fn test_bitfield_payload_validation() {
    assert!(matches!(
        Bitfield::from_payload(&[0xFF], 10),
        Err(PeerError::Protocol(_))
    ));
    assert!(matches!(
        Bitfield::from_payload(&[0xFF, 0xFF], 10),
        Err(PeerError::Protocol(_))
    ));
    assert!(Bitfield::from_payload(&[0xFF, 0xC0], 10).is_ok());
}

#[test]
fn test_handshake_layout() {
    let peer_id = PeerId([2u8; 20]);
    let handshake = Handshake::new(InfoHash::new([1u8; 20]), peer_id);
    let encoded = handshake.encode();

    assert_eq!(encoded.len(), HANDSHAKE_LEN);
    assert_eq!(encoded[0], 19);
    assert_eq!(&encoded[1..20], b"BitTorrent protocol");
    assert_eq!(&encoded[20..28], &[0u8; 8]);
    assert_eq!(&encoded[28..48], &[1u8; 20]);
    assert_eq!(&encoded[48..68], &[2u8; 20]);

    assert_eq!(Handshake::decode(&encoded).unwrap(), handshake);
}

#[test]
fn test_handshake_rejects_other_protocol() {
    let mut encoded = Handshake::new(InfoHash::new([1u8; 20]), PeerId([2u8; 20]))
        .encode()
        .to_vec();
    encoded[1] = b'b';
    assert!(matches!(
        Handshake::decode(&encoded),
        Err(PeerError::InvalidHandshake)
    ));
    assert!(matches!(
        Handshake::decode(&encoded[..40]),
        Err(PeerError::InvalidHandshake)
    ));
}

#[test]
fn test_message_wire_bytes() {
    assert_eq!(Message::KeepAlive.encode().as_ref(), &[0, 0, 0, 0]);
    assert_eq!(Message::Interested.encode().as_ref(), &[0, 0, 0, 1, 2]);
    assert_eq!(
        Message::Have { piece: 42 }.encode().as_ref(),
        &[0, 0, 0, 5, 4, 0, 0, 0, 42]
    );
    assert_eq!(
        Message::Request {
            index: 1,
            begin: 0x4000,
            length: 0x4000,
        }
        .encode()
        .as_ref(),
        &[0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0x40, 0, 0, 0, 0x40, 0]
    );
    assert_eq!(
        Message::Port(6881).encode().as_ref(),
        &[0, 0, 0, 3, 9, 0x1A, 0xE1]
    );
}

#[test]
fn test_message_decode() {
    let messages = vec![
        Message::KeepAlive,
        Message::Choke,
        Message::Unchoke,
        Message::NotInterested,
        Message::Bitfield(Bytes::from_static(&[0xA0])),
        Message::Cancel {
            index: 3,
            begin: 16384,
            length: 16384,
        },
        Message::Piece {
            index: 0,
            begin: 0,
            data: Bytes::from_static(b"hello world"),
        },
    ];

    for msg in messages {
        assert_eq!(Message::decode(msg.encode()).unwrap(), msg);
    }
}

#[test]
fn test_message_decode_invalid() {
    assert!(matches!(
        Message::decode(Bytes::from_static(&[0, 0, 0, 1, 20])),
        Err(PeerError::InvalidMessageId(20))
    ));
    assert!(matches!(
        Message::decode(Bytes::from_static(&[0, 0, 0, 3, 4, 0, 0])),
        Err(PeerError::InvalidMessage(_))
    ));
    assert!(matches!(
        Message::decode(Bytes::from_static(&[0, 0, 0, 2, 0, 0])),
        Err(PeerError::InvalidMessage(_))
    ));
    assert!(matches!(
        Message::decode(Bytes::from_static(&[0, 0, 0, 5, 4])),
        Err(PeerError::InvalidMessage(_))
    ));
}

#[test]
fn test_choking_state_default() {
    let state = ChokingState::default();
    assert!(state.am_choking);
    assert!(!state.am_interested);
    assert!(state.peer_choking);
    assert!(!state.peer_interested);
}

#[tokio::test]
async fn test_outbound_handshake() {
    let (conn, _remote) = connected(8).await;
    assert_eq!(conn.state(), ConnectionState::Ready);
    assert!(conn.is_ready());
    assert!(!conn.can_request());
    assert_eq!(conn.peer_id().client_id(), Some("PM0001"));
    assert_eq!(conn.bitfield().piece_count(), 8);
}

#[tokio::test]
async fn test_outbound_handshake_mismatch() {
    let (local, far) = duplex(1 << 16);
    let mut remote = PeerTransport::new(far);

    let (result, _) = tokio::join!(
        PeerConnection::outbound(local, InfoHash::new(INFO_HASH), PeerId::generate(), 8),
        async {
            remote.receive_handshake().await.unwrap();
            remote
                .send_handshake(&Handshake::new(
                    InfoHash::new([9u8; 20]),
                    PeerId::generate(),
                ))
                .await
                .unwrap();
        }
    );

    assert!(matches!(result, Err(PeerError::HandshakeMismatch)));
}

#[tokio::test]
async fn test_inbound_handshake() {
    let (local, far) = duplex(1 << 16);
    let info_hash = InfoHash::new(INFO_HASH);
    let mut remote = PeerTransport::new(far);
    let remote_id = PeerId([5u8; 20]);

    let (conn, reply) = tokio::join!(
        PeerConnection::accept(local, info_hash, PeerId::generate(), 8),
        async {
            remote
                .send_handshake(&Handshake::new(info_hash, remote_id))
                .await
                .unwrap();
            remote.receive_handshake().await
        }
    );

    let conn = conn.unwrap();
    assert_eq!(conn.peer_id(), remote_id);
    assert_eq!(reply.unwrap().info_hash, info_hash);
}

#[tokio::test]
async fn test_inbound_handshake_for_other_torrent() {
    let (local, far) = duplex(1 << 16);
    let mut remote = PeerTransport::new(far);

    remote
        .send_handshake(&Handshake::new(InfoHash::new([1u8; 20]), PeerId::generate()))
        .await
        .unwrap();

    let result = PeerConnection::accept(local, InfoHash::new(INFO_HASH), PeerId::generate(), 8).await;
    assert!(matches!(result, Err(PeerError::HandshakeMismatch)));
}

#[tokio::test]
async fn test_request_requires_unchoke_and_interest() {
    let (mut conn, mut remote) = connected(4).await;

    assert!(matches!(
        conn.send_request(0, 0, 16384).await,
        Err(PeerError::RequestNotPermitted)
    ));
    assert!(conn.is_ready());

    conn.send(Message::Interested).await.unwrap();
    assert_eq!(remote.receive_message().await.unwrap(), Message::Interested);
    assert!(conn.choking().am_interested);

    // Interested but still choked.
    assert!(matches!(
        conn.send_request(0, 0, 16384).await,
        Err(PeerError::RequestNotPermitted)
    ));

    remote.send_message(&Message::Unchoke).await.unwrap();
    assert_eq!(conn.receive().await.unwrap(), Message::Unchoke);
    assert!(conn.can_request());

    conn.send_request(1, 0, 16384).await.unwrap();
    assert_eq!(
        remote.receive_message().await.unwrap(),
        Message::Request {
            index: 1,
            begin: 0,
            length: 16384,
        }
    );

    remote.send_message(&Message::Choke).await.unwrap();
    conn.receive().await.unwrap();
    assert!(!conn.can_request());
}

#[tokio::test]
async fn test_have_and_bitfield_update_peer_pieces() {
    let (mut conn, mut remote) = connected(10).await;

    remote
        .send_message(&Message::Bitfield(Bytes::from_static(&[0x80, 0x00])))
        .await
        .unwrap();
    remote.send_message(&Message::Have { piece: 9 }).await.unwrap();
    remote.send_message(&Message::Port(6881)).await.unwrap();

    conn.receive().await.unwrap();
    conn.receive().await.unwrap();
    assert_eq!(conn.receive().await.unwrap(), Message::Port(6881));

    assert_eq!(conn.bitfield().iter_set().collect::<Vec<_>>(), vec![0, 9]);
}

#[tokio::test]
async fn test_bad_bitfield_closes_connection() {
    let (mut conn, mut remote) = connected(10).await;

    remote
        .send_message(&Message::Bitfield(Bytes::from_static(&[0xFF])))
        .await
        .unwrap();

    let err = conn.receive().await.unwrap_err();
    assert!(err.is_protocol_violation());
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(matches!(
        conn.receive().await,
        Err(PeerError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_out_of_range_index_is_protocol_violation() {
    let (mut conn, mut remote) = connected(4).await;

    remote.send_message(&Message::Have { piece: 4 }).await.unwrap();
    assert!(matches!(conn.receive().await, Err(PeerError::Protocol(_))));
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_remote_close() {
    let (mut conn, remote) = connected(4).await;
    drop(remote);

    assert!(matches!(
        conn.receive().await,
        Err(PeerError::ConnectionClosed)
    ));
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_transport_read_timeout() {
    let (local, _far) = duplex(1 << 16);
    let mut transport = PeerTransport::new(local).with_read_timeout(Duration::from_millis(50));

    assert!(matches!(
        transport.receive_message().await,
        Err(PeerError::Timeout)
    ));
}

#[tokio::test]
async fn test_transport_rejects_oversized_frame() {
    let (local, mut far) = duplex(1 << 16);
    let mut transport = PeerTransport::new(local);

    far.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
    assert!(matches!(
        transport.receive_message().await,
        Err(PeerError::InvalidMessage(_))
    ));
}

#[tokio::test]
async fn test_transport_reassembles_split_frames() {
    let (local, mut far) = duplex(1 << 16);
    let mut transport = PeerTransport::new(local);

    let frame = Message::Have { piece: 3 }.encode();
    let (head, tail) = frame.split_at(3);
    far.write_all(head).await.unwrap();

    let reader = tokio::spawn(async move { transport.receive_message().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    far.write_all(tail).await.unwrap();
    far.write_all(&Message::KeepAlive.encode()).await.unwrap();

    assert_eq!(reader.await.unwrap().unwrap(), Message::Have { piece: 3 });
}
