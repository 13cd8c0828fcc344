use super::worker::PeerWorker;
use super::*;
use crate::metainfo::Metainfo;
use crate::peer::{Bitfield, Message, PeerConnection, PeerError, PeerId};
use crate::piece::{PieceManager, PieceManagerConfig};
use crate::storage::MemoryStorage;
use crate::tracker::{Tracker, TrackerList};
use bytes::Bytes;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

struct Fixture {
    metainfo: Metainfo,
    data: Arc<Vec<u8>>,
    piece_length: usize,
}

fn fixture(len: usize, piece_length: usize) -> Fixture {
    let data: Vec<u8> = (0..len).map(|i| (i * 31 % 253) as u8).collect();
    let url = "http://tracker.invalid/announce";

    let mut torrent = format!("d8:announce{}:{}4:infod", url.len(), url).into_bytes();
    torrent.extend_from_slice(format!("6:lengthi{}e4:name8:data.bin", len).as_bytes());
    torrent.extend_from_slice(format!("12:piece lengthi{}e", piece_length).as_bytes());
    let hashes: Vec<u8> = data
        .chunks(piece_length)
        .flat_map(|chunk| <[u8; 20]>::from(Sha1::digest(chunk)))
        .collect();
    torrent.extend_from_slice(format!("6:pieces{}:", hashes.len()).as_bytes());
    torrent.extend_from_slice(&hashes);
    torrent.extend_from_slice(b"ee");

    Fixture {
        metainfo: Metainfo::from_bytes(&torrent).unwrap(),
        data: Arc::new(data),
        piece_length,
    }
}

fn config(piece: PieceManagerConfig) -> DownloadConfig {
    DownloadConfig {
        piece,
        ..DownloadConfig::default()
    }
}

fn blocks_of(block_size: u32) -> PieceManagerConfig {
    PieceManagerConfig {
        block_size,
        ..PieceManagerConfig::default()
    }
}

fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Answers every announce with `peers` and records the request lines.
async fn serve_tracker(peers: Vec<SocketAddr>) -> (TrackerList, Arc<Mutex<Vec<String>>>) {
    serve_flaky_tracker(peers, 0).await
}

/// Like [`serve_tracker`], but the first `rejections` announces get a
/// `failure reason`.
async fn serve_flaky_tracker(
    peers: Vec<SocketAddr>,
    mut rejections: usize,
) -> (TrackerList, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/announce", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));

    let mut body = Vec::new();
    for addr in &peers {
        if let SocketAddr::V4(v4) = addr {
            body.extend_from_slice(&v4.ip().octets());
            body.extend_from_slice(&v4.port().to_be_bytes());
        }
    }
    let mut response = format!("d8:intervali1800e5:peers{}:", body.len()).into_bytes();
    response.extend_from_slice(&body);
    response.push(b'e');

    let seen = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
            let text = String::from_utf8_lossy(&buf).into_owned();
            seen.lock()
                .push(text.lines().next().unwrap_or_default().to_string());

            let body: &[u8] = if rejections > 0 {
                rejections -= 1;
                b"d14:failure reason10:overloadede"
            } else {
                &response
            };
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(body).await;
            let _ = socket.shutdown().await;
        }
    });

    let trackers = TrackerList::new(vec![Tracker::with_http_client(&url, local_client())]);
    (trackers, requests)
}

fn saw_event(requests: &Mutex<Vec<String>>, event: &str) -> bool {
    let needle = format!("event={} ", event);
    requests.lock().iter().any(|line| line.contains(&needle))
}

/// Serves every requested block, optionally corrupted, and returns the other
/// messages it received once the connection ends.
async fn seed<S>(
    mut conn: PeerConnection<S>,
    data: Arc<Vec<u8>>,
    piece_length: usize,
    corrupt: bool,
) -> Vec<Message>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut received = Vec::new();
    let pieces = conn.bitfield().piece_count();
    if conn
        .send(Message::Bitfield(Bitfield::full(pieces).to_bytes()))
        .await
        .is_err()
        || conn.send(Message::Unchoke).await.is_err()
    {
        return received;
    }

    while let Ok(message) = conn.receive().await {
        match message {
            Message::Request {
                index,
                begin,
                length,
            } => {
                let start = index as usize * piece_length + begin as usize;
                let mut block = data[start..start + length as usize].to_vec();
                if corrupt {
                    block[0] ^= 0xFF;
                }
                let reply = Message::Piece {
                    index,
                    begin,
                    data: Bytes::from(block),
                };
                if conn.send(reply).await.is_err() {
                    break;
                }
            }
            other => received.push(other),
        }
    }
    received
}

async fn spawn_seeder(fx: &Fixture, corrupt: bool) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let info_hash = fx.metainfo.info_hash;
    let piece_count = fx.metainfo.info.piece_count();
    let data = fx.data.clone();
    let piece_length = fx.piece_length;

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let data = data.clone();
            tokio::spawn(async move {
                if let Ok(conn) =
                    PeerConnection::accept(stream, info_hash, PeerId::generate(), piece_count)
                        .await
                {
                    seed(conn, data, piece_length, corrupt).await;
                }
            });
        }
    });
    addr
}

async fn worker_pair(
    fx: &Fixture,
    manager: Arc<PieceManager>,
) -> (
    PeerWorker<tokio::io::DuplexStream>,
    PeerConnection<tokio::io::DuplexStream>,
) {
    worker_pair_with(fx, manager, &DownloadConfig::default()).await
}

async fn worker_pair_with(
    fx: &Fixture,
    manager: Arc<PieceManager>,
    config: &DownloadConfig,
) -> (
    PeerWorker<tokio::io::DuplexStream>,
    PeerConnection<tokio::io::DuplexStream>,
) {
    let (local, far) = duplex(1 << 16);
    let info_hash = fx.metainfo.info_hash;
    let piece_count = fx.metainfo.info.piece_count();

    let (ours, theirs) = tokio::join!(
        PeerConnection::outbound(local, info_hash, PeerId::generate(), piece_count),
        PeerConnection::accept(far, info_hash, PeerId::generate(), piece_count),
    );
    let worker = PeerWorker::new(ours.unwrap(), manager, config);
    (worker, theirs.unwrap())
}

#[tokio::test]
async fn test_downloads_from_seeder_via_tracker() {
    let fx = fixture(40_000, 16_384);
    let seeder = spawn_seeder(&fx, false).await;
    let (trackers, requests) = serve_tracker(vec![seeder]).await;
    let storage = Arc::new(MemoryStorage::new(&fx.metainfo.info).unwrap());

    let mut download = Download::new(fx.metainfo.clone(), storage.clone(), config(blocks_of(4096)))
        .unwrap()
        .with_trackers(trackers);

    tokio::time::timeout(Duration::from_secs(10), download.run())
        .await
        .unwrap()
        .unwrap();

    assert!(download.manager().is_complete());
    assert_eq!(download.manager().bytes_left(), 0);
    assert_eq!(storage.contents().unwrap(), *fx.data);
    assert!(saw_event(&requests, "started"));
    assert!(saw_event(&requests, "completed"));
    assert!(!saw_event(&requests, "stopped"));
}

#[tokio::test]
async fn test_corrupt_peer_is_poisoned() {
    let fx = fixture(16 * 1024, 1024);
    let bad = spawn_seeder(&fx, true).await;
    let good = spawn_seeder(&fx, false).await;
    let (trackers, _) = serve_tracker(vec![bad, good]).await;
    let storage = Arc::new(MemoryStorage::new(&fx.metainfo.info).unwrap());

    let piece = PieceManagerConfig {
        block_size: 1024,
        max_hash_failures: 2,
        ..PieceManagerConfig::default()
    };
    let mut download = Download::new(fx.metainfo.clone(), storage.clone(), config(piece))
        .unwrap()
        .with_trackers(trackers);

    tokio::time::timeout(Duration::from_secs(10), download.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(storage.contents().unwrap(), *fx.data);
}

#[tokio::test]
async fn test_retries_rejected_announce() {
    let fx = fixture(8 * 1024, 1024);
    let seeder = spawn_seeder(&fx, false).await;
    let (trackers, requests) = serve_flaky_tracker(vec![seeder], 2).await;
    let storage = Arc::new(MemoryStorage::new(&fx.metainfo.info).unwrap());

    let config = DownloadConfig {
        tracker_retry_delay: Duration::from_millis(50),
        ..config(blocks_of(1024))
    };
    let mut download = Download::new(fx.metainfo.clone(), storage.clone(), config)
        .unwrap()
        .with_trackers(trackers);

    tokio::time::timeout(Duration::from_secs(10), download.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(storage.contents().unwrap(), *fx.data);
    let started = requests
        .lock()
        .iter()
        .filter(|line| line.contains("event=started "))
        .count();
    assert_eq!(started, 3);
}

#[tokio::test]
async fn test_stalls_once_announce_retries_run_out() {
    let fx = fixture(4096, 1024);
    let (trackers, requests) = serve_flaky_tracker(Vec::new(), usize::MAX).await;
    let storage = Arc::new(MemoryStorage::new(&fx.metainfo.info).unwrap());

    let config = DownloadConfig {
        tracker_retry_delay: Duration::from_millis(20),
        max_announce_retries: 2,
        ..DownloadConfig::default()
    };
    let mut download = Download::new(fx.metainfo.clone(), storage, config)
        .unwrap()
        .with_trackers(trackers);

    let result = tokio::time::timeout(Duration::from_secs(10), download.run())
        .await
        .unwrap();
    assert!(matches!(result, Err(DownloadError::Stalled { missing: 4 })));
    assert_eq!(requests.lock().len(), 3);
}

#[tokio::test]
async fn test_stalls_without_trackers_or_peers() {
    let fx = fixture(4096, 1024);
    let storage = Arc::new(MemoryStorage::new(&fx.metainfo.info).unwrap());

    let mut download = Download::new(fx.metainfo.clone(), storage, DownloadConfig::default())
        .unwrap()
        .with_trackers(TrackerList::from_urls(&["udp://tracker.invalid:80/announce"]));

    assert!(matches!(
        download.run().await,
        Err(DownloadError::Stalled { missing: 4 })
    ));
}

#[tokio::test]
async fn test_stalls_when_every_peer_fails() {
    let fx = fixture(4096, 1024);
    let storage = Arc::new(MemoryStorage::new(&fx.metainfo.info).unwrap());
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let mut download = Download::new(fx.metainfo.clone(), storage, DownloadConfig::default())
        .unwrap()
        .with_trackers(TrackerList::new(Vec::new()));
    download.add_peers([dead]);

    let result = tokio::time::timeout(Duration::from_secs(15), download.run())
        .await
        .unwrap();
    assert!(matches!(result, Err(DownloadError::Stalled { missing: 4 })));
}

#[tokio::test]
async fn test_already_complete_skips_trackers() {
    let fx = fixture(3000, 1024);
    let storage = Arc::new(MemoryStorage::new(&fx.metainfo.info).unwrap());
    for (index, chunk) in fx.data.chunks(1024).enumerate() {
        storage.insert(index as u32, Bytes::copy_from_slice(chunk));
    }

    let mut download = Download::new(fx.metainfo.clone(), storage, DownloadConfig::default())
        .unwrap()
        .with_trackers(TrackerList::from_urls(&["udp://tracker.invalid:80/announce"]));

    download.run().await.unwrap();
    assert_eq!(download.manager().completed_count(), 3);
}

#[tokio::test]
async fn test_shutdown_announces_stopped() {
    let fx = fixture(4096, 1024);
    let info_hash = fx.metainfo.info_hash;

    // Completes the handshake, then never unchokes.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut conn = PeerConnection::accept(stream, info_hash, PeerId::generate(), 4)
            .await
            .unwrap();
        while conn.receive().await.is_ok() {}
    });

    let (trackers, requests) = serve_tracker(vec![silent]).await;
    let storage = Arc::new(MemoryStorage::new(&fx.metainfo.info).unwrap());
    let mut download = Download::new(fx.metainfo.clone(), storage, DownloadConfig::default())
        .unwrap()
        .with_trackers(trackers);
    let handle = download.shutdown_handle();

    let task = tokio::spawn(async move {
        let result = download.run().await;
        (download, result)
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.shutdown();

    let (download, result) = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(DownloadError::Cancelled)));
    assert!(saw_event(&requests, "started"));
    assert!(saw_event(&requests, "stopped"));
    assert!(!download.manager().is_complete());
}

#[tokio::test]
async fn test_worker_returns_claims_on_disconnect() {
    let fx = fixture(64 * 1024, 16 * 1024);
    let storage = Arc::new(MemoryStorage::new(&fx.metainfo.info).unwrap());
    let manager = Arc::new(
        PieceManager::new(&fx.metainfo.info, storage, PieceManagerConfig::default()).unwrap(),
    );
    let total = manager.unclaimed_blocks();

    let (worker, mut remote) = worker_pair(&fx, manager.clone()).await;
    let id = worker.id();

    let remote_task = tokio::spawn(async move {
        remote
            .send(Message::Bitfield(Bitfield::full(4).to_bytes()))
            .await
            .unwrap();
        remote.send(Message::Unchoke).await.unwrap();
        let mut requests = 0;
        while let Ok(message) = remote.receive().await {
            if matches!(message, Message::Request { .. }) {
                requests += 1;
                if requests == 3 {
                    break;
                }
            }
        }
        requests
    });

    let result = worker.run().await;
    assert!(result.is_err());
    assert_eq!(remote_task.await.unwrap(), 3);
    assert_eq!(manager.outstanding(id), 0);
    assert_eq!(manager.unclaimed_blocks(), total);
}

#[tokio::test]
async fn test_worker_downloads_and_sends_have() {
    let fx = fixture(3 * 1024, 1024);
    let storage = Arc::new(MemoryStorage::new(&fx.metainfo.info).unwrap());
    let manager = Arc::new(
        PieceManager::new(&fx.metainfo.info, storage.clone(), blocks_of(512)).unwrap(),
    );

    let (worker, remote) = worker_pair(&fx, manager.clone()).await;
    let remote_task = tokio::spawn(seed(remote, fx.data.clone(), fx.piece_length, false));

    worker.run().await.unwrap();
    assert!(manager.is_complete());
    assert_eq!(storage.contents().unwrap(), *fx.data);

    let received = remote_task.await.unwrap();
    assert_eq!(received.first(), Some(&Message::Interested));
    for piece in 0..3 {
        assert!(received.contains(&Message::Have { piece }));
    }
}

#[tokio::test]
async fn test_worker_drops_silent_peer() {
    let fx = fixture(4096, 1024);
    let storage = Arc::new(MemoryStorage::new(&fx.metainfo.info).unwrap());
    let manager = Arc::new(
        PieceManager::new(&fx.metainfo.info, storage, PieceManagerConfig::default()).unwrap(),
    );
    let config = DownloadConfig {
        idle_timeout: Duration::from_millis(300),
        keepalive_interval: Duration::from_millis(100),
        ..DownloadConfig::default()
    };

    // The remote stays connected but never writes.
    let (worker, _remote) = worker_pair_with(&fx, manager.clone(), &config).await;
    let id = worker.id();

    let result = tokio::time::timeout(Duration::from_secs(3), worker.run())
        .await
        .expect("silent peer was never dropped");
    assert!(matches!(result, Err(DownloadError::Peer(PeerError::Timeout))));
    assert_eq!(manager.outstanding(id), 0);
}
