use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

use super::*;

#[tokio::test]
async fn reader_yields_bytes_then_none_at_eof() {
    let (client, mut peer) = duplex(1024);
    let (mut reader, _writer) = Transport::new(client).into_split();

    peer.write_all(b"hello").await.expect("peer write");
    let buf = reader.read().await.expect("read").expect("bytes");
    assert_eq!(&buf[..], b"hello");

    drop(peer);
    assert!(reader.read().await.expect("read").is_none());
}

#[tokio::test]
async fn concurrent_writes_are_not_interleaved() {
    let (client, mut peer) = duplex(1 << 20);
    let (_reader, writer) = Transport::new(client).into_split();

    let tasks: Vec<_> = (0..16_u8)
        .map(|byte| {
            let writer = writer.clone();
            tokio::spawn(async move { writer.write(&[byte; 4096]).await })
        })
        .collect();
    for task in tasks {
        task.await.expect("join").expect("write");
    }
    writer.shutdown().await.expect("shutdown");

    let mut received = Vec::new();
    peer.read_to_end(&mut received).await.expect("read");
    assert_eq!(received.len(), 16 * 4096);
    for block in received.chunks(4096) {
        assert!(block.iter().all(|b| *b == block[0]), "interleaved write");
    }
}

#[tokio::test]
async fn shutdown_signals_eof_to_peer() {
    let (client, mut peer) = duplex(64);
    let (_reader, writer) = Transport::new(client).into_split();
    writer.shutdown().await.expect("shutdown");

    let mut buf = Vec::new();
    assert_eq!(peer.read_to_end(&mut buf).await.expect("read"), 0);
}

#[tokio::test]
async fn connect_reports_refused_address() {
    // Bind then drop to get a port with nothing listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);

    let result = Transport::connect(&addr, Duration::from_secs(2)).await;
    assert!(matches!(result, Err(TransportError::Connect { .. })));
}

#[tokio::test]
async fn connect_reaches_listener() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

    let transport = Transport::connect(&addr, Duration::from_secs(2)).await;
    assert!(transport.is_ok());
    accept.await.expect("join").expect("accept");
}
