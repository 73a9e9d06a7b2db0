//! In-process server peer for exercising the client over real byte streams.

use std::collections::VecDeque;
use std::time::Duration;

use frames::{Call, Frame, StreamUnpacker};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};

use crate::transport::Transport;

pub const WAIT: Duration = Duration::from_secs(2);

/// Client transport connected to a server-side [`Peer`] through memory.
pub fn connected_pair() -> (Transport, Peer<DuplexStream>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    (Transport::new(client), Peer::new(server))
}

pub struct Peer<S> {
    stream: S,
    unpacker: StreamUnpacker<Call>,
    calls: VecDeque<Call>,
    pub received: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Peer<S> {
    pub fn new(stream: S) -> Self {
        Self { stream, unpacker: StreamUnpacker::new(), calls: VecDeque::new(), received: 0 }
    }

    /// Next call sent by the client, or `None` once it closed its side.
    pub async fn next_call(&mut self) -> Option<Call> {
        loop {
            if let Some(call) = self.calls.pop_front() {
                return Some(call);
            }
            let mut buf = [0_u8; 4096];
            let n = self.stream.read(&mut buf).await.expect("peer read");
            if n == 0 {
                return None;
            }
            self.received += n;
            self.calls.extend(self.unpacker.feed(&buf[..n]).expect("client sent valid calls"));
        }
    }

    pub async fn send(&mut self, frame: &Frame) {
        self.send_raw(&frames::encode_frame(frame)).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("peer write");
        self.stream.flush().await.expect("peer flush");
    }

    pub async fn chunk<T: Serialize>(&mut self, session: u64, value: &T) {
        let data = rmp_serde::to_vec_named(value).expect("encode payload");
        self.send(&Frame::Chunk { session, data }).await;
    }

    pub async fn choke(&mut self, session: u64) {
        self.send(&Frame::Choke { session }).await;
    }

    pub async fn error(&mut self, session: u64, code: i64, message: &str) {
        self.send(&Frame::Error { session, code, message: message.to_owned() }).await;
    }
}
