// tests/common.rs

//! Shared test harness: spins up a real server on an ephemeral port and
//! drives it over an actual TCP socket, mirroring how
//! `core::replication::client` itself talks to a primary.

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use spineldb::config::Config;
use spineldb::core::protocol::{RespFrame, RespFrameCodec};
use spineldb::server;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};

/// A running server instance bound to an ephemeral port. Aborts its
/// background task when dropped so tests don't leak listeners.
pub struct TestServer {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Starts a primary listening on 127.0.0.1 with an OS-assigned port.
pub async fn start_primary() -> TestServer {
    start(Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        replica_of: None,
        log_level: "warn".to_string(),
    })
    .await
}

/// Starts a replica of `primary_addr`, also on an OS-assigned port.
pub async fn start_replica(primary_addr: SocketAddr) -> TestServer {
    start(Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        replica_of: Some(spineldb::config::ReplicaOf {
            host: primary_addr.ip().to_string(),
            port: primary_addr.port(),
        }),
        log_level: "warn".to_string(),
    })
    .await
}

async fn start(config: Config) -> TestServer {
    let (listener, shared) = server::bind(&config).await.expect("bind failed");
    let addr = listener.local_addr().expect("local_addr failed");
    // The replica announces its own listening port via REPLCONF; use the
    // OS-assigned one instead of the placeholder `0` passed in `config`.
    let config = Config {
        port: addr.port(),
        ..config
    };
    let handle = tokio::spawn(async move {
        let _ = server::serve(listener, shared, &config).await;
    });
    TestServer { addr, handle }
}

/// A minimal RESP client used to drive a [`TestServer`] directly over TCP,
/// independent of the server's own `ReplicationClient` implementation.
pub struct Client {
    stream: TcpStream,
    buf: BytesMut,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect failed");
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    pub async fn send(&mut self, parts: &[&[u8]]) {
        let bytes = RespFrame::command(parts).encode_to_vec().unwrap();
        self.stream.write_all(&bytes).await.unwrap();
    }

    async fn fill(&mut self) {
        let mut chunk = [0u8; 8 * 1024];
        let n = self.stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed unexpectedly");
        self.buf.extend_from_slice(&chunk[..n]);
    }

    /// Reads exactly one decoded RESP frame (a reply, or a propagated write
    /// arriving on a replication connection).
    pub async fn read_frame(&mut self) -> RespFrame {
        let mut codec = RespFrameCodec;
        loop {
            if let Some(frame) = codec.decode(&mut self.buf).unwrap() {
                return frame;
            }
            self.fill().await;
        }
    }

    /// Reads one CRLF-terminated line without interpreting it as a RESP
    /// frame, used for the `+FULLRESYNC ...` line during `PSYNC`.
    pub async fn read_line(&mut self) -> String {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = self.buf.split_to(pos + 2);
                return String::from_utf8_lossy(&line[..pos]).to_string();
            }
            self.fill().await;
        }
    }

    /// Reads the inline RDB payload shape (`$<len>\r\n<bytes>`, no trailing
    /// CRLF) sent once during `PSYNC` full resync.
    pub async fn read_rdb_payload(&mut self) -> Bytes {
        let header = self.read_line().await;
        let len: usize = header
            .strip_prefix('$')
            .expect("expected RDB length prefix")
            .parse()
            .expect("invalid RDB length");
        while self.buf.len() < len {
            self.fill().await;
        }
        self.buf.split_to(len).freeze()
    }
}
