// src/core/replication/client.rs

//! The replica-side replication state machine (§4.5): connect to a primary,
//! perform the handshake, ingest the RDB payload, then stream and apply
//! propagated commands until the connection drops or an unexpected reply
//! aborts replication.
//!
//! ```text
//! CONNECT -> PING_SENT -> REPLCONF1_SENT -> REPLCONF2_SENT -> PSYNC_SENT ->
//! RDB_HEADER -> RDB_BODY -> STREAMING (terminal)
//! ```

use crate::core::SpinelDBError;
use crate::core::commands::dispatcher::{self, DispatchCtx, Mode, Outcome};
use crate::core::protocol::{RespFrame, RespFrameCodec};
use crate::core::state::SharedState;
use bytes::{Bytes, BytesMut};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{info, warn};

pub struct ReplicationClient {
    shared: SharedState,
    primary_host: String,
    primary_port: u16,
    self_port: u16,
}

impl ReplicationClient {
    pub fn new(
        shared: SharedState,
        primary_host: String,
        primary_port: u16,
        self_port: u16,
    ) -> Self {
        Self {
            shared,
            primary_host,
            primary_port,
            self_port,
        }
    }

    /// Runs the handshake and then the streaming loop to completion. Any
    /// failure aborts replication for the lifetime of the process — the
    /// server keeps serving clients from whatever Store state it has.
    pub async fn run(self) {
        if let Err(e) = self.run_inner().await {
            warn!("replication aborted: {e}");
        }
    }

    async fn run_inner(self) -> Result<(), SpinelDBError> {
        let addr = format!("{}:{}", self.primary_host, self.primary_port);
        info!("connecting to primary at {addr}");
        let stream = TcpStream::connect(&addr).await?;
        let (mut read_half, mut write_half) = stream.into_split();
        let mut buf = BytesMut::new();

        write_frame(&mut write_half, RespFrame::command(&[b"PING"])).await?;
        read_frame(&mut read_half, &mut buf).await?;

        let self_port = self.self_port.to_string();
        write_frame(
            &mut write_half,
            RespFrame::command(&[b"REPLCONF", b"listening-port", self_port.as_bytes()]),
        )
        .await?;
        expect_ok(&mut read_half, &mut buf).await?;

        write_frame(
            &mut write_half,
            RespFrame::command(&[b"REPLCONF", b"capa", b"eof", b"capa", b"psync2"]),
        )
        .await?;
        expect_ok(&mut read_half, &mut buf).await?;

        write_frame(
            &mut write_half,
            RespFrame::command(&[b"PSYNC", b"?", b"-1"]),
        )
        .await?;
        let fullresync = read_frame(&mut read_half, &mut buf).await?;
        let RespFrame::SimpleString(line) = fullresync else {
            return Err(SpinelDBError::ReplicationError(
                "expected FULLRESYNC reply".into(),
            ));
        };
        if !line.starts_with("FULLRESYNC") {
            return Err(SpinelDBError::ReplicationError(format!(
                "unexpected PSYNC reply: {line}"
            )));
        }
        info!("full resync starting: {line}");

        let _rdb = read_rdb_payload(&mut read_half, &mut buf).await?;
        info!("RDB payload received and discarded; entering streaming mode");

        let peer_addr = read_half.peer_addr()?;
        let ctx = DispatchCtx {
            shared: self.shared.clone(),
            peer_addr,
            writer: Arc::new(Mutex::new(write_half)),
            mode: Mode::ReplicaIngest,
        };

        loop {
            let (frame, frame_len) = read_frame_with_len(&mut read_half, &mut buf).await?;
            let cmd = dispatcher::parse_command(&frame)?;
            // `execute` reads `shared.repl.offset()` for a GETACK reply
            // before the line below advances it, so the reported offset
            // correctly excludes this frame's own length (§4.4, §9).
            let outcome = dispatcher::execute(cmd, &frame, &ctx).await;
            self.shared.repl.advance(frame_len as u64);

            match outcome {
                Outcome::Reply(reply) => {
                    let mut out = BytesMut::new();
                    RespFrameCodec.encode(reply, &mut out)?;
                    let mut writer = ctx.writer.lock().await;
                    writer.write_all(&out).await?;
                }
                Outcome::Silent | Outcome::Raw(_) => {}
            }
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    frame: RespFrame,
) -> Result<(), SpinelDBError> {
    let bytes = frame.encode_to_vec()?;
    w.write_all(&bytes).await?;
    Ok(())
}

/// Reads exactly one frame, returning it and the number of wire bytes it
/// consumed — the delta used to advance the replica's ingested offset.
async fn read_frame_with_len<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut BytesMut,
) -> Result<(RespFrame, usize), SpinelDBError> {
    let mut codec = RespFrameCodec;
    loop {
        let before = buf.len();
        if let Some(frame) = codec.decode(buf)? {
            return Ok((frame, before - buf.len()));
        }
        fill(stream, buf).await?;
    }
}

async fn read_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut BytesMut,
) -> Result<RespFrame, SpinelDBError> {
    read_frame_with_len(stream, buf).await.map(|(frame, _)| frame)
}

async fn expect_ok<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut BytesMut,
) -> Result<(), SpinelDBError> {
    match read_frame(stream, buf).await? {
        RespFrame::SimpleString(s) if s.eq_ignore_ascii_case("OK") => Ok(()),
        other => Err(SpinelDBError::ReplicationError(format!(
            "expected +OK, got {other:?}"
        ))),
    }
}

async fn fill<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut BytesMut) -> Result<(), SpinelDBError> {
    let mut chunk = [0u8; 8 * 1024];
    let n = stream.read(&mut chunk).await?;
    if n == 0 {
        return Err(SpinelDBError::Io(Arc::new(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            "primary closed connection",
        ))));
    }
    buf.extend_from_slice(&chunk[..n]);
    Ok(())
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Reads the inline RDB payload shape used only during the `PSYNC`
/// handshake: `$<len>\r\n<len bytes>` with **no** trailing CRLF. Operates
/// directly on the same `(stream, buf)` pair the frame reader uses, rather
/// than a separate buffered reader, since bytes belonging to the payload
/// may already have arrived in `buf` alongside the `FULLRESYNC` line.
async fn read_rdb_payload<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut BytesMut,
) -> Result<Bytes, SpinelDBError> {
    loop {
        if find_crlf(buf).is_some() {
            break;
        }
        fill(stream, buf).await?;
    }
    let pos = find_crlf(buf).expect("checked above");
    let header = buf.split_to(pos + 2);
    let header_line = &header[..pos];
    let len_str = std::str::from_utf8(header_line)
        .ok()
        .and_then(|s| s.strip_prefix('$'))
        .ok_or_else(|| SpinelDBError::ProtocolError("expected RDB length prefix".into()))?;
    let len: usize = len_str
        .parse()
        .map_err(|_| SpinelDBError::ProtocolError(format!("invalid RDB length: {len_str}")))?;

    while buf.len() < len {
        fill(stream, buf).await?;
    }
    Ok(buf.split_to(len).freeze())
}
