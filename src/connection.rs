// src/connection.rs

//! Manages the lifecycle of a single client TCP connection: reads bytes into
//! a growable buffer, feeds them to the [`RespFrameCodec`], dispatches
//! resulting frames against the shared state, and writes responses.

use crate::core::SpinelDBError;
use crate::core::commands::dispatcher::{self, DispatchCtx, Mode, Outcome};
use crate::core::protocol::{RespFrame, RespFrameCodec};
use crate::core::state::SharedState;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, warn};

/// Drives one accepted client connection to completion. Returns once the
/// connection closes, either cleanly (EOF) or on an unresumable framing
/// error (§7: a framing error that cannot be resynchronized closes the
/// session; everything else replies with a RESP error and continues).
pub async fn handle(stream: TcpStream, addr: SocketAddr, shared: SharedState) {
    if let Err(e) = run(stream, addr, shared.clone()).await {
        debug!("connection {addr} closed: {e}");
    }
    // A connection that registered as a replica is identified by this same
    // accepted address (§3: "a replica is identified by its originating
    // connection"); removing it here is what makes "closing that connection
    // removes the record" true regardless of how the loop below exited.
    shared.registry.unregister(&addr);
}

async fn run(stream: TcpStream, addr: SocketAddr, shared: SharedState) -> Result<(), SpinelDBError> {
    info!("accepted connection from {addr}");
    let (mut read_half, write_half) = stream.into_split();
    let ctx = DispatchCtx {
        shared,
        peer_addr: addr,
        writer: Arc::new(Mutex::new(write_half)),
        mode: Mode::Normal,
    };

    let mut codec = RespFrameCodec;
    let mut buf = BytesMut::new();
    let mut chunk = [0u8; 8 * 1024];

    loop {
        let frame = loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => break Some(frame),
                Ok(None) => {}
                Err(e) => return Err(e),
            }
            let n = read_half.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
        };
        let Some(frame) = frame else { return Ok(()) };

        match dispatcher::parse_command(&frame) {
            Ok(cmd) => {
                let outcome = dispatcher::execute(cmd, &frame, &ctx).await;
                write_outcome(&ctx, outcome).await?;
            }
            Err(e) => {
                warn!("protocol error from {addr}: {e}");
                write_outcome(&ctx, Outcome::Reply(RespFrame::Error(e.to_string()))).await?;
            }
        }
    }
}

async fn write_outcome(ctx: &DispatchCtx, outcome: Outcome) -> Result<(), SpinelDBError> {
    let bytes = match outcome {
        Outcome::Reply(frame) => {
            let mut out = BytesMut::new();
            RespFrameCodec.encode(frame, &mut out)?;
            out.to_vec()
        }
        Outcome::Silent => return Ok(()),
        Outcome::Raw(bytes) => bytes,
    };
    let mut writer = ctx.writer.lock().await;
    writer.write_all(&bytes).await?;
    Ok(())
}
