// src/core/commands/dispatcher.rs

//! Parses a decoded [`RespFrame`] into a [`Command`] and executes it against
//! the shared [`SharedState`]: the store, the replica registry, and the
//! replication offset.

use crate::core::SpinelDBError;
use crate::core::protocol::RespFrame;
use crate::core::replication::{MASTER_REPLID, Role};
use crate::core::state::SharedState;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::time::sleep;

/// A parsed, typed command ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping,
    Echo(Bytes),
    Info,
    Set {
        key: Bytes,
        value: Bytes,
        px_ms: Option<u64>,
    },
    Get(Bytes),
    Del(Vec<Bytes>),
    Replconf(ReplConfArg),
    Psync,
    Wait {
        numreplicas: i64,
        timeout_ms: i64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplConfArg {
    ListeningPort(u16),
    Capa(Vec<Bytes>),
    GetAck,
    Ack(u64),
}

/// Whether a dispatched command was received directly from a client
/// (`Normal`) or ingested from a primary's replication stream
/// (`ReplicaIngest`, replies suppressed except for `GETACK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    ReplicaIngest,
}

/// The outcome of dispatching one command, telling the caller what (if
/// anything) to write back on the connection.
pub enum Outcome {
    /// Write this frame as the reply.
    Reply(RespFrame),
    /// Produce no reply at all.
    Silent,
    /// Write these exact bytes verbatim: used only for `PSYNC`'s
    /// `FULLRESYNC` line followed by the inline RDB payload, which is not a
    /// plain `RespFrame` encoding.
    Raw(Vec<u8>),
}

/// Everything [`execute`] needs beyond the command itself: the shared
/// state, this connection's identity, and (for replica connections) the
/// write half used both for ordinary replies and later replica
/// propagation.
pub struct DispatchCtx {
    pub shared: SharedState,
    pub peer_addr: SocketAddr,
    pub writer: Arc<Mutex<OwnedWriteHalf>>,
    pub mode: Mode,
}

/// Parses a decoded command frame (an array of bulk strings) into a
/// [`Command`]. Command names and the sub-keywords `PX`, `GETACK`, `ACK`,
/// `listening-port`, and `capa` are matched case-insensitively; everything
/// else (keys, values) is taken byte-exact.
pub fn parse_command(frame: &RespFrame) -> Result<Command, SpinelDBError> {
    let RespFrame::Array(parts) = frame else {
        return Err(SpinelDBError::ProtocolError(
            "expected array command frame".into(),
        ));
    };

    let mut args = Vec::with_capacity(parts.len());
    for part in parts {
        let RespFrame::BulkString(b) = part else {
            return Err(SpinelDBError::ProtocolError(
                "expected bulk string command element".into(),
            ));
        };
        args.push(b.clone());
    }

    let Some(name) = args.first() else {
        return Err(SpinelDBError::ProtocolError("empty command frame".into()));
    };
    let name = String::from_utf8_lossy(name).to_ascii_uppercase();
    let rest = &args[1..];

    match name.as_str() {
        "PING" => Ok(Command::Ping),
        "ECHO" => {
            let msg = rest
                .first()
                .cloned()
                .ok_or_else(|| SpinelDBError::WrongArgumentCount("ECHO".into()))?;
            Ok(Command::Echo(msg))
        }
        "INFO" => Ok(Command::Info),
        "SET" => parse_set(rest),
        "GET" => {
            let key = rest
                .first()
                .cloned()
                .ok_or_else(|| SpinelDBError::WrongArgumentCount("GET".into()))?;
            Ok(Command::Get(key))
        }
        "DEL" => {
            if rest.is_empty() {
                return Err(SpinelDBError::WrongArgumentCount("DEL".into()));
            }
            Ok(Command::Del(rest.to_vec()))
        }
        "REPLCONF" => parse_replconf(rest),
        "PSYNC" => Ok(Command::Psync),
        "WAIT" => parse_wait(rest),
        other => Err(SpinelDBError::UnknownCommand(other.to_string())),
    }
}

fn parse_set(rest: &[Bytes]) -> Result<Command, SpinelDBError> {
    if rest.len() < 2 {
        return Err(SpinelDBError::WrongArgumentCount("SET".into()));
    }
    let key = rest[0].clone();
    let value = rest[1].clone();
    let mut px_ms = None;
    let mut i = 2;
    while i < rest.len() {
        let opt = String::from_utf8_lossy(&rest[i]).to_ascii_uppercase();
        match opt.as_str() {
            "PX" => {
                let ms_str = rest
                    .get(i + 1)
                    .ok_or_else(|| SpinelDBError::SyntaxError)?;
                let ms: u64 = String::from_utf8_lossy(ms_str)
                    .parse()
                    .map_err(|_| SpinelDBError::NotAnInteger)?;
                px_ms = Some(ms);
                i += 2;
            }
            _ => return Err(SpinelDBError::SyntaxError),
        }
    }
    Ok(Command::Set { key, value, px_ms })
}

fn parse_replconf(rest: &[Bytes]) -> Result<Command, SpinelDBError> {
    let sub = rest
        .first()
        .ok_or_else(|| SpinelDBError::WrongArgumentCount("REPLCONF".into()))?;
    let sub_str = String::from_utf8_lossy(sub).to_ascii_lowercase();
    match sub_str.as_str() {
        "listening-port" => {
            let port_str = rest
                .get(1)
                .ok_or_else(|| SpinelDBError::WrongArgumentCount("REPLCONF".into()))?;
            let port: u16 = String::from_utf8_lossy(port_str)
                .parse()
                .map_err(|_| SpinelDBError::NotAnInteger)?;
            Ok(Command::Replconf(ReplConfArg::ListeningPort(port)))
        }
        "capa" => Ok(Command::Replconf(ReplConfArg::Capa(rest[1..].to_vec()))),
        "getack" => Ok(Command::Replconf(ReplConfArg::GetAck)),
        "ack" => {
            let offset_str = rest
                .get(1)
                .ok_or_else(|| SpinelDBError::WrongArgumentCount("REPLCONF".into()))?;
            let offset: u64 = String::from_utf8_lossy(offset_str)
                .parse()
                .map_err(|_| SpinelDBError::NotAnInteger)?;
            Ok(Command::Replconf(ReplConfArg::Ack(offset)))
        }
        _ => Err(SpinelDBError::SyntaxError),
    }
}

fn parse_wait(rest: &[Bytes]) -> Result<Command, SpinelDBError> {
    if rest.len() != 2 {
        return Err(SpinelDBError::WrongArgumentCount("WAIT".into()));
    }
    let numreplicas: i64 = String::from_utf8_lossy(&rest[0])
        .parse()
        .map_err(|_| SpinelDBError::NotAnInteger)?;
    let timeout_ms: i64 = String::from_utf8_lossy(&rest[1])
        .parse()
        .map_err(|_| SpinelDBError::NotAnInteger)?;
    Ok(Command::Wait {
        numreplicas,
        timeout_ms,
    })
}

/// Builds the `REPLCONF GETACK *` frame the primary broadcasts on `WAIT`,
/// and the replica echoes back through `REPLCONF ACK <offset>`.
pub fn getack_frame() -> RespFrame {
    RespFrame::command(&[b"REPLCONF", b"GETACK", b"*"])
}

fn ack_reply(offset: u64) -> RespFrame {
    RespFrame::command(&[b"REPLCONF", b"ACK", offset.to_string().as_bytes()])
}

/// Renders the `INFO replication` section, the only section this server
/// implements.
fn replication_info(shared: &SharedState) -> String {
    let mut info = String::new();
    info.push_str("# Replication\r\n");
    let role_str = match shared.repl.role {
        Role::Primary => "master",
        Role::Replica => "slave",
    };
    info.push_str(&format!("role:{role_str}\r\n"));
    info.push_str(&format!("master_replid:{MASTER_REPLID}\r\n"));
    info.push_str(&format!(
        "master_repl_offset:{}\r\n",
        shared.repl.offset()
    ));
    info.push_str(&format!(
        "connected_slaves:{}\r\n",
        shared.registry.len()
    ));
    info
}

/// Executes `cmd` against `ctx`, returning what (if anything) should be
/// written back on the connection.
///
/// Write ordering on a primary follows §4.4: the replication mutex is held
/// for the whole of `apply → propagate → advance offset`, so `WAIT` never
/// observes a `master_repl_offset` that a concurrent `SET` is still in the
/// middle of advancing.
pub async fn execute(cmd: Command, frame: &RespFrame, ctx: &DispatchCtx) -> Outcome {
    let silent = ctx.mode == Mode::ReplicaIngest;
    match cmd {
        Command::Ping => {
            if silent {
                Outcome::Silent
            } else {
                Outcome::Reply(RespFrame::SimpleString("PONG".into()))
            }
        }
        Command::Echo(msg) => Outcome::Reply(RespFrame::BulkString(msg)),
        Command::Info => Outcome::Reply(RespFrame::BulkString(Bytes::from(replication_info(
            &ctx.shared,
        )))),
        Command::Set { key, value, px_ms } => execute_set(key, value, px_ms, frame, ctx).await,
        Command::Get(key) => {
            let value = ctx.shared.store.get(&key);
            Outcome::Reply(match value {
                Some(v) => RespFrame::BulkString(v),
                None => RespFrame::Null,
            })
        }
        Command::Del(keys) => {
            let n = ctx.shared.store.del(&keys);
            Outcome::Reply(RespFrame::Integer(n as i64))
        }
        Command::Replconf(arg) => execute_replconf(arg, ctx).await,
        Command::Psync => execute_psync(ctx).await,
        Command::Wait {
            numreplicas,
            timeout_ms,
        } => execute_wait(numreplicas, timeout_ms, ctx).await,
    }
}

async fn execute_set(
    key: Bytes,
    value: Bytes,
    px_ms: Option<u64>,
    frame: &RespFrame,
    ctx: &DispatchCtx,
) -> Outcome {
    let silent = ctx.mode == Mode::ReplicaIngest;
    let _guard = ctx.shared.repl.write_lock.lock().await;

    ctx.shared.store.set(key, value, px_ms);

    if ctx.shared.repl.is_primary() {
        if let Ok(encoded) = frame.encode_to_vec() {
            let encoded = Bytes::from(encoded);
            ctx.shared.registry.propagate(&encoded).await;
            ctx.shared.repl.advance(encoded.len() as u64);
        }
    }

    if silent {
        Outcome::Silent
    } else {
        Outcome::Reply(RespFrame::SimpleString("OK".into()))
    }
}

async fn execute_replconf(arg: ReplConfArg, ctx: &DispatchCtx) -> Outcome {
    match arg {
        ReplConfArg::ListeningPort(port) => {
            ctx.shared
                .registry
                .register(ctx.peer_addr, ctx.writer.clone(), Some(port));
            Outcome::Reply(RespFrame::SimpleString("OK".into()))
        }
        ReplConfArg::Capa(_) => Outcome::Reply(RespFrame::SimpleString("OK".into())),
        ReplConfArg::GetAck => {
            // Always answered, even in silent (replica-ingest) mode — the
            // sole exception in the dispatch table. The offset reported
            // excludes this GETACK frame's own byte length: the caller
            // (the replication streaming loop) advances the offset by each
            // frame's length only after dispatch returns, so
            // `shared.repl.offset()` here still reflects the state *before*
            // this frame was accounted for.
            Outcome::Reply(ack_reply(ctx.shared.repl.offset()))
        }
        ReplConfArg::Ack(offset) => {
            ctx.shared.registry.record_ack(&ctx.peer_addr, offset);
            Outcome::Silent
        }
    }
}

async fn execute_psync(ctx: &DispatchCtx) -> Outcome {
    let offset = ctx.shared.repl.offset();
    let mut raw = format!("+FULLRESYNC {MASTER_REPLID} {offset}\r\n").into_bytes();
    raw.extend_from_slice(&crate::core::protocol::encode_rdb_payload(
        crate::core::protocol::EMPTY_RDB,
    ));
    Outcome::Raw(raw)
}

/// Implements `WAIT numreplicas timeout_ms` per §4.4: snapshots the target
/// offset, short-circuits when there is nothing to wait for, otherwise
/// broadcasts `GETACK` and polls until quorum or timeout. Holds the
/// replication mutex for its entire duration so the target offset cannot
/// move while it polls.
async fn execute_wait(numreplicas: i64, timeout_ms: i64, ctx: &DispatchCtx) -> Outcome {
    let _guard = ctx.shared.repl.write_lock.lock().await;
    let target = ctx.shared.repl.offset();

    if target == 0 {
        return Outcome::Reply(RespFrame::Integer(ctx.shared.registry.len() as i64));
    }

    ctx.shared
        .registry
        .request_acks(&Bytes::from(getack_frame().encode_to_vec().unwrap_or_default()))
        .await;

    let deadline = Instant::now() + Duration::from_millis(timeout_ms.max(0) as u64);
    loop {
        let acked = ctx.shared.registry.count_acked_at_least(target);
        if acked as i64 >= numreplicas || Instant::now() >= deadline {
            let total = ctx.shared.registry.len();
            return Outcome::Reply(RespFrame::Integer(acked.min(total) as i64));
        }
        sleep(Duration::from_millis(20)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd_frame(parts: &[&[u8]]) -> RespFrame {
        RespFrame::command(parts)
    }

    #[test]
    fn parses_ping() {
        assert_eq!(parse_command(&cmd_frame(&[b"PING"])).unwrap(), Command::Ping);
        assert_eq!(parse_command(&cmd_frame(&[b"ping"])).unwrap(), Command::Ping);
    }

    #[test]
    fn parses_echo() {
        assert_eq!(
            parse_command(&cmd_frame(&[b"ECHO", b"hey"])).unwrap(),
            Command::Echo(Bytes::from_static(b"hey"))
        );
    }

    #[test]
    fn parses_set_with_px_case_insensitive() {
        let cmd = parse_command(&cmd_frame(&[b"SET", b"foo", b"bar", b"px", b"100"])).unwrap();
        assert_eq!(
            cmd,
            Command::Set {
                key: Bytes::from_static(b"foo"),
                value: Bytes::from_static(b"bar"),
                px_ms: Some(100),
            }
        );
    }

    #[test]
    fn parses_set_without_px() {
        let cmd = parse_command(&cmd_frame(&[b"SET", b"foo", b"bar"])).unwrap();
        assert_eq!(
            cmd,
            Command::Set {
                key: Bytes::from_static(b"foo"),
                value: Bytes::from_static(b"bar"),
                px_ms: None,
            }
        );
    }

    #[test]
    fn parses_del_multi_key() {
        let cmd = parse_command(&cmd_frame(&[b"DEL", b"a", b"b"])).unwrap();
        assert_eq!(
            cmd,
            Command::Del(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")])
        );
    }

    #[test]
    fn rejects_del_with_no_keys() {
        assert!(parse_command(&cmd_frame(&[b"DEL"])).is_err());
    }

    #[test]
    fn parses_replconf_listening_port_case_insensitive() {
        let cmd = parse_command(&cmd_frame(&[b"REPLCONF", b"LISTENING-PORT", b"6380"])).unwrap();
        assert_eq!(
            cmd,
            Command::Replconf(ReplConfArg::ListeningPort(6380))
        );
    }

    #[test]
    fn parses_replconf_getack() {
        let cmd = parse_command(&cmd_frame(&[b"REPLCONF", b"GETACK", b"*"])).unwrap();
        assert_eq!(cmd, Command::Replconf(ReplConfArg::GetAck));
    }

    #[test]
    fn parses_replconf_ack() {
        let cmd = parse_command(&cmd_frame(&[b"REPLCONF", b"ACK", b"42"])).unwrap();
        assert_eq!(cmd, Command::Replconf(ReplConfArg::Ack(42)));
    }

    #[test]
    fn parses_psync() {
        assert_eq!(
            parse_command(&cmd_frame(&[b"PSYNC", b"?", b"-1"])).unwrap(),
            Command::Psync
        );
    }

    #[test]
    fn parses_wait() {
        assert_eq!(
            parse_command(&cmd_frame(&[b"WAIT", b"1", b"500"])).unwrap(),
            Command::Wait {
                numreplicas: 1,
                timeout_ms: 500,
            }
        );
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(parse_command(&cmd_frame(&[b"NOPE"])).is_err());
    }
}
