// src/core/protocol/resp_frame.rs

//! Implements the RESP (REdis Serialization Protocol) frame structure and the
//! corresponding `Encoder` and `Decoder` for network communication.
//!
//! Two shapes matter here: the array-of-bulk-strings command frame, and the
//! inline RDB payload used once during the replication handshake (a bulk
//! string with no trailing CRLF, read out-of-band by [`read_rdb_payload`]
//! rather than through the `Decoder` impl below).

use crate::core::SpinelDBError;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits, guarding against a malicious or malformed frame
// forcing an unbounded allocation.
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024;
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;

/// The fixed empty-database RDB payload sent during `PSYNC` full resync.
/// The base64-decoded bytes of an empty RDB v11 dump.
pub const EMPTY_RDB: &[u8] = &[
    0x52, 0x45, 0x44, 0x49, 0x53, 0x30, 0x30, 0x31, 0x31, 0xfa, 0x09, 0x72, 0x65, 0x64, 0x69,
    0x73, 0x2d, 0x76, 0x65, 0x72, 0x05, 0x37, 0x2e, 0x32, 0x2e, 0x30, 0xfa, 0x0a, 0x72, 0x65,
    0x64, 0x69, 0x73, 0x2d, 0x62, 0x69, 0x74, 0x73, 0xc0, 0x40, 0xfa, 0x05, 0x63, 0x74, 0x69,
    0x6d, 0x65, 0xc2, 0x6d, 0x08, 0xbc, 0x65, 0xfa, 0x08, 0x75, 0x73, 0x65, 0x64, 0x2d, 0x6d,
    0x65, 0x6d, 0xc2, 0xb0, 0xc4, 0x10, 0x00, 0xfa, 0x08, 0x61, 0x6f, 0x66, 0x2d, 0x62, 0x61,
    0x73, 0x65, 0x00, 0x00, 0xff, 0xf0, 0x6e, 0x3b, 0xfe, 0xc0, 0xff, 0x5a, 0xa2,
];

/// A single frame in the RESP protocol: the low-level representation of data
/// exchanged between a client and this server, or between a primary and a
/// replica.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// Encodes this frame into a freshly allocated byte vector. Used for
    /// replication, where the exact wire-byte length of the encoded frame is
    /// itself part of the protocol (it becomes the propagation offset delta).
    pub fn encode_to_vec(&self) -> Result<Vec<u8>, SpinelDBError> {
        let mut buf = BytesMut::new();
        RespFrameCodec.encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }

    /// Builds a command frame: `*<n>\r\n($<len>\r\n<bytes>\r\n){n}`.
    pub fn command(parts: &[&[u8]]) -> RespFrame {
        RespFrame::Array(
            parts
                .iter()
                .map(|p| RespFrame::BulkString(Bytes::copy_from_slice(p)))
                .collect(),
        )
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `RespFrame`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = SpinelDBError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            RespFrame::SimpleString(s) => {
                dst.extend_from_slice(b"+");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Error(s) => {
                dst.extend_from_slice(b"-");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Integer(i) => {
                dst.extend_from_slice(b":");
                dst.extend_from_slice(i.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::BulkString(b) => {
                dst.extend_from_slice(b"$");
                dst.extend_from_slice(b.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(&b);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => {
                dst.extend_from_slice(b"$-1\r\n");
            }
            RespFrame::Array(arr) => {
                dst.extend_from_slice(b"*");
                dst.extend_from_slice(arr.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    self.encode(frame, dst)?;
                }
            }
        }
        Ok(())
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = SpinelDBError;

    /// Decodes a `RespFrame` from a `BytesMut` buffer.
    ///
    /// Returns `Ok(None)` if the buffer does not yet contain a full frame,
    /// so the caller can wait for more bytes. Calling this again with more
    /// bytes appended to the previous unconsumed tail produces the same
    /// result as a single call on the concatenation, since all partial-frame
    /// state lives in `src` itself rather than in `self`.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse_frame(src) {
            Ok((frame, len)) => {
                src.advance(len);
                Ok(Some(frame))
            }
            Err(SpinelDBError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// The main parsing entry point: inspects the first byte (the type prefix)
/// and dispatches to the matching parser. A malformed header (an
/// unrecognized prefix, or a non-integer count) is reported as a
/// `SyntaxError` / `NotAnInteger`, which callers that can't resynchronize
/// treat as fatal for the connection.
fn parse_frame(src: &[u8]) -> Result<(RespFrame, usize), SpinelDBError> {
    if src.is_empty() {
        return Err(SpinelDBError::IncompleteData);
    }
    match src[0] {
        b'+' => parse_simple_string(src),
        b'-' => parse_error(src),
        b':' => parse_integer(src),
        b'$' => parse_bulk_string(src),
        b'*' => parse_array(src),
        _ => Err(SpinelDBError::SyntaxError),
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|window| window == CRLF)
}

fn parse_line(src: &[u8]) -> Result<(&[u8], usize), SpinelDBError> {
    find_crlf(src)
        .map(|pos| (&src[..pos], pos + CRLF_LEN))
        .ok_or(SpinelDBError::IncompleteData)
}

fn parse_simple_string(src: &[u8]) -> Result<(RespFrame, usize), SpinelDBError> {
    let (line, len) = parse_line(&src[1..])?;
    Ok((
        RespFrame::SimpleString(String::from_utf8_lossy(line).to_string()),
        len + 1,
    ))
}

fn parse_error(src: &[u8]) -> Result<(RespFrame, usize), SpinelDBError> {
    let (line, len) = parse_line(&src[1..])?;
    Ok((
        RespFrame::Error(String::from_utf8_lossy(line).to_string()),
        len + 1,
    ))
}

fn parse_integer(src: &[u8]) -> Result<(RespFrame, usize), SpinelDBError> {
    let (line, len) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let i = s.parse::<i64>().map_err(|_| SpinelDBError::NotAnInteger)?;
    Ok((RespFrame::Integer(i), len + 1))
}

fn parse_bulk_string(src: &[u8]) -> Result<(RespFrame, usize), SpinelDBError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let str_len = s.parse::<isize>().map_err(|_| SpinelDBError::SyntaxError)?;

    if str_len == -1 {
        return Ok((RespFrame::Null, len_of_line + 1));
    }
    if str_len < 0 {
        return Err(SpinelDBError::SyntaxError);
    }

    let str_len = str_len as usize;
    if str_len > MAX_BULK_STRING_SIZE {
        return Err(SpinelDBError::SyntaxError);
    }

    let total_len_prefix = len_of_line + 1;
    if src.len() < total_len_prefix + str_len + CRLF_LEN {
        return Err(SpinelDBError::IncompleteData);
    }
    if &src[total_len_prefix + str_len..total_len_prefix + str_len + CRLF_LEN] != CRLF {
        return Err(SpinelDBError::SyntaxError);
    }

    let data_start = total_len_prefix;
    let data_end = total_len_prefix + str_len;
    let data = Bytes::copy_from_slice(&src[data_start..data_end]);
    Ok((RespFrame::BulkString(data), data_end + CRLF_LEN))
}

fn parse_array(src: &[u8]) -> Result<(RespFrame, usize), SpinelDBError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let arr_len = s.parse::<isize>().map_err(|_| SpinelDBError::SyntaxError)?;
    if arr_len < 0 {
        return Err(SpinelDBError::SyntaxError);
    }

    let arr_len = arr_len as usize;
    if arr_len > MAX_FRAME_ELEMENTS {
        return Err(SpinelDBError::SyntaxError);
    }

    let mut frames = Vec::with_capacity(arr_len);
    let mut cursor = len_of_line + 1;
    for _ in 0..arr_len {
        let (frame, frame_len) = parse_frame(&src[cursor..])?;
        frames.push(frame);
        cursor += frame_len;
    }

    Ok((RespFrame::Array(frames), cursor))
}

/// Reads the inline RDB payload sent during `PSYNC` full resync:
/// `$<len>\r\n<len bytes>`, with **no** trailing CRLF. This is read directly
/// off a buffered reader rather than through `RespFrameCodec::decode`,
/// because the missing terminator would otherwise make it indistinguishable
/// from a truncated ordinary bulk string.
pub async fn read_rdb_payload<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Bytes, SpinelDBError> {
    let mut header = String::new();
    reader.read_line(&mut header).await?;
    let header = header.trim_end();
    let len_str = header
        .strip_prefix('$')
        .ok_or_else(|| SpinelDBError::ProtocolError("expected RDB length prefix".into()))?;
    let len: usize = len_str
        .parse()
        .map_err(|_| SpinelDBError::ProtocolError(format!("invalid RDB length: {len_str}")))?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Bytes::from(body))
}

/// Encodes the inline RDB payload shape: `$<len>\r\n<bytes>` with no
/// trailing CRLF.
pub fn encode_rdb_payload(bytes: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(bytes.len() + 16);
    buf.extend_from_slice(b"$");
    buf.extend_from_slice(bytes.len().to_string().as_bytes());
    buf.extend_from_slice(CRLF);
    buf.extend_from_slice(bytes);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: RespFrame) -> Vec<u8> {
        frame.encode_to_vec().unwrap()
    }

    fn decode_all(mut buf: BytesMut) -> Vec<RespFrame> {
        let mut codec = RespFrameCodec;
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn encodes_simple_string() {
        assert_eq!(encode(RespFrame::SimpleString("OK".into())), b"+OK\r\n");
    }

    #[test]
    fn encodes_null_bulk_string() {
        assert_eq!(encode(RespFrame::Null), b"$-1\r\n");
    }

    #[test]
    fn encodes_bulk_string() {
        assert_eq!(
            encode(RespFrame::BulkString(Bytes::from_static(b"hey"))),
            b"$3\r\nhey\r\n"
        );
    }

    #[test]
    fn decodes_command_array() {
        let buf = BytesMut::from(&b"*2\r\n$4\r\nECHO\r\n$3\r\nhey\r\n"[..]);
        let frames = decode_all(buf);
        assert_eq!(
            frames,
            vec![RespFrame::Array(vec![
                RespFrame::BulkString(Bytes::from_static(b"ECHO")),
                RespFrame::BulkString(Bytes::from_static(b"hey")),
            ])]
        );
    }

    #[test]
    fn decode_is_resumable_across_partial_reads() {
        let whole = b"*1\r\n$4\r\nPING\r\n".to_vec();
        for split_at in 0..whole.len() {
            let mut codec = RespFrameCodec;
            let mut buf = BytesMut::from(&whole[..split_at]);
            assert_eq!(codec.decode(&mut buf).unwrap(), None);
            buf.extend_from_slice(&whole[split_at..]);
            let frame = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(
                frame,
                RespFrame::Array(vec![RespFrame::BulkString(Bytes::from_static(b"PING"))])
            );
        }
    }

    #[test]
    fn decodes_coalesced_commands_same_as_split_calls() {
        let a = b"*1\r\n$4\r\nPING\r\n".to_vec();
        let b = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n".to_vec();

        let mut combined = BytesMut::new();
        combined.extend_from_slice(&a);
        combined.extend_from_slice(&b);
        let combined_frames = decode_all(combined);

        let mut separate = Vec::new();
        separate.extend(decode_all(BytesMut::from(&a[..])));
        separate.extend(decode_all(BytesMut::from(&b[..])));

        assert_eq!(combined_frames, separate);
    }

    #[test]
    fn malformed_header_reports_error_not_panic() {
        let mut codec = RespFrameCodec;
        let mut buf = BytesMut::from(&b"*notanumber\r\n"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
