// src/core/protocol/mod.rs

//! The RESP (REdis Serialization Protocol) framing layer: decodes a byte
//! stream into discrete command frames across partial reads, and encodes
//! typed responses.

pub mod resp_frame;

pub use resp_frame::{EMPTY_RDB, RespFrame, RespFrameCodec, encode_rdb_payload, read_rdb_payload};
