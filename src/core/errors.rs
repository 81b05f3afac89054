// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug, Clone)]
pub enum SpinelDBError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgumentCount(String),

    #[error("ERR syntax error")]
    SyntaxError,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("Replication error: {0}")]
    ReplicationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for SpinelDBError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}
