// src/config.rs

//! Server configuration, resolved once at startup from command-line flags
//! (§6). There is no config-file concept in this design: the teacher's
//! `main.rs` pattern of scanning `env::args()` directly is generalized here
//! into a small, testable parser instead of inline `if` chains.

/// The server's fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Always `localhost` (§6); there is no flag for it.
    pub host: String,
    pub port: u16,
    pub replica_of: Option<ReplicaOf>,
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaOf {
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            replica_of: None,
            log_level: "info".to_string(),
        }
    }
}

/// Describes why argument parsing failed, formatted for a stderr message
/// before a non-zero exit (§6 ambient CLI additions) rather than a panic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("--port requires a value")]
    MissingPortValue,
    #[error("invalid port number: {0}")]
    InvalidPort(String),
    #[error("--replicaof requires a <host> <port> pair")]
    MissingReplicaOfValue,
    #[error("invalid --replicaof port number: {0}")]
    InvalidReplicaOfPort(String),
    #[error("unrecognized argument: {0}")]
    UnrecognizedArgument(String),
}

impl Config {
    /// Parses `--port <u16>` and `--replicaof <host> <port>` out of a raw
    /// argument list (`std::env::args().skip(1)`, typically). Unknown flags
    /// are rejected rather than silently ignored, matching §7's "fail fast
    /// at startup, never mid-operation" stance for configuration.
    pub fn parse<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Config::default();
        let mut iter = args.into_iter().map(|s| s.as_ref().to_string()).peekable();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--port" => {
                    let value = iter.next().ok_or(ConfigError::MissingPortValue)?;
                    config.port = value
                        .parse()
                        .map_err(|_| ConfigError::InvalidPort(value.clone()))?;
                }
                "--replicaof" => {
                    let host = iter.next().ok_or(ConfigError::MissingReplicaOfValue)?;
                    let port_str = iter.next().ok_or(ConfigError::MissingReplicaOfValue)?;
                    let port = port_str
                        .parse()
                        .map_err(|_| ConfigError::InvalidReplicaOfPort(port_str.clone()))?;
                    config.replica_of = Some(ReplicaOf { host, port });
                }
                other => return Err(ConfigError::UnrecognizedArgument(other.to_string())),
            }
        }

        Ok(config)
    }
}
