use std::fmt;
use std::net::SocketAddr;

use crate::session_management::SessionState;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidSize(String),
    InvalidMethod(String),
    InvalidWorkload(String),
    MissingValue(String),
    EmptySource(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidSize(e) => write!(f, "Invalid size: {}", e),
            ConfigError::InvalidMethod(e) => write!(f, "Invalid read method: {}", e),
            ConfigError::InvalidWorkload(e) => write!(f, "Invalid workload: {}", e),
            ConfigError::MissingValue(e) => write!(f, "Missing value: {}", e),
            ConfigError::EmptySource(e) => write!(f, "Empty data source: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum ConnectionError {
    Bind(SocketAddr, std::io::Error),
    Listen(SocketAddr, std::io::Error),
    Accept(std::io::Error),
    Resolve(String, std::io::Error),
    RetriesExhausted {
        address: String,
        attempts: u32,
        last_error: String,
    },
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Bind(addr, e) => write!(f, "Unable to bind on {}: {}", addr, e),
            ConnectionError::Listen(addr, e) => write!(f, "Unable to listen on {}: {}", addr, e),
            ConnectionError::Accept(e) => write!(f, "Unable to accept: {}", e),
            ConnectionError::Resolve(host, e) => write!(f, "Unable to resolve {}: {}", host, e),
            ConnectionError::RetriesExhausted {
                address,
                attempts,
                last_error,
            } => write!(
                f,
                "Could not connect to {} after {} attempt(s): {}",
                address, attempts, last_error
            ),
        }
    }
}

impl std::error::Error for ConnectionError {}

#[derive(Debug)]
pub enum ProtocolError {
    BadMagic([u8; 4]),
    UnsupportedVersion(u8),
    UnknownTermination(u8),
    UnknownPayloadMode(u8),
    FrameTooLarge { len: u32, max: u32 },
    AckMismatch { expected: u32, got: u32 },
    UnexpectedEof(&'static str),
    SourceExhausted,
    Io(std::io::Error),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::BadMagic(m) => write!(f, "Bad preamble magic {:?}", m),
            ProtocolError::UnsupportedVersion(v) => write!(f, "Unsupported protocol version {}", v),
            ProtocolError::UnknownTermination(k) => write!(f, "Unknown termination kind {}", k),
            ProtocolError::UnknownPayloadMode(m) => write!(f, "Unknown payload mode {}", m),
            ProtocolError::FrameTooLarge { len, max } => {
                write!(f, "Frame of {} bytes exceeds the announced maximum {}", len, max)
            }
            ProtocolError::AckMismatch { expected, got } => {
                write!(f, "Acknowledged {} bytes, expected {}", got, expected)
            }
            ProtocolError::UnexpectedEof(at) => write!(f, "Peer closed while reading {}", at),
            ProtocolError::SourceExhausted => {
                write!(f, "Read method filtered out a full pass of the data source")
            }
            ProtocolError::Io(e) => write!(f, "Stream IO error: {}", e),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        ProtocolError::Io(err)
    }
}

#[derive(Debug)]
pub enum SessionError {
    InvalidTransition { from: SessionState, to: SessionState },
    NotEstablished(SessionState),
    NotFound,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidTransition { from, to } => {
                write!(f, "Invalid session transition {:?} -> {:?}", from, to)
            }
            SessionError::NotEstablished(state) => {
                write!(f, "Session is not established (state {:?})", state)
            }
            SessionError::NotFound => write!(f, "Session not found"),
        }
    }
}

impl std::error::Error for SessionError {}

#[derive(Debug)]
pub enum StorageError {
    WriteFailed(String),
    ReadFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

/// Top-level error of a `client` or `server` run.
#[derive(Debug)]
pub enum BenchError {
    Config(ConfigError),
    Connection(ConnectionError),
    Protocol(ProtocolError),
    Session(SessionError),
    Storage(StorageError),
    Interrupted,
}

impl BenchError {
    /// Process exit code for this error. Configuration problems are told apart from runtime
    /// and connection failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            BenchError::Config(_) => 2,
            BenchError::Interrupted => 130,
            _ => 1,
        }
    }

    /// Short category used in the `sockbench: error:` diagnostic line.
    pub fn category(&self) -> &'static str {
        match self {
            BenchError::Config(_) => "config",
            BenchError::Connection(_) => "connection",
            BenchError::Protocol(_) => "protocol",
            BenchError::Session(_) => "session",
            BenchError::Storage(_) => "storage",
            BenchError::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchError::Config(e) => write!(f, "Configuration error: {}", e),
            BenchError::Connection(e) => write!(f, "Connection error: {}", e),
            BenchError::Protocol(e) => write!(f, "Protocol error: {}", e),
            BenchError::Session(e) => write!(f, "Session error: {}", e),
            BenchError::Storage(e) => write!(f, "Storage error: {}", e),
            BenchError::Interrupted => write!(f, "Interrupted"),
        }
    }
}

impl std::error::Error for BenchError {}

impl From<ConfigError> for BenchError {
    fn from(err: ConfigError) -> Self {
        BenchError::Config(err)
    }
}

impl From<ConnectionError> for BenchError {
    fn from(err: ConnectionError) -> Self {
        BenchError::Connection(err)
    }
}

impl From<ProtocolError> for BenchError {
    fn from(err: ProtocolError) -> Self {
        BenchError::Protocol(err)
    }
}

impl From<SessionError> for BenchError {
    fn from(err: SessionError) -> Self {
        BenchError::Session(err)
    }
}

impl From<StorageError> for BenchError {
    fn from(err: StorageError) -> Self {
        BenchError::Storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_config_from_runtime() {
        let config = BenchError::from(ConfigError::InvalidSize("1.5K".into()));
        let conn = BenchError::from(ConnectionError::RetriesExhausted {
            address: "10.255.255.1:8881".into(),
            attempts: 4,
            last_error: "timed out".into(),
        });
        assert_eq!(config.exit_code(), 2);
        assert_eq!(conn.exit_code(), 1);
        assert_ne!(config.exit_code(), conn.exit_code());
        assert_eq!(BenchError::Interrupted.exit_code(), 130);
    }

    #[test]
    fn display_names_the_failing_address() {
        let err = ConnectionError::RetriesExhausted {
            address: "example.invalid:8881".into(),
            attempts: 4,
            last_error: "refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("example.invalid:8881"));
        assert!(msg.contains("4 attempt(s)"));
    }
}
