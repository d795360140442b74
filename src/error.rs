use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors surfaced to the program embedding the server or client.
///
/// Conditions that the HTTP layer tolerates (malformed heads, unsupported
/// protocol versions, body length mismatches) are not errors; they are
/// reported as [`ParseIssue`](crate::ParseIssue)s next to the parsed message.
#[derive(Debug, Error)]
pub enum Error {
    /// The listening socket could not be bound.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The client could not open a connection to the server.
    #[error("cannot connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Polling the listening socket failed.
    #[error("polling failed: {0}")]
    Poll(io::Error),

    /// A route pattern is not a valid regular expression.
    #[error("invalid route pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A route with the same method and pattern is already registered.
    #[error("route {method} {pattern} is already registered")]
    DuplicateRoute { method: String, pattern: String },

    /// Error when a lock becomes poisoned due to a panic in another thread
    #[error("lock poisoned")]
    LockPoisoned,

    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Wrapper for standard I/O errors
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn bind(addr: impl ToString, source: io::Error) -> Self {
        Error::Bind {
            addr: addr.to_string(),
            source,
        }
    }
}

/// Represents errors that can occur while dispatching work to the worker pool.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Error when a mutex lock becomes poisoned due to a panic in another thread
    #[error("mutex lock poisoned")]
    LockPoisoned,

    /// Error when spawning a new thread fails
    #[error("thread spawn failed: {0}")]
    ThreadSpawn(io::Error),
}

/// Limits violated while assembling a frame off the wire.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// No header/body boundary within the configured head size.
    #[error("head exceeds {limit} bytes without a terminating blank line")]
    HeadTooLarge { limit: usize },

    /// The declared `Content-Length` is above the configured body size.
    #[error("declared body of {declared} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { declared: usize, limit: usize },
}

/// Type alias for Results using the crate [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Type alias for Results using ExecutorError as the error type
pub type ExecutorResult<T> = std::result::Result<T, ExecutorError>;

/// Formats the address a listener binds to, used in bind errors.
pub(crate) fn display_addr(iface: &str, port: u16) -> String {
    match iface.parse::<std::net::IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port).to_string(),
        Err(_) => format!("{iface}:{port}"),
    }
}
