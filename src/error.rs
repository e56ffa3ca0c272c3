use crate::protocol::ProtocolVersion;
use std::fmt;
use thiserror::Error;

/// Top-level error type returned by all client operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The daemon reported an error in-band on the stderr channel. The
    /// connection stays usable after this.
    #[error(transparent)]
    Daemon(#[from] DaemonError),

    /// A wire-level failure: transport, encoding, or unexpected structure.
    /// The connection is unusable after this and should be closed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The operation was cancelled via the connection's cancellation token.
    /// The connection is left in an indeterminate state.
    #[error("operation cancelled")]
    Cancelled,

    /// The connection was closed with [`DaemonClient::close`].
    ///
    /// [`DaemonClient::close`]: crate::client::DaemonClient::close
    #[error("connection closed")]
    Closed,

    /// An earlier operation on this connection failed mid-request, leaving
    /// the wire out of sync.
    #[error("connection broken by an earlier failure")]
    Broken,

    /// Timed out waiting for a pooled connection to become available.
    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,

    /// Timed out establishing a new connection.
    #[error("timed out connecting to the daemon")]
    ConnectTimeout,
}

/// An error reported by the daemon on the stderr channel (`STDERR_ERROR`).
///
/// This closes the current request only; the session remains open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("daemon: {message}")]
pub struct DaemonError {
    /// Error class as reported by the daemon, e.g. `"Error"`.
    pub kind: String,
    /// Verbosity level the daemon attached to the error.
    pub level: u64,
    /// Error name.
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Trace entries, in wire order.
    pub traces: Vec<Trace>,
}

/// A single trace entry in a [`DaemonError`].
///
/// `have_pos` is always transmitted but carries no structured position in
/// this protocol version; it is preserved losslessly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub have_pos: u64,
    pub message: String,
}

/// A wire-level protocol failure.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid magic number: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },

    #[error("daemon protocol version {server} is older than minimum supported {min}")]
    UnsupportedVersion {
        server: ProtocolVersion,
        min: ProtocolVersion,
    },

    #[error("string too long: {length} bytes exceeds maximum {max}")]
    StringTooLong { length: u64, max: u64 },

    #[error("invalid string padding: expected null bytes")]
    InvalidPadding,

    #[error("invalid UTF-8 in wire string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("unknown stderr message tag: {0:#x}")]
    UnknownLogTag(u64),

    #[error("unknown log field type: {0}")]
    UnknownFieldType(u64),

    #[error("unknown {what} value: {value}")]
    UnknownEnumValue { what: &'static str, value: u64 },

    #[error("NAR token too large: {length} bytes (max {max})")]
    NarTokenTooLarge { length: u64, max: u64 },

    #[error("unexpected NAR token: expected {expected}, got {found:?}")]
    UnexpectedNarToken {
        expected: &'static str,
        found: String,
    },

    #[error("unknown NAR node type: {0:?}")]
    UnknownNarNodeType(String),

    #[error("write to closed framed writer")]
    FramedWriterClosed,
}

impl ProtocolError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Extension trait for attaching an operation label to IO errors.
pub(crate) trait IoErrorContext<T> {
    fn io_context<C: fmt::Display>(self, context: C) -> Result<T, ProtocolError>;
}

impl<T> IoErrorContext<T> for Result<T, std::io::Error> {
    fn io_context<C: fmt::Display>(self, context: C) -> Result<T, ProtocolError> {
        self.map_err(|e| ProtocolError::io(context.to_string(), e))
    }
}

impl<T> IoErrorContext<T> for Result<T, ProtocolError> {
    fn io_context<C: fmt::Display>(self, context: C) -> Result<T, ProtocolError> {
        self.map_err(|e| match e {
            ProtocolError::Io {
                context: inner,
                source,
            } => ProtocolError::Io {
                context: format!("{context}: {inner}"),
                source,
            },
            other => other,
        })
    }
}
