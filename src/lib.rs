//! Async client for the Nix build daemon worker protocol.
//!
//! The worker protocol is a length-prefixed, 8-byte-aligned binary protocol
//! spoken over a stream socket (normally the daemon's Unix socket). A
//! [`DaemonClient`] owns one connection, serialises operations on it, and
//! surfaces the daemon's interleaved log/activity/error stream through an
//! optional log sink.
//!
//! # Example
//!
//! ```ignore
//! use nix_daemon_client::DaemonClient;
//!
//! let client = DaemonClient::connect(Path::new("/nix/var/nix/daemon-socket/socket")).await?;
//! let valid = client.is_valid_path("/nix/store/abc-test").await?;
//! ```

pub mod client;
pub mod error;
pub mod framed;
pub mod handshake;
pub mod logger;
pub mod nar;
pub mod protocol;
pub mod serialization;


pub use client::{
    pool::{ConnectionPool, PoolConfig, PooledClient},
    AddToStoreItem, ConnectOptions, DaemonClient, NarReader,
};
pub use error::{DaemonError, Error, ProtocolError, Trace};
pub use handshake::HandshakeInfo;
pub use protocol::{
    messages::{Activity, ActivityResult, ActivityType, LogField, LogMessage, ResultType, Verbosity},
    types::{
        BasicDerivation, BuildMode, BuildResult, BuildStatus, ClientSettings, DerivationOutput,
        GCAction, GCOptions, GCResult, KeyedBuildResult, MissingInfo, PathInfo, TrustLevel,
    },
    ProtocolVersion, CLIENT_MAGIC, MAX_STRING_SIZE, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION,
    SERVER_MAGIC,
};
