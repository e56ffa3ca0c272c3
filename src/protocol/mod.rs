pub mod messages;
pub mod opcodes;
pub mod types;
pub mod version;

pub use opcodes::OpCode;
pub use version::{ProtocolVersion, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};

/// Magic number the client sends to initiate the handshake ("nixc").
pub const CLIENT_MAGIC: u64 = 0x6e697863;

/// Magic number the daemon responds with ("dxio").
pub const SERVER_MAGIC: u64 = 0x6478696f;

/// Default maximum size in bytes for strings read from the daemon. Guards
/// against malformed or malicious payloads; configurable per connection via
/// [`ConnectOptions::max_string_size`].
///
/// [`ConnectOptions::max_string_size`]: crate::client::ConnectOptions::max_string_size
pub const MAX_STRING_SIZE: u64 = 64 * 1024 * 1024;
