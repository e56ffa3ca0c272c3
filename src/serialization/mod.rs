pub mod primitives;
pub mod store_requests;
pub mod store_types;

use crate::error::ProtocolError;
use crate::protocol::{ProtocolVersion, MAX_STRING_SIZE, PROTOCOL_VERSION};
use tokio::io::{AsyncRead, AsyncWrite};

/// Per-connection codec context threaded through every wire read and write:
/// the negotiated protocol version and the read-side string size bound.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    pub version: ProtocolVersion,
    pub max_string: u64,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            max_string: MAX_STRING_SIZE,
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait Serialize {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError>;
}

#[allow(async_fn_in_trait)]
pub trait Deserialize: Sized {
    async fn deserialize<R: AsyncRead + Unpin>(
        reader: &mut R,
        codec: Codec,
    ) -> Result<Self, ProtocolError>;
}

/// Wire alignment helpers.
pub mod wire {
    /// Zero bytes for padding.
    pub const ZEROS: [u8; 8] = [0u8; 8];

    pub const fn calc_aligned(len: u64) -> u64 {
        len.wrapping_add(7) & !7
    }

    pub const fn calc_padding(len: u64) -> usize {
        let aligned = calc_aligned(len);
        aligned.wrapping_sub(len) as usize
    }
}
