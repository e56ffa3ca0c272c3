//! Handshake and version negotiation, run once per connection.

use crate::error::{Error, IoErrorContext, ProtocolError};
use crate::logger::process_stderr;
use crate::protocol::messages::LogMessage;
use crate::protocol::types::TrustLevel;
use crate::protocol::{
    ProtocolVersion, CLIENT_MAGIC, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION, SERVER_MAGIC,
};
use crate::serialization::{Codec, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedSender;

/// The result of a successful handshake. Immutable for the life of the
/// connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    /// The negotiated protocol version.
    pub version: ProtocolVersion,
    /// The daemon's Nix version string, e.g. `"nix (Nix) 2.24.0"`.
    pub daemon_version: String,
    /// The trust level the daemon assigned to this client.
    pub trust: TrustLevel,
}

/// Run the handshake over freshly opened buffered halves: magic exchange,
/// version negotiation, feature flags, daemon version, trust level, and the
/// post-handshake stderr drain.
pub(crate) async fn handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    sink: Option<&UnboundedSender<LogMessage>>,
    codec: Codec,
) -> Result<HandshakeInfo, Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Client opens with its magic.
    CLIENT_MAGIC
        .serialize(writer, codec)
        .await
        .io_context("handshake write client magic")?;
    writer
        .flush()
        .await
        .io_context("handshake flush client magic")?;

    // Daemon answers with its magic.
    let server_magic = u64::deserialize(reader, codec)
        .await
        .io_context("handshake read server magic")?;
    if server_magic != SERVER_MAGIC {
        return Err(ProtocolError::InvalidMagic {
            expected: SERVER_MAGIC,
            actual: server_magic,
        }
        .into());
    }

    // Daemon advertises its protocol version; negotiate down to ours.
    let server_version = ProtocolVersion::from(
        u64::deserialize(reader, codec)
            .await
            .io_context("handshake read server version")?,
    );
    let negotiated = server_version.min(PROTOCOL_VERSION);
    if negotiated < MIN_PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion {
            server: server_version,
            min: MIN_PROTOCOL_VERSION,
        }
        .into());
    }

    // Send the negotiated version and the two legacy feature flags:
    // cpuAffinity and reserveSpace, both unused.
    u64::from(negotiated)
        .serialize(writer, codec)
        .await
        .io_context("handshake write negotiated version")?;
    false
        .serialize(writer, codec)
        .await
        .io_context("handshake write cpu affinity")?;
    false
        .serialize(writer, codec)
        .await
        .io_context("handshake write reserve space")?;
    writer
        .flush()
        .await
        .io_context("handshake flush client flags")?;

    // Daemon reports its Nix version and our trust level.
    let daemon_version = String::deserialize(reader, codec)
        .await
        .io_context("handshake read daemon version")?;
    let trust_raw = u64::deserialize(reader, codec)
        .await
        .io_context("handshake read trust level")?;
    let trust = TrustLevel::try_from(trust_raw)?;

    // Drain the daemon's post-handshake start/stop-work cycle.
    process_stderr(reader, sink, codec).await?;

    Ok(HandshakeInfo {
        version: negotiated,
        daemon_version,
        trust,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::LogTag;
    use tokio::io::{duplex, AsyncReadExt, BufReader, BufWriter};

    async fn run_handshake(
        server_script: impl FnOnce(Vec<u8>) -> Vec<u8> + Send + 'static,
    ) -> Result<HandshakeInfo, Error> {
        let (client_side, mut server_side) = duplex(4096);
        let (read_half, write_half) = tokio::io::split(client_side);
        let mut reader = BufReader::new(read_half);
        let mut writer = BufWriter::new(write_half);

        let server = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            // Client magic.
            let mut magic = [0u8; 8];
            server_side.read_exact(&mut magic).await.unwrap();
            let response = server_script(magic.to_vec());
            server_side.write_all(&response).await.unwrap();
            // Keep the pipe open until the client is done.
            let mut rest = [0u8; 64];
            let _ = server_side.read(&mut rest).await;
        });

        let result = handshake(&mut reader, &mut writer, None, Codec::default()).await;
        server.abort();
        result
    }

    fn word(value: u64) -> Vec<u8> {
        value.to_le_bytes().to_vec()
    }

    fn wire_string(s: &str) -> Vec<u8> {
        let mut out = word(s.len() as u64);
        out.extend_from_slice(s.as_bytes());
        out.resize((out.len() + 7) & !7, 0);
        out
    }

    #[tokio::test]
    async fn successful_handshake() {
        let info = run_handshake(|magic| {
            assert_eq!(magic, word(CLIENT_MAGIC));
            let mut out = Vec::new();
            out.extend(word(SERVER_MAGIC));
            out.extend(word(u64::from(PROTOCOL_VERSION)));
            out.extend(wire_string("nix (Nix) 2.24.0"));
            out.extend(word(1)); // Trusted
            out.extend(word(LogTag::Last as u64));
            out
        })
        .await
        .unwrap();

        assert_eq!(info.version, PROTOCOL_VERSION);
        assert_eq!(info.daemon_version, "nix (Nix) 2.24.0");
        assert_eq!(info.trust, TrustLevel::Trusted);
    }

    #[tokio::test]
    async fn newer_server_negotiates_down_to_ours() {
        let info = run_handshake(|_| {
            let mut out = Vec::new();
            out.extend(word(SERVER_MAGIC));
            out.extend(word(0x0126));
            out.extend(wire_string("nix (Nix) 2.99.0"));
            out.extend(word(0)); // Unknown
            out.extend(word(LogTag::Last as u64));
            out
        })
        .await
        .unwrap();

        assert_eq!(info.version, PROTOCOL_VERSION);
        assert_eq!(info.trust, TrustLevel::Unknown);
    }

    #[tokio::test]
    async fn wrong_server_magic_rejected() {
        let err = run_handshake(|_| word(0xdeadbeef)).await.unwrap_err();
        match err {
            Error::Protocol(ProtocolError::InvalidMagic { expected, actual }) => {
                assert_eq!(expected, SERVER_MAGIC);
                assert_eq!(actual, 0xdeadbeef);
            }
            other => panic!("expected invalid magic, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn old_server_version_rejected() {
        let err = run_handshake(|_| {
            let mut out = Vec::new();
            out.extend(word(SERVER_MAGIC));
            out.extend(word(0x0124)); // 1.36
            out
        })
        .await
        .unwrap_err();

        match err {
            Error::Protocol(ProtocolError::UnsupportedVersion { server, min }) => {
                assert_eq!(server, ProtocolVersion::from(0x0124));
                assert_eq!(min, MIN_PROTOCOL_VERSION);
            }
            other => panic!("expected unsupported version, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_trust_level_rejected() {
        let err = run_handshake(|_| {
            let mut out = Vec::new();
            out.extend(word(SERVER_MAGIC));
            out.extend(word(u64::from(PROTOCOL_VERSION)));
            out.extend(wire_string("nix (Nix) 2.24.0"));
            out.extend(word(9));
            out
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnknownEnumValue {
                what: "trust level",
                ..
            })
        ));
    }
}
