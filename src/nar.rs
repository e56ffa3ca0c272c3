//! Structural copier for NAR (Nix ARchive) streams.
//!
//! The daemon sends a NAR as raw self-delimiting bytes with no outer length,
//! so the only way to know where it ends is to parse it. [`copy_nar`] walks
//! the archive grammar and echoes every byte it reads to the destination
//! writer, so the caller receives the original archive verbatim.

use crate::error::{IoErrorContext, ProtocolError};
use crate::serialization::wire;
use std::future::Future;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Magic token opening every archive.
const NAR_MAGIC: &[u8] = b"nix-archive-1";

/// Maximum size for small tokens: type names, parentheses, entry names,
/// symlink targets. File contents are streamed separately and are not
/// subject to this bound.
const MAX_TOKEN_SIZE: u64 = 4096;

/// Copy buffer size for file contents.
const COPY_BUF_SIZE: usize = 8192;

/// Read exactly one complete NAR archive from `src`, writing every byte read
/// to `dst`. Returns once the archive's closing parenthesis has been copied.
pub async fn copy_nar<R, W>(dst: &mut W, src: &mut R) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let magic = copy_token(dst, src).await.io_context("read NAR magic")?;
    if magic != NAR_MAGIC {
        return Err(ProtocolError::UnexpectedNarToken {
            expected: "nix-archive-1",
            found: String::from_utf8_lossy(&magic).into_owned(),
        });
    }

    copy_node(dst, src).await
}

/// Copy one node: `"(" "type" <type> <body> ")"`. Boxed because directory
/// entries recurse.
fn copy_node<'a, R, W>(
    dst: &'a mut W,
    src: &'a mut R,
) -> Pin<Box<dyn Future<Output = Result<(), ProtocolError>> + Send + 'a>>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    Box::pin(async move {
        expect_token(dst, src, b"(", "(").await?;
        expect_token(dst, src, b"type", "type").await?;

        let node_type = copy_token(dst, src).await.io_context("read node type")?;
        match node_type.as_slice() {
            b"regular" => copy_regular(dst, src).await,
            b"directory" => copy_directory(dst, src).await,
            b"symlink" => copy_symlink(dst, src).await,
            other => Err(ProtocolError::UnknownNarNodeType(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    })
}

/// Regular file: optional `"executable" ""`, optional `"contents" <bytes>`,
/// closing `")"`.
async fn copy_regular<R, W>(dst: &mut W, src: &mut R) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let tok = copy_token(dst, src).await.io_context("read file token")?;
        match tok.as_slice() {
            b"executable" => {
                // Followed by an empty string placeholder.
                let marker = copy_token(dst, src)
                    .await
                    .io_context("read executable marker")?;
                if !marker.is_empty() {
                    return Err(ProtocolError::UnexpectedNarToken {
                        expected: "\"\"",
                        found: String::from_utf8_lossy(&marker).into_owned(),
                    });
                }
            }
            b"contents" => copy_contents(dst, src).await?,
            b")" => return Ok(()),
            other => {
                return Err(ProtocolError::UnexpectedNarToken {
                    expected: "executable, contents or )",
                    found: String::from_utf8_lossy(other).into_owned(),
                })
            }
        }
    }
}

/// Directory: `entry` records until `")"`, each
/// `"entry" "(" "name" <str> "node" <node> ")"`.
async fn copy_directory<R, W>(dst: &mut W, src: &mut R) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let tok = copy_token(dst, src).await.io_context("read entry token")?;
        match tok.as_slice() {
            b")" => return Ok(()),
            b"entry" => {}
            other => {
                return Err(ProtocolError::UnexpectedNarToken {
                    expected: "entry or )",
                    found: String::from_utf8_lossy(other).into_owned(),
                })
            }
        }

        expect_token(dst, src, b"(", "(").await?;
        expect_token(dst, src, b"name", "name").await?;
        copy_token(dst, src).await.io_context("read entry name")?;
        expect_token(dst, src, b"node", "node").await?;
        copy_node(dst, src).await?;
        expect_token(dst, src, b")", ")").await?;
    }
}

/// Symlink: `"target" <str> ")"`.
async fn copy_symlink<R, W>(dst: &mut W, src: &mut R) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    expect_token(dst, src, b"target", "target").await?;
    copy_token(dst, src)
        .await
        .io_context("read symlink target")?;
    expect_token(dst, src, b")", ")").await
}

async fn expect_token<R, W>(
    dst: &mut W,
    src: &mut R,
    expected: &'static [u8],
    label: &'static str,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let tok = copy_token(dst, src).await.io_context("read NAR token")?;
    if tok != expected {
        return Err(ProtocolError::UnexpectedNarToken {
            expected: label,
            found: String::from_utf8_lossy(&tok).into_owned(),
        });
    }
    Ok(())
}

/// Copy one small wire string (length, data, padding) and return its value.
async fn copy_token<R, W>(dst: &mut W, src: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut len_buf = [0u8; 8];
    src.read_exact(&mut len_buf)
        .await
        .io_context("read token length")?;
    dst.write_all(&len_buf)
        .await
        .io_context("write token length")?;

    let len = u64::from_le_bytes(len_buf);
    if len > MAX_TOKEN_SIZE {
        return Err(ProtocolError::NarTokenTooLarge {
            length: len,
            max: MAX_TOKEN_SIZE,
        });
    }

    let mut data = vec![0u8; len as usize];
    src.read_exact(&mut data)
        .await
        .io_context("read token data")?;
    dst.write_all(&data).await.io_context("write token data")?;

    copy_padding(dst, src, len).await?;
    Ok(data)
}

/// Copy one wire bytes field, streaming the data through a fixed buffer.
/// Used for file contents, which can be arbitrarily large.
async fn copy_contents<R, W>(dst: &mut W, src: &mut R) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut len_buf = [0u8; 8];
    src.read_exact(&mut len_buf)
        .await
        .io_context("read contents length")?;
    dst.write_all(&len_buf)
        .await
        .io_context("write contents length")?;

    let len = u64::from_le_bytes(len_buf);
    let mut remaining = len;
    let mut buf = [0u8; COPY_BUF_SIZE];
    while remaining > 0 {
        let take = (buf.len() as u64).min(remaining) as usize;
        src.read_exact(&mut buf[..take])
            .await
            .io_context("read contents data")?;
        dst.write_all(&buf[..take])
            .await
            .io_context("write contents data")?;
        remaining -= take as u64;
    }

    copy_padding(dst, src, len).await
}

async fn copy_padding<R, W>(dst: &mut W, src: &mut R, len: u64) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let padding = wire::calc_padding(len);
    if padding == 0 {
        return Ok(());
    }

    let mut pad = [0u8; 8];
    src.read_exact(&mut pad[..padding])
        .await
        .io_context("read token padding")?;
    if pad[..padding].iter().any(|&b| b != 0) {
        return Err(ProtocolError::InvalidPadding);
    }
    dst.write_all(&pad[..padding])
        .await
        .io_context("write token padding")
}
