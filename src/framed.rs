//! The framed sub-protocol used for streaming payloads inside a single
//! operation.
//!
//! A framed stream is a sequence of chunks, each a u64 length followed by
//! that many payload bytes and null padding to the next 8-byte boundary. A
//! zero-length chunk terminates the stream.

use crate::error::{IoErrorContext, ProtocolError};
use crate::serialization::wire;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default flush threshold for [`FramedWriter`].
pub const DEFAULT_FRAME_SIZE: usize = 32 * 1024;

/// Writes a framed stream. Data is buffered and emitted as one frame per
/// `frame_size` bytes; [`close`](FramedWriter::close) flushes the remainder
/// and writes the zero-length terminator.
pub struct FramedWriter<W> {
    writer: W,
    buf: Vec<u8>,
    frame_size: usize,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    pub fn new(writer: W) -> Self {
        Self::with_frame_size(writer, DEFAULT_FRAME_SIZE)
    }

    pub fn with_frame_size(writer: W, frame_size: usize) -> Self {
        Self {
            writer,
            buf: Vec::with_capacity(frame_size),
            frame_size,
            closed: false,
        }
    }

    /// Buffer `data`, flushing full frames as the buffer fills.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if self.closed {
            return Err(ProtocolError::FramedWriterClosed);
        }

        let mut remaining = data;
        while !remaining.is_empty() {
            let space = self.frame_size - self.buf.len();
            let take = remaining.len().min(space);
            self.buf.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];

            if self.buf.len() == self.frame_size {
                self.flush_frame().await?;
            }
        }
        Ok(())
    }

    /// Flush any buffered data as a final frame, then write the zero-length
    /// terminator. Idempotent.
    pub async fn close(&mut self) -> Result<(), ProtocolError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.flush_frame().await?;
        self.writer
            .write_all(&0u64.to_le_bytes())
            .await
            .io_context("write frame terminator")
    }

    async fn flush_frame(&mut self) -> Result<(), ProtocolError> {
        let len = self.buf.len() as u64;
        if len == 0 {
            return Ok(());
        }

        self.writer
            .write_all(&len.to_le_bytes())
            .await
            .io_context("write frame length")?;
        self.writer
            .write_all(&self.buf)
            .await
            .io_context("write frame data")?;

        let padding = wire::calc_padding(len);
        if padding > 0 {
            self.writer
                .write_all(&wire::ZEROS[..padding])
                .await
                .io_context("write frame padding")?;
        }

        self.buf.clear();
        Ok(())
    }
}

/// Reads a framed stream back as a continuous byte stream. Frame headers and
/// padding are consumed transparently and never surfaced; after the
/// zero-length terminator all reads return 0.
pub struct FramedReader<R> {
    reader: R,
    /// Bytes remaining in the current frame.
    remaining: u64,
    /// Length of the current frame, for the padding that follows it.
    frame_len: u64,
    done: bool,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            remaining: 0,
            frame_len: 0,
            done: false,
        }
    }

    /// Read up to `buf.len()` payload bytes. Returns 0 at end-of-stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }

        if self.remaining == 0 {
            self.next_frame().await?;
            if self.done {
                return Ok(0);
            }
        }

        let take = (buf.len() as u64).min(self.remaining) as usize;
        self.reader
            .read_exact(&mut buf[..take])
            .await
            .io_context("read frame data")?;
        self.remaining -= take as u64;
        Ok(take)
    }

    /// Read payload bytes until the terminator frame, appending to `out`.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let mut buf = [0u8; 8192];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Consume and discard the rest of the stream, up to and including the
    /// terminator. Keeps the underlying stream positioned for whatever
    /// follows the framed section.
    pub async fn drain(&mut self) -> Result<(), ProtocolError> {
        let mut buf = [0u8; 8192];
        while self.read(&mut buf).await? > 0 {}
        Ok(())
    }

    /// Finish the previous frame's padding and read the next frame header.
    async fn next_frame(&mut self) -> Result<(), ProtocolError> {
        self.skip_padding().await?;

        let mut len_buf = [0u8; 8];
        self.reader
            .read_exact(&mut len_buf)
            .await
            .io_context("read frame length")?;
        let len = u64::from_le_bytes(len_buf);

        if len == 0 {
            self.done = true;
            self.frame_len = 0;
            return Ok(());
        }

        self.remaining = len;
        self.frame_len = len;
        Ok(())
    }

    async fn skip_padding(&mut self) -> Result<(), ProtocolError> {
        let padding = wire::calc_padding(self.frame_len);
        if padding == 0 {
            return Ok(());
        }

        let mut pad = [0u8; 8];
        self.reader
            .read_exact(&mut pad[..padding])
            .await
            .io_context("read frame padding")?;
        if pad[..padding].iter().any(|&b| b != 0) {
            return Err(ProtocolError::InvalidPadding);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    async fn frame(payload: &[u8], frame_size: usize) -> Vec<u8> {
        let mut wire = Vec::new();
        let mut writer = FramedWriter::with_frame_size(&mut wire, frame_size);
        writer.write(payload).await.unwrap();
        writer.close().await.unwrap();
        wire
    }

    async fn unframe(wire: &[u8]) -> Vec<u8> {
        let mut reader = FramedReader::new(Cursor::new(wire.to_vec()));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn empty_payload_is_just_the_terminator() {
        let wire = frame(b"", 16).await;
        assert_eq!(wire, 0u64.to_le_bytes());
        assert_eq!(unframe(&wire).await, b"");
    }

    #[tokio::test]
    async fn single_frame_layout() {
        let wire = frame(b"hello", 16).await;
        // length 5, "hello", 3 padding bytes, terminator.
        assert_eq!(&wire[..8], &5u64.to_le_bytes());
        assert_eq!(&wire[8..13], b"hello");
        assert_eq!(&wire[13..16], &[0, 0, 0]);
        assert_eq!(&wire[16..], &0u64.to_le_bytes());
    }

    #[tokio::test]
    async fn payload_split_across_frames() {
        let payload: Vec<u8> = (0..100u8).collect();
        let wire = frame(&payload, 32).await;
        // Three full 32-byte frames plus one 4-byte frame: no padding on the
        // full frames, 4 padding bytes on the last.
        assert_eq!(wire.len(), 3 * (8 + 32) + (8 + 4 + 4) + 8);
        assert_eq!(unframe(&wire).await, payload);
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let mut wire = Vec::new();
        let mut writer = FramedWriter::with_frame_size(&mut wire, 16);
        writer.write(b"data").await.unwrap();
        writer.close().await.unwrap();
        let err = writer.write(b"more").await.unwrap_err();
        assert!(matches!(err, ProtocolError::FramedWriterClosed));
        // A second close is a no-op.
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn nonzero_frame_padding_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&3u64.to_le_bytes());
        wire.extend_from_slice(b"abc");
        wire.extend_from_slice(&[0, 1, 0, 0, 0]);
        wire.extend_from_slice(&0u64.to_le_bytes());

        let mut reader = FramedReader::new(Cursor::new(wire));
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPadding));
    }

    #[tokio::test]
    async fn reads_after_terminator_yield_eof() {
        let wire = frame(b"x", 16).await;
        let mut reader = FramedReader::new(Cursor::new(wire));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reader_stops_at_terminator() {
        // Bytes after the terminator belong to the enclosing protocol and
        // must not be consumed.
        let mut wire = frame(b"payload", 16).await;
        wire.extend_from_slice(b"TRAILER!");

        let mut cursor = Cursor::new(wire);
        let mut reader = FramedReader::new(&mut cursor);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"payload");

        let mut trailer = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut cursor, &mut trailer)
            .await
            .unwrap();
        assert_eq!(trailer, b"TRAILER!");
    }

    proptest! {
        #[test]
        fn framing_roundtrip(
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
            frame_size in 1usize..128,
        ) {
            tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap()
                .block_on(async {
                    let wire = frame(&payload, frame_size).await;
                    // The wire always ends with exactly one terminator.
                    prop_assert_eq!(&wire[wire.len() - 8..], &0u64.to_le_bytes());
                    let back = unframe(&wire).await;
                    prop_assert_eq!(back, payload);
                    Ok(())
                })?;
        }
    }
}
