use crate::error::{IoErrorContext, ProtocolError};
use crate::serialization::{wire, Codec, Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// Empty tuple, for operations with no request or no response body.
impl Serialize for () {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        _writer: &mut W,
        _codec: Codec,
    ) -> Result<(), ProtocolError> {
        Ok(())
    }
}

impl Deserialize for () {
    async fn deserialize<R: AsyncRead + Unpin>(
        _reader: &mut R,
        _codec: Codec,
    ) -> Result<Self, ProtocolError> {
        Ok(())
    }
}

impl Serialize for u64 {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        _codec: Codec,
    ) -> Result<(), ProtocolError> {
        writer
            .write_all(&self.to_le_bytes())
            .await
            .io_context("write u64")
    }
}

impl Deserialize for u64 {
    async fn deserialize<R: AsyncRead + Unpin>(
        reader: &mut R,
        _codec: Codec,
    ) -> Result<Self, ProtocolError> {
        let mut buf = [0; 8];
        reader.read_exact(&mut buf).await.io_context("read u64")?;
        Ok(u64::from_le_bytes(buf))
    }
}

impl Serialize for bool {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        (*self as u64).serialize(writer, codec).await
    }
}

impl Deserialize for bool {
    async fn deserialize<R: AsyncRead + Unpin>(
        reader: &mut R,
        codec: Codec,
    ) -> Result<Self, ProtocolError> {
        let value = u64::deserialize(reader, codec)
            .await
            .io_context("read bool")?;
        Ok(value != 0)
    }
}

impl Serialize for [u8] {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        let len = self.len() as u64;
        len.serialize(writer, codec)
            .await
            .io_context("write string length")?;
        writer
            .write_all(self)
            .await
            .io_context("write string data")?;

        let padding = wire::calc_padding(len);
        if padding > 0 {
            writer
                .write_all(&wire::ZEROS[..padding])
                .await
                .io_context("write string padding")?;
        }
        Ok(())
    }
}

impl Serialize for Vec<u8> {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        self.as_slice().serialize(writer, codec).await
    }
}

impl Deserialize for Vec<u8> {
    async fn deserialize<R: AsyncRead + Unpin>(
        reader: &mut R,
        codec: Codec,
    ) -> Result<Self, ProtocolError> {
        let len = u64::deserialize(reader, codec)
            .await
            .io_context("read string length")?;

        if len > codec.max_string {
            return Err(ProtocolError::StringTooLong {
                length: len,
                max: codec.max_string,
            });
        }

        // Read data and padding in one go, then verify the padding is null.
        let aligned = wire::calc_aligned(len);
        let mut buf = vec![0; aligned as usize];
        reader
            .read_exact(&mut buf)
            .await
            .io_context("read string data")?;

        if buf[len as usize..].iter().any(|&b| b != 0) {
            return Err(ProtocolError::InvalidPadding);
        }

        buf.truncate(len as usize);
        Ok(buf)
    }
}

impl Serialize for str {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        self.as_bytes().serialize(writer, codec).await
    }
}

impl Serialize for String {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        self.as_bytes().serialize(writer, codec).await
    }
}

impl Deserialize for String {
    async fn deserialize<R: AsyncRead + Unpin>(
        reader: &mut R,
        codec: Codec,
    ) -> Result<Self, ProtocolError> {
        let bytes = Vec::<u8>::deserialize(reader, codec).await?;
        Ok(String::from_utf8(bytes)?)
    }
}

impl Serialize for [String] {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        (self.len() as u64)
            .serialize(writer, codec)
            .await
            .io_context("write string list length")?;
        for item in self {
            item.serialize(writer, codec).await?;
        }
        Ok(())
    }
}

impl Serialize for Vec<String> {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        self.as_slice().serialize(writer, codec).await
    }
}

impl Deserialize for Vec<String> {
    async fn deserialize<R: AsyncRead + Unpin>(
        reader: &mut R,
        codec: Codec,
    ) -> Result<Self, ProtocolError> {
        let len = u64::deserialize(reader, codec)
            .await
            .io_context("read string list length")?;

        let mut result = Vec::new();
        for _ in 0..len {
            result.push(String::deserialize(reader, codec).await?);
        }
        Ok(result)
    }
}

impl<T: Serialize> Serialize for Option<T> {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        match self {
            None => false.serialize(writer, codec).await,
            Some(value) => {
                true.serialize(writer, codec).await?;
                value.serialize(writer, codec).await
            }
        }
    }
}

impl<T: Deserialize> Deserialize for Option<T> {
    async fn deserialize<R: AsyncRead + Unpin>(
        reader: &mut R,
        codec: Codec,
    ) -> Result<Self, ProtocolError> {
        let present = bool::deserialize(reader, codec)
            .await
            .io_context("read presence flag")?;
        if present {
            Ok(Some(T::deserialize(reader, codec).await?))
        } else {
            Ok(None)
        }
    }
}

// BTreeMap iteration is ascending by key, which is exactly the ordering the
// daemon requires for wire maps.
impl<K: Serialize + Ord, V: Serialize> Serialize for BTreeMap<K, V> {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        (self.len() as u64)
            .serialize(writer, codec)
            .await
            .io_context("write map length")?;
        for (key, value) in self {
            key.serialize(writer, codec).await?;
            value.serialize(writer, codec).await?;
        }
        Ok(())
    }
}

impl<K: Deserialize + Ord, V: Deserialize> Deserialize for BTreeMap<K, V> {
    async fn deserialize<R: AsyncRead + Unpin>(
        reader: &mut R,
        codec: Codec,
    ) -> Result<Self, ProtocolError> {
        let len = u64::deserialize(reader, codec)
            .await
            .io_context("read map length")?;

        let mut result = BTreeMap::new();
        for _ in 0..len {
            let key = K::deserialize(reader, codec).await?;
            let value = V::deserialize(reader, codec).await?;
            result.insert(key, value);
        }
        Ok(result)
    }
}
