use crate::error::{IoErrorContext, ProtocolError};
use crate::protocol::types::{
    AddPermRootRequest, AddSignaturesRequest, BuildDerivationRequest, BuildPathsRequest,
    ClientSettings, GCOptions, GCResult, QueryValidPathsRequest, VerifyStoreRequest,
};
use crate::serialization::{Codec, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

impl Serialize for ClientSettings {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        self.keep_failed
            .serialize(writer, codec)
            .await
            .io_context("write keepFailed")?;
        self.keep_going
            .serialize(writer, codec)
            .await
            .io_context("write keepGoing")?;
        self.try_fallback
            .serialize(writer, codec)
            .await
            .io_context("write tryFallback")?;
        (self.verbosity as u64)
            .serialize(writer, codec)
            .await
            .io_context("write verbosity")?;
        self.max_build_jobs
            .serialize(writer, codec)
            .await
            .io_context("write maxBuildJobs")?;
        self.max_silent_time
            .serialize(writer, codec)
            .await
            .io_context("write maxSilentTime")?;

        // useBuildHook: deprecated, always true.
        true.serialize(writer, codec)
            .await
            .io_context("write useBuildHook")?;

        (self.build_verbosity as u64)
            .serialize(writer, codec)
            .await
            .io_context("write buildVerbosity")?;

        // logType and printBuildTrace: deprecated, always 0.
        0u64.serialize(writer, codec)
            .await
            .io_context("write logType")?;
        0u64.serialize(writer, codec)
            .await
            .io_context("write printBuildTrace")?;

        self.build_cores
            .serialize(writer, codec)
            .await
            .io_context("write buildCores")?;
        self.use_substitutes
            .serialize(writer, codec)
            .await
            .io_context("write useSubstitutes")?;
        self.overrides
            .serialize(writer, codec)
            .await
            .io_context("write overrides")
    }
}

impl Serialize for GCOptions {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        (self.action as u64)
            .serialize(writer, codec)
            .await
            .io_context("write gc action")?;
        self.paths_to_delete
            .serialize(writer, codec)
            .await
            .io_context("write gc pathsToDelete")?;
        self.ignore_liveness
            .serialize(writer, codec)
            .await
            .io_context("write gc ignoreLiveness")?;
        self.max_freed
            .serialize(writer, codec)
            .await
            .io_context("write gc maxFreed")?;

        // Three deprecated fields, always zero.
        for _ in 0..3 {
            0u64.serialize(writer, codec)
                .await
                .io_context("write gc deprecated field")?;
        }
        Ok(())
    }
}

impl Deserialize for GCResult {
    async fn deserialize<R: AsyncRead + Unpin>(
        reader: &mut R,
        codec: Codec,
    ) -> Result<Self, ProtocolError> {
        let paths = Vec::<String>::deserialize(reader, codec)
            .await
            .io_context("read gc paths")?;
        let bytes_freed = u64::deserialize(reader, codec)
            .await
            .io_context("read gc bytesFreed")?;

        // Deprecated trailing field, consumed and ignored.
        u64::deserialize(reader, codec)
            .await
            .io_context("read gc deprecated field")?;

        Ok(GCResult { paths, bytes_freed })
    }
}

impl Serialize for QueryValidPathsRequest<'_> {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        self.paths.serialize(writer, codec).await?;
        self.substitute.serialize(writer, codec).await
    }
}

impl Serialize for BuildPathsRequest<'_> {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        self.paths.serialize(writer, codec).await?;
        (self.mode as u64).serialize(writer, codec).await
    }
}

impl Serialize for BuildDerivationRequest<'_> {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        self.drv_path.serialize(writer, codec).await?;
        self.derivation.serialize(writer, codec).await?;
        (self.mode as u64).serialize(writer, codec).await
    }
}

impl Serialize for AddSignaturesRequest<'_> {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        self.path.serialize(writer, codec).await?;
        self.sigs.serialize(writer, codec).await
    }
}

impl Serialize for AddPermRootRequest<'_> {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        self.store_path.serialize(writer, codec).await?;
        self.gc_root.serialize(writer, codec).await
    }
}

impl Serialize for VerifyStoreRequest {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        self.check_contents.serialize(writer, codec).await?;
        self.repair.serialize(writer, codec).await
    }
}
