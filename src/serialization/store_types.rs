use crate::error::{IoErrorContext, ProtocolError};
use crate::protocol::types::{
    BasicDerivation, BuildResult, BuildStatus, KeyedBuildResult, MissingInfo, PathInfo,
};
use crate::serialization::{Codec, Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncWrite};

// PathInfo travels in the unkeyed ValidPathInfo layout: deriver, narHash,
// references, registrationTime, narSize, ultimate, sigs, contentAddress.
// Absent deriver/contentAddress are empty strings on the wire.
impl Serialize for PathInfo {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        self.deriver
            .as_deref()
            .unwrap_or("")
            .serialize(writer, codec)
            .await
            .io_context("write path info deriver")?;
        self.nar_hash
            .serialize(writer, codec)
            .await
            .io_context("write path info narHash")?;
        self.references
            .serialize(writer, codec)
            .await
            .io_context("write path info references")?;
        self.registration_time
            .serialize(writer, codec)
            .await
            .io_context("write path info registrationTime")?;
        self.nar_size
            .serialize(writer, codec)
            .await
            .io_context("write path info narSize")?;
        self.ultimate
            .serialize(writer, codec)
            .await
            .io_context("write path info ultimate")?;
        self.sigs
            .serialize(writer, codec)
            .await
            .io_context("write path info sigs")?;
        self.content_address
            .as_deref()
            .unwrap_or("")
            .serialize(writer, codec)
            .await
            .io_context("write path info contentAddress")
    }
}

impl Deserialize for PathInfo {
    async fn deserialize<R: AsyncRead + Unpin>(
        reader: &mut R,
        codec: Codec,
    ) -> Result<Self, ProtocolError> {
        let deriver = String::deserialize(reader, codec)
            .await
            .io_context("read path info deriver")?;
        let nar_hash = String::deserialize(reader, codec)
            .await
            .io_context("read path info narHash")?;
        let references = Vec::<String>::deserialize(reader, codec)
            .await
            .io_context("read path info references")?;
        let registration_time = u64::deserialize(reader, codec)
            .await
            .io_context("read path info registrationTime")?;
        let nar_size = u64::deserialize(reader, codec)
            .await
            .io_context("read path info narSize")?;
        let ultimate = bool::deserialize(reader, codec)
            .await
            .io_context("read path info ultimate")?;
        let sigs = Vec::<String>::deserialize(reader, codec)
            .await
            .io_context("read path info sigs")?;
        let content_address = String::deserialize(reader, codec)
            .await
            .io_context("read path info contentAddress")?;

        Ok(PathInfo {
            deriver: (!deriver.is_empty()).then_some(deriver),
            nar_hash,
            references,
            registration_time,
            nar_size,
            ultimate,
            sigs,
            content_address: (!content_address.is_empty()).then_some(content_address),
        })
    }
}

// BasicDerivation is only ever sent, never received. Outputs and env are
// BTreeMaps, so the sorted wire order falls out of iteration.
impl Serialize for BasicDerivation {
    async fn serialize<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        codec: Codec,
    ) -> Result<(), ProtocolError> {
        (self.outputs.len() as u64)
            .serialize(writer, codec)
            .await
            .io_context("write derivation outputs count")?;
        for (name, output) in &self.outputs {
            name.serialize(writer, codec)
                .await
                .io_context("write derivation output name")?;
            output
                .path
                .serialize(writer, codec)
                .await
                .io_context("write derivation output path")?;
            output
                .hash_algorithm
                .serialize(writer, codec)
                .await
                .io_context("write derivation output hashAlgorithm")?;
            output
                .hash
                .serialize(writer, codec)
                .await
                .io_context("write derivation output hash")?;
        }

        self.inputs
            .serialize(writer, codec)
            .await
            .io_context("write derivation inputs")?;
        self.platform
            .serialize(writer, codec)
            .await
            .io_context("write derivation platform")?;
        self.builder
            .serialize(writer, codec)
            .await
            .io_context("write derivation builder")?;
        self.args
            .serialize(writer, codec)
            .await
            .io_context("write derivation args")?;
        self.env
            .serialize(writer, codec)
            .await
            .io_context("write derivation env")
    }
}

impl Deserialize for BuildResult {
    async fn deserialize<R: AsyncRead + Unpin>(
        reader: &mut R,
        codec: Codec,
    ) -> Result<Self, ProtocolError> {
        let status = u64::deserialize(reader, codec)
            .await
            .io_context("read build result status")?;
        let status = BuildStatus::try_from(status)?;
        let error_msg = String::deserialize(reader, codec)
            .await
            .io_context("read build result errorMsg")?;
        let times_built = u64::deserialize(reader, codec)
            .await
            .io_context("read build result timesBuilt")?;
        let is_non_deterministic = bool::deserialize(reader, codec)
            .await
            .io_context("read build result isNonDeterministic")?;
        let start_time = u64::deserialize(reader, codec)
            .await
            .io_context("read build result startTime")?;
        let stop_time = u64::deserialize(reader, codec)
            .await
            .io_context("read build result stopTime")?;

        // Built outputs arrive as (name, realisation JSON) pairs. The JSON
        // blob is kept opaque.
        let built_outputs = BTreeMap::<String, String>::deserialize(reader, codec)
            .await
            .io_context("read build result builtOutputs")?;

        Ok(BuildResult {
            status,
            error_msg,
            times_built,
            is_non_deterministic,
            start_time,
            stop_time,
            built_outputs,
        })
    }
}

impl Deserialize for KeyedBuildResult {
    async fn deserialize<R: AsyncRead + Unpin>(
        reader: &mut R,
        codec: Codec,
    ) -> Result<Self, ProtocolError> {
        let path = String::deserialize(reader, codec)
            .await
            .io_context("read keyed build result path")?;
        let result = BuildResult::deserialize(reader, codec).await?;
        Ok(KeyedBuildResult { path, result })
    }
}

impl Deserialize for Vec<KeyedBuildResult> {
    async fn deserialize<R: AsyncRead + Unpin>(
        reader: &mut R,
        codec: Codec,
    ) -> Result<Self, ProtocolError> {
        let count = u64::deserialize(reader, codec)
            .await
            .io_context("read build results count")?;

        let mut results = Vec::new();
        for _ in 0..count {
            results.push(KeyedBuildResult::deserialize(reader, codec).await?);
        }
        Ok(results)
    }
}

impl Deserialize for MissingInfo {
    async fn deserialize<R: AsyncRead + Unpin>(
        reader: &mut R,
        codec: Codec,
    ) -> Result<Self, ProtocolError> {
        let will_build = Vec::<String>::deserialize(reader, codec)
            .await
            .io_context("read missing willBuild")?;
        let will_substitute = Vec::<String>::deserialize(reader, codec)
            .await
            .io_context("read missing willSubstitute")?;
        let unknown = Vec::<String>::deserialize(reader, codec)
            .await
            .io_context("read missing unknown")?;
        let download_size = u64::deserialize(reader, codec)
            .await
            .io_context("read missing downloadSize")?;
        let nar_size = u64::deserialize(reader, codec)
            .await
            .io_context("read missing narSize")?;

        Ok(MissingInfo {
            will_build,
            will_substitute,
            unknown,
            download_size,
            nar_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::DerivationOutput;
    use std::io::Cursor;

    fn codec() -> Codec {
        Codec::default()
    }

    fn sample_path_info() -> PathInfo {
        PathInfo {
            deriver: Some("/nix/store/abc-test.drv".to_string()),
            nar_hash: "sha256:1234567890abcdef".to_string(),
            references: vec![
                "/nix/store/ref1".to_string(),
                "/nix/store/ref2".to_string(),
            ],
            registration_time: 1700000000,
            nar_size: 9876,
            ultimate: true,
            sigs: vec!["cache.nixos.org-1:sig".to_string()],
            content_address: None,
        }
    }

    #[tokio::test]
    async fn path_info_roundtrip() {
        let info = sample_path_info();
        let mut buf = Vec::new();
        info.serialize(&mut buf, codec()).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let back = PathInfo::deserialize(&mut cursor, codec()).await.unwrap();
        assert_eq!(back, info);
    }

    #[tokio::test]
    async fn path_info_empty_deriver_is_none() {
        let info = PathInfo {
            deriver: None,
            ..sample_path_info()
        };
        let mut buf = Vec::new();
        info.serialize(&mut buf, codec()).await.unwrap();
        // The wire carries an empty string for the deriver.
        assert_eq!(&buf[..8], &0u64.to_le_bytes());
        let mut cursor = Cursor::new(buf);
        let back = PathInfo::deserialize(&mut cursor, codec()).await.unwrap();
        assert_eq!(back.deriver, None);
    }

    #[tokio::test]
    async fn derivation_outputs_and_env_sorted_on_wire() {
        let drv = BasicDerivation {
            outputs: [
                (
                    "out".to_string(),
                    DerivationOutput {
                        path: "/nix/store/o".to_string(),
                        ..Default::default()
                    },
                ),
                (
                    "dev".to_string(),
                    DerivationOutput {
                        path: "/nix/store/d".to_string(),
                        ..Default::default()
                    },
                ),
            ]
            .into(),
            inputs: vec!["/nix/store/in".to_string()],
            platform: "x86_64-linux".to_string(),
            builder: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "true".to_string()],
            env: [
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "1".to_string()),
            ]
            .into(),
        };

        let mut buf = Vec::new();
        drv.serialize(&mut buf, codec()).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let count = u64::deserialize(&mut cursor, codec()).await.unwrap();
        assert_eq!(count, 2);
        // "dev" sorts before "out".
        let first = String::deserialize(&mut cursor, codec()).await.unwrap();
        assert_eq!(first, "dev");
    }

    #[tokio::test]
    async fn build_result_decodes_realisations_opaquely() {
        let mut buf = Vec::new();
        0u64.serialize(&mut buf, codec()).await.unwrap(); // Built
        "".serialize(&mut buf, codec()).await.unwrap();
        1u64.serialize(&mut buf, codec()).await.unwrap();
        false.serialize(&mut buf, codec()).await.unwrap();
        100u64.serialize(&mut buf, codec()).await.unwrap();
        200u64.serialize(&mut buf, codec()).await.unwrap();
        1u64.serialize(&mut buf, codec()).await.unwrap();
        "out".serialize(&mut buf, codec()).await.unwrap();
        r#"{"id":"drv!out"}"#.serialize(&mut buf, codec()).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let result = BuildResult::deserialize(&mut cursor, codec()).await.unwrap();
        assert_eq!(result.status, BuildStatus::Built);
        assert_eq!(result.times_built, 1);
        assert_eq!(
            result.built_outputs.get("out").map(String::as_str),
            Some(r#"{"id":"drv!out"}"#)
        );
    }

    #[tokio::test]
    async fn unknown_build_status_rejected() {
        let mut buf = Vec::new();
        99u64.serialize(&mut buf, codec()).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let err = BuildResult::deserialize(&mut cursor, codec())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnknownEnumValue {
                what: "build status",
                value: 99,
            }
        ));
    }
}
