use crate::error::ProtocolError;
use std::collections::BTreeMap;
use std::fmt;

/// Trust level the daemon reports for this client during the handshake.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    Unknown = 0,
    Trusted = 1,
    NotTrusted = 2,
}

impl TryFrom<u64> for TrustLevel {
    type Error = ProtocolError;

    fn try_from(value: u64) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Trusted),
            2 => Ok(Self::NotTrusted),
            other => Err(ProtocolError::UnknownEnumValue {
                what: "trust level",
                value: other,
            }),
        }
    }
}

/// Controls how a build operation is performed.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    #[default]
    Normal = 0,
    Repair = 1,
    Check = 2,
}

/// The outcome of a build operation.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Built = 0,
    Substituted = 1,
    AlreadyValid = 2,
    PermanentFailure = 3,
    InputRejected = 4,
    OutputRejected = 5,
    TransientFailure = 6,
    CachedFailure = 7,
    TimedOut = 8,
    MiscFailure = 9,
    DependencyFailed = 10,
    LogLimitExceeded = 11,
    NotDeterministic = 12,
    ResolvesToAlreadyValid = 13,
    NoSubstituters = 14,
}

impl BuildStatus {
    /// Whether this status means the path is (now) valid in the store.
    pub fn success(self) -> bool {
        matches!(
            self,
            Self::Built | Self::Substituted | Self::AlreadyValid | Self::ResolvesToAlreadyValid
        )
    }
}

impl TryFrom<u64> for BuildStatus {
    type Error = ProtocolError;

    fn try_from(value: u64) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Built),
            1 => Ok(Self::Substituted),
            2 => Ok(Self::AlreadyValid),
            3 => Ok(Self::PermanentFailure),
            4 => Ok(Self::InputRejected),
            5 => Ok(Self::OutputRejected),
            6 => Ok(Self::TransientFailure),
            7 => Ok(Self::CachedFailure),
            8 => Ok(Self::TimedOut),
            9 => Ok(Self::MiscFailure),
            10 => Ok(Self::DependencyFailed),
            11 => Ok(Self::LogLimitExceeded),
            12 => Ok(Self::NotDeterministic),
            13 => Ok(Self::ResolvesToAlreadyValid),
            14 => Ok(Self::NoSubstituters),
            other => Err(ProtocolError::UnknownEnumValue {
                what: "build status",
                value: other,
            }),
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Built => "Built",
            Self::Substituted => "Substituted",
            Self::AlreadyValid => "AlreadyValid",
            Self::PermanentFailure => "PermanentFailure",
            Self::InputRejected => "InputRejected",
            Self::OutputRejected => "OutputRejected",
            Self::TransientFailure => "TransientFailure",
            Self::CachedFailure => "CachedFailure",
            Self::TimedOut => "TimedOut",
            Self::MiscFailure => "MiscFailure",
            Self::DependencyFailed => "DependencyFailed",
            Self::LogLimitExceeded => "LogLimitExceeded",
            Self::NotDeterministic => "NotDeterministic",
            Self::ResolvesToAlreadyValid => "ResolvesToAlreadyValid",
            Self::NoSubstituters => "NoSubstituters",
        })
    }
}

/// Garbage collection action.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GCAction {
    #[default]
    ReturnLive = 0,
    ReturnDead = 1,
    DeleteDead = 2,
    DeleteSpecific = 3,
}

/// Metadata for a store path, in the unkeyed wire form: the store path
/// itself is not part of the record and is carried separately by the
/// operations that need it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathInfo {
    /// Store path of the derivation that produced this path, if known.
    /// Transmitted as an empty string when absent.
    pub deriver: Option<String>,
    /// Hash of the NAR serialisation, e.g. `"sha256:1b8m…"`.
    pub nar_hash: String,
    /// Store paths this path references at runtime.
    pub references: Vec<String>,
    /// Unix timestamp of registration in the store.
    pub registration_time: u64,
    /// Size of the NAR serialisation in bytes.
    pub nar_size: u64,
    /// Whether this path was built locally (trusted content).
    pub ultimate: bool,
    /// Cryptographic signatures on this path.
    pub sigs: Vec<String>,
    /// Content address, if the path is content-addressed. Transmitted as an
    /// empty string when absent.
    pub content_address: Option<String>,
}

/// A derivation in the reduced wire form used by `BuildDerivation`: inputs
/// are plain store paths, not derivation references.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicDerivation {
    /// Outputs by name. The map order is the wire order (ascending by name).
    pub outputs: BTreeMap<String, DerivationOutput>,
    /// Input store paths.
    pub inputs: Vec<String>,
    /// Build platform, e.g. `"x86_64-linux"`.
    pub platform: String,
    /// Path of the builder executable.
    pub builder: String,
    /// Arguments passed to the builder.
    pub args: Vec<String>,
    /// Environment for the builder. The map order is the wire order.
    pub env: BTreeMap<String, String>,
}

/// One output of a [`BasicDerivation`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DerivationOutput {
    pub path: String,
    pub hash_algorithm: String,
    pub hash: String,
}

/// The result of a build operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub status: BuildStatus,
    pub error_msg: String,
    pub times_built: u64,
    pub is_non_deterministic: bool,
    /// Unix timestamps.
    pub start_time: u64,
    pub stop_time: u64,
    /// Output name to realisation record. The realisation arrives as a JSON
    /// blob and is preserved as an opaque string.
    pub built_outputs: BTreeMap<String, String>,
}

/// A [`BuildResult`] keyed by the derived path it belongs to, as returned by
/// `BuildPathsWithResults`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedBuildResult {
    pub path: String,
    pub result: BuildResult,
}

/// The result of a `QueryMissing` operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MissingInfo {
    pub will_build: Vec<String>,
    pub will_substitute: Vec<String>,
    pub unknown: Vec<String>,
    /// Total download size in bytes.
    pub download_size: u64,
    /// Total unpacked NAR size in bytes.
    pub nar_size: u64,
}

/// Parameters for a `CollectGarbage` operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GCOptions {
    pub action: GCAction,
    /// Specific paths to delete, for [`GCAction::DeleteSpecific`].
    pub paths_to_delete: Vec<String>,
    pub ignore_liveness: bool,
    /// Maximum number of bytes to free; 0 means unlimited.
    pub max_freed: u64,
}

/// The result of a `CollectGarbage` operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GCResult {
    /// The paths returned or deleted, depending on the action.
    pub paths: Vec<String>,
    pub bytes_freed: u64,
}

/// Client-side build settings sent to the daemon via `SetOptions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub keep_failed: bool,
    pub keep_going: bool,
    pub try_fallback: bool,
    pub verbosity: super::messages::Verbosity,
    pub max_build_jobs: u64,
    /// Maximum seconds a builder may be silent before being killed.
    pub max_silent_time: u64,
    pub build_verbosity: super::messages::Verbosity,
    /// CPU cores per build; 0 means all available.
    pub build_cores: u64,
    pub use_substitutes: bool,
    /// Additional daemon settings to override, by name.
    pub overrides: BTreeMap<String, String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            keep_failed: false,
            keep_going: false,
            try_fallback: false,
            verbosity: super::messages::Verbosity::Error,
            max_build_jobs: 1,
            max_silent_time: 0,
            build_verbosity: super::messages::Verbosity::Error,
            build_cores: 0,
            use_substitutes: true,
            overrides: BTreeMap::new(),
        }
    }
}

// Request structs for operations with more than one field. Serialization
// lives in serialization/store_requests.rs.

pub(crate) struct QueryValidPathsRequest<'a> {
    pub paths: &'a [String],
    pub substitute: bool,
}

pub(crate) struct BuildPathsRequest<'a> {
    pub paths: &'a [String],
    pub mode: BuildMode,
}

pub(crate) struct BuildDerivationRequest<'a> {
    pub drv_path: &'a str,
    pub derivation: &'a BasicDerivation,
    pub mode: BuildMode,
}

pub(crate) struct AddSignaturesRequest<'a> {
    pub path: &'a str,
    pub sigs: &'a [String],
}

pub(crate) struct AddPermRootRequest<'a> {
    pub store_path: &'a str,
    pub gc_root: &'a str,
}

pub(crate) struct VerifyStoreRequest {
    pub check_contents: bool,
    pub repair: bool,
}
