use crate::error::ProtocolError;

/// Message tags on the daemon's stderr channel.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    Last = 0x616c7473,
    Error = 0x63787470,
    Next = 0x6f6c6d67,
    Read = 0x64617461,
    Write = 0x64617416,
    StartActivity = 0x53545254,
    StopActivity = 0x53544f50,
    Result = 0x52534c54,
}

impl TryFrom<u64> for LogTag {
    type Error = ProtocolError;

    fn try_from(value: u64) -> Result<Self, ProtocolError> {
        match value {
            0x616c7473 => Ok(Self::Last),
            0x63787470 => Ok(Self::Error),
            0x6f6c6d67 => Ok(Self::Next),
            0x64617461 => Ok(Self::Read),
            0x64617416 => Ok(Self::Write),
            0x53545254 => Ok(Self::StartActivity),
            0x53544f50 => Ok(Self::StopActivity),
            0x52534c54 => Ok(Self::Result),
            other => Err(ProtocolError::UnknownLogTag(other)),
        }
    }
}

/// A log message delivered to the connection's log sink.
///
/// `Read`/`Write` byte counters are consumed by the dispatcher and never
/// delivered; `Last` and `Error` terminate the dispatch round instead of
/// being delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogMessage {
    /// A plain text log line.
    Next(String),
    /// The daemon started a new activity.
    StartActivity(Activity),
    /// The daemon finished the activity with the given id.
    StopActivity(u64),
    /// A progress or result event within a running activity.
    Result(ActivityResult),
}

/// A structured activity started by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub id: u64,
    pub level: Verbosity,
    pub kind: ActivityType,
    pub text: String,
    pub fields: Vec<LogField>,
    /// Id of the parent activity, or 0 if none.
    pub parent: u64,
}

/// A result event within a running activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityResult {
    pub id: u64,
    pub kind: ResultType,
    pub fields: Vec<LogField>,
}

/// A typed field in a structured log message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogField {
    Int(u64),
    String(String),
}

/// Logging verbosity level.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Error = 0,
    Warn = 1,
    Notice = 2,
    Info = 3,
    Talkative = 4,
    Chatty = 5,
    Debug = 6,
    Vomit = 7,
}

impl TryFrom<u64> for Verbosity {
    type Error = ProtocolError;

    fn try_from(value: u64) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Error),
            1 => Ok(Self::Warn),
            2 => Ok(Self::Notice),
            3 => Ok(Self::Info),
            4 => Ok(Self::Talkative),
            5 => Ok(Self::Chatty),
            6 => Ok(Self::Debug),
            7 => Ok(Self::Vomit),
            other => Err(ProtocolError::UnknownEnumValue {
                what: "verbosity",
                value: other,
            }),
        }
    }
}

/// Activity type in `StartActivity` messages.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    Unknown = 100,
    CopyPath = 101,
    FileTransfer = 102,
    Realise = 103,
    CopyPaths = 104,
    Builds = 105,
    Build = 106,
    OptimiseStore = 107,
    VerifyPaths = 108,
    Substitute = 109,
    QueryPathInfo = 110,
    PostBuildHook = 111,
    BuildWaiting = 112,
}

impl TryFrom<u64> for ActivityType {
    type Error = ProtocolError;

    fn try_from(value: u64) -> Result<Self, ProtocolError> {
        match value {
            100 => Ok(Self::Unknown),
            101 => Ok(Self::CopyPath),
            102 => Ok(Self::FileTransfer),
            103 => Ok(Self::Realise),
            104 => Ok(Self::CopyPaths),
            105 => Ok(Self::Builds),
            106 => Ok(Self::Build),
            107 => Ok(Self::OptimiseStore),
            108 => Ok(Self::VerifyPaths),
            109 => Ok(Self::Substitute),
            110 => Ok(Self::QueryPathInfo),
            111 => Ok(Self::PostBuildHook),
            112 => Ok(Self::BuildWaiting),
            other => Err(ProtocolError::UnknownEnumValue {
                what: "activity type",
                value: other,
            }),
        }
    }
}

/// Result type in `Result` messages.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    FileLinked = 100,
    BuildLogLine = 101,
    UntrustedPath = 102,
    CorruptedPath = 103,
    SetPhase = 104,
    Progress = 105,
    SetExpected = 106,
    PostBuildLogLine = 107,
    FetchStatus = 108,
}

impl TryFrom<u64> for ResultType {
    type Error = ProtocolError;

    fn try_from(value: u64) -> Result<Self, ProtocolError> {
        match value {
            100 => Ok(Self::FileLinked),
            101 => Ok(Self::BuildLogLine),
            102 => Ok(Self::UntrustedPath),
            103 => Ok(Self::CorruptedPath),
            104 => Ok(Self::SetPhase),
            105 => Ok(Self::Progress),
            106 => Ok(Self::SetExpected),
            107 => Ok(Self::PostBuildLogLine),
            108 => Ok(Self::FetchStatus),
            other => Err(ProtocolError::UnknownEnumValue {
                what: "result type",
                value: other,
            }),
        }
    }
}
