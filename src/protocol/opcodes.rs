use std::fmt;

/// A daemon worker operation code.
///
/// Operation codes that were already obsolete at protocol 1.37 are not
/// listed; the daemon rejects them.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    IsValidPath = 1,
    QueryReferrers = 6,
    AddToStore = 7,
    BuildPaths = 9,
    EnsurePath = 10,
    AddTempRoot = 11,
    AddIndirectRoot = 12,
    FindRoots = 14,
    SetOptions = 19,
    CollectGarbage = 20,
    QueryAllValidPaths = 23,
    QueryPathInfo = 26,
    QueryPathFromHashPart = 29,
    QueryValidPaths = 31,
    QuerySubstitutablePaths = 32,
    QueryValidDerivers = 33,
    OptimiseStore = 34,
    VerifyStore = 35,
    BuildDerivation = 36,
    AddSignatures = 37,
    NarFromPath = 38,
    AddToStoreNar = 39,
    QueryMissing = 40,
    QueryDerivationOutputMap = 41,
    RegisterDrvOutput = 42,
    QueryRealisation = 43,
    AddMultipleToStore = 44,
    AddBuildLog = 45,
    BuildPathsWithResults = 46,
    AddPermRoot = 47,
}

impl OpCode {
    /// The human-readable operation name, used in error labels.
    pub fn name(self) -> &'static str {
        match self {
            Self::IsValidPath => "IsValidPath",
            Self::QueryReferrers => "QueryReferrers",
            Self::AddToStore => "AddToStore",
            Self::BuildPaths => "BuildPaths",
            Self::EnsurePath => "EnsurePath",
            Self::AddTempRoot => "AddTempRoot",
            Self::AddIndirectRoot => "AddIndirectRoot",
            Self::FindRoots => "FindRoots",
            Self::SetOptions => "SetOptions",
            Self::CollectGarbage => "CollectGarbage",
            Self::QueryAllValidPaths => "QueryAllValidPaths",
            Self::QueryPathInfo => "QueryPathInfo",
            Self::QueryPathFromHashPart => "QueryPathFromHashPart",
            Self::QueryValidPaths => "QueryValidPaths",
            Self::QuerySubstitutablePaths => "QuerySubstitutablePaths",
            Self::QueryValidDerivers => "QueryValidDerivers",
            Self::OptimiseStore => "OptimiseStore",
            Self::VerifyStore => "VerifyStore",
            Self::BuildDerivation => "BuildDerivation",
            Self::AddSignatures => "AddSignatures",
            Self::NarFromPath => "NarFromPath",
            Self::AddToStoreNar => "AddToStoreNar",
            Self::QueryMissing => "QueryMissing",
            Self::QueryDerivationOutputMap => "QueryDerivationOutputMap",
            Self::RegisterDrvOutput => "RegisterDrvOutput",
            Self::QueryRealisation => "QueryRealisation",
            Self::AddMultipleToStore => "AddMultipleToStore",
            Self::AddBuildLog => "AddBuildLog",
            Self::BuildPathsWithResults => "BuildPathsWithResults",
            Self::AddPermRoot => "AddPermRoot",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values() {
        assert_eq!(OpCode::IsValidPath as u64, 1);
        assert_eq!(OpCode::QueryPathInfo as u64, 26);
        assert_eq!(OpCode::NarFromPath as u64, 38);
        assert_eq!(OpCode::AddPermRoot as u64, 47);
    }

    #[test]
    fn names() {
        assert_eq!(OpCode::CollectGarbage.to_string(), "CollectGarbage");
        assert_eq!(
            OpCode::BuildPathsWithResults.to_string(),
            "BuildPathsWithResults"
        );
    }
}
