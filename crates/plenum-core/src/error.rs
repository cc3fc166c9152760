use std::fmt;

/// Machine-readable error codes surfaced by the checker CLI and migration runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    ModelRegistryInvalid,
    SnapshotMalformed,
    SnapshotInconsistent,
    MigrationIndexMismatch,
    MigrationChainBroken,
    MigrationStepFailed,
    MigrationVerificationFailed,
    EventReplayFailed,
    EventLogUnreadable,
    EventLogWriteFailed,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::ModelRegistryInvalid => "E1002",
            Self::SnapshotMalformed => "E2001",
            Self::SnapshotInconsistent => "E2002",
            Self::MigrationIndexMismatch => "E2003",
            Self::MigrationChainBroken => "E3001",
            Self::MigrationStepFailed => "E3002",
            Self::MigrationVerificationFailed => "E3003",
            Self::EventReplayFailed => "E3004",
            Self::EventLogUnreadable => "E5001",
            Self::EventLogWriteFailed => "E5002",
            Self::LockContention => "E5003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::ModelRegistryInvalid => "Model registry declaration is invalid",
            Self::SnapshotMalformed => "Snapshot does not match the dataset shape",
            Self::SnapshotInconsistent => "Snapshot is not consistent with the models",
            Self::MigrationIndexMismatch => "Migration index does not match the backend",
            Self::MigrationChainBroken => "Migration steps do not form a gapless chain",
            Self::MigrationStepFailed => "Migration step failed",
            Self::MigrationVerificationFailed => "Migrated data failed the consistency check",
            Self::EventReplayFailed => "Event could not be replayed",
            Self::EventLogUnreadable => "Event log could not be read",
            Self::EventLogWriteFailed => "Event log write failed",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .plenum/config.toml and retry."),
            Self::ModelRegistryInvalid => {
                Some("Make both sides of every relation name each other in models.yml.")
            }
            Self::SnapshotMalformed => {
                Some("Collections must map decimal ids to objects carrying the same id.")
            }
            Self::SnapshotInconsistent => None,
            Self::MigrationIndexMismatch => {
                Some("Run `plenum migrate` on the source data before importing it.")
            }
            Self::MigrationChainBroken => {
                Some("Register migration steps with consecutive target indices.")
            }
            Self::MigrationStepFailed => {
                Some("The event log was left untouched; fix the offending event and retry.")
            }
            Self::MigrationVerificationFailed => {
                Some("The event log was left untouched; inspect the listed models.")
            }
            Self::EventReplayFailed => Some("The event log contains an impossible transition."),
            Self::EventLogUnreadable => Some("Check that the log file is valid JSON."),
            Self::EventLogWriteFailed => Some("Check disk space and write permissions."),
            Self::LockContention => {
                Some("Retry after the other `plenum` process releases its lock.")
            }
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
