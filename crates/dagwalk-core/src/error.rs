use std::fmt;

/// Machine-readable error codes shared by every pipeline stage.
///
/// The numeric families follow the failure taxonomy: `E1xxx` malformed data,
/// `E2xxx` transport, `E3xxx` persistence, `E4xxx` cancellation and `E9xxx`
/// fatal startup conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    MalformedId,
    MalformedEvent,
    TransportFailure,
    SourceMissingData,
    PersistenceFailure,
    Interrupted,
    StoreUnavailable,
    ConfigParseError,
    WorkerStartFailed,
    InputUnreadable,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::MalformedId => "E1001",
            Self::MalformedEvent => "E1002",
            Self::TransportFailure => "E2001",
            Self::SourceMissingData => "E2002",
            Self::PersistenceFailure => "E3001",
            Self::Interrupted => "E4001",
            Self::StoreUnavailable => "E9001",
            Self::ConfigParseError => "E9002",
            Self::WorkerStartFailed => "E9003",
            Self::InputUnreadable => "E9004",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::MalformedId => "Malformed event id",
            Self::MalformedEvent => "Malformed event",
            Self::TransportFailure => "Event source transport failure",
            Self::SourceMissingData => "Event source returned no data",
            Self::PersistenceFailure => "Store write failed",
            Self::Interrupted => "Interrupted",
            Self::StoreUnavailable => "Store unavailable",
            Self::ConfigParseError => "Config file parse error",
            Self::WorkerStartFailed => "Pipeline worker failed to start",
            Self::InputUnreadable => "Input file unreadable",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::MalformedId => Some("Ids are `0x` + 64 hex digits or `epoch:seq:tail`."),
            Self::MalformedEvent | Self::SourceMissingData => None,
            Self::TransportFailure => Some("Check the source URL; the crawler retries automatically."),
            Self::PersistenceFailure => {
                Some("Use acknowledged delivery (`--ack`) to surface per-event write errors.")
            }
            Self::Interrupted => None,
            Self::StoreUnavailable => Some("Check the database path and its write permissions."),
            Self::ConfigParseError => Some("Fix syntax in the dagwalk config.toml and retry."),
            Self::WorkerStartFailed => Some("Retry once. If persistent, report a bug with logs."),
            Self::InputUnreadable => Some("Check the input path and its read permissions."),
        }
    }

    /// Returns `true` for conditions the pipeline retries on its own.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::TransportFailure)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Returned by any blocking operation that gave up because shutdown was
/// requested or the stage on the other side of a queue is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("interrupted")]
pub struct Interrupted;

impl Interrupted {
    #[must_use]
    pub const fn code(self) -> ErrorCode {
        ErrorCode::Interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    const ALL: [ErrorCode; 10] = [
        ErrorCode::MalformedId,
        ErrorCode::MalformedEvent,
        ErrorCode::TransportFailure,
        ErrorCode::SourceMissingData,
        ErrorCode::PersistenceFailure,
        ErrorCode::Interrupted,
        ErrorCode::StoreUnavailable,
        ErrorCode::ConfigParseError,
        ErrorCode::WorkerStartFailed,
        ErrorCode::InputUnreadable,
    ];

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ALL {
            let text = code.code();
            assert_eq!(text.len(), 5);
            assert!(text.starts_with('E'));
            assert!(text.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn only_transport_failures_are_transient() {
        let transient: Vec<_> = ALL.iter().filter(|c| c.is_transient()).collect();
        assert_eq!(transient, vec![&ErrorCode::TransportFailure]);
    }
}
