// Launch error types and constants

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::error;

use crate::backend::BackendKind;
use crate::error::{ErrorCode, EvaluationError};
use crate::transport::{PlatformCapability, TransportScheme};

/// Launch error code constants
///
/// Error code range: 2001-2010
pub struct LaunchErrorCodes {}

impl LaunchErrorCodes {
    /// Malformed command line input or target address
    pub const INVALID_ARGUMENT: i32 = 2001;

    /// Scheme cannot be served on the detected platform
    pub const UNSUPPORTED_SCHEME: i32 = 2002;

    /// Override names an attribute the chosen backend does not expose
    pub const UNKNOWN_ATTRIBUTE: i32 = 2003;

    /// Override expression failed to evaluate
    pub const EVALUATION_FAILED: i32 = 2004;

    /// Dataset file does not exist
    pub const DATASET_MISSING: i32 = 2005;

    /// Dataset file exists but cannot be used
    pub const DATASET_INVALID: i32 = 2006;

    /// Backend setup failed
    pub const SETUP_FAILED: i32 = 2007;

    /// Transport run loop failed
    pub const TRANSPORT_FAILED: i32 = 2008;

    /// Backend teardown failed
    pub const TEARDOWN_FAILED: i32 = 2009;

    /// Backend lock was poisoned by a panicking connection task
    pub const BACKEND_POISONED: i32 = 2010;
}

/// Coarse classification used for exit codes and log routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User input is wrong; nothing was acquired.
    Argument,
    /// An override expression is invalid; nothing was acquired.
    Evaluation,
    /// A resource the backend needs is missing or unusable.
    Configuration,
    /// Setup, run or teardown failed.
    Runtime,
}

impl ErrorCategory {
    /// Process exit status for this category.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorCategory::Argument => 2,
            ErrorCategory::Evaluation | ErrorCategory::Configuration | ErrorCategory::Runtime => 1,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Argument => "argument",
            ErrorCategory::Evaluation => "evaluation",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

/// Log a launch error with structured context
///
/// Emits a single `tracing` error event carrying the numeric code and the
/// category next to the human-readable message.
pub fn log_launch_error(err: &LaunchError, context: &str) {
    error!(
        code = err.code(),
        category = %err.category(),
        "launch error in {}: {}",
        context,
        err.message()
    );
}

/// Everything that can abort an invocation of the launcher.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error(
        "unsupported transport scheme '{scheme}' on this platform ({capability}); use any of [{}]",
        join_schemes(.supported)
    )]
    UnsupportedScheme {
        scheme: TransportScheme,
        capability: PlatformCapability,
        supported: Vec<TransportScheme>,
    },

    #[error("unknown attribute '{name}' for the {kind} backend")]
    UnknownAttribute { kind: BackendKind, name: String },

    #[error("cannot evaluate override for '{attribute}': {source}")]
    Evaluation {
        attribute: String,
        #[source]
        source: EvaluationError,
    },

    #[error("dataset {} does not exist", .path.display())]
    DatasetMissing { path: PathBuf },

    #[error("dataset {} is unusable: {reason}", .path.display())]
    DatasetInvalid { path: PathBuf, reason: String },

    #[error("backend setup failed: {reason}")]
    SetupFailed { reason: String },

    #[error("transport failed: {reason}")]
    TransportFailed { reason: String },

    #[error("backend teardown failed: {reason}")]
    TeardownFailed { reason: String },

    #[error("backend state poisoned by a panicking connection handler")]
    BackendPoisoned,
}

impl LaunchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LaunchError::InvalidArgument { .. }
            | LaunchError::UnsupportedScheme { .. }
            | LaunchError::UnknownAttribute { .. } => ErrorCategory::Argument,
            LaunchError::Evaluation { .. } => ErrorCategory::Evaluation,
            LaunchError::DatasetMissing { .. } | LaunchError::DatasetInvalid { .. } => {
                ErrorCategory::Configuration
            }
            LaunchError::SetupFailed { .. }
            | LaunchError::TransportFailed { .. }
            | LaunchError::TeardownFailed { .. }
            | LaunchError::BackendPoisoned => ErrorCategory::Runtime,
        }
    }

    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        LaunchError::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(err: impl fmt::Display) -> Self {
        LaunchError::TransportFailed {
            reason: err.to_string(),
        }
    }
}

impl ErrorCode for LaunchError {
    fn code(&self) -> i32 {
        match self {
            LaunchError::InvalidArgument { .. } => LaunchErrorCodes::INVALID_ARGUMENT,
            LaunchError::UnsupportedScheme { .. } => LaunchErrorCodes::UNSUPPORTED_SCHEME,
            LaunchError::UnknownAttribute { .. } => LaunchErrorCodes::UNKNOWN_ATTRIBUTE,
            LaunchError::Evaluation { .. } => LaunchErrorCodes::EVALUATION_FAILED,
            LaunchError::DatasetMissing { .. } => LaunchErrorCodes::DATASET_MISSING,
            LaunchError::DatasetInvalid { .. } => LaunchErrorCodes::DATASET_INVALID,
            LaunchError::SetupFailed { .. } => LaunchErrorCodes::SETUP_FAILED,
            LaunchError::TransportFailed { .. } => LaunchErrorCodes::TRANSPORT_FAILED,
            LaunchError::TeardownFailed { .. } => LaunchErrorCodes::TEARDOWN_FAILED,
            LaunchError::BackendPoisoned => LaunchErrorCodes::BACKEND_POISONED,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

fn join_schemes(schemes: &[TransportScheme]) -> String {
    schemes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_scheme_lists_alternatives() {
        let err = LaunchError::UnsupportedScheme {
            scheme: TransportScheme::IsoTp,
            capability: PlatformCapability::Limited,
            supported: vec![TransportScheme::Tcp],
        };
        assert_eq!(err.category(), ErrorCategory::Argument);
        assert_eq!(err.code(), LaunchErrorCodes::UNSUPPORTED_SCHEME);
        assert!(err.message().ends_with("use any of [tcp]"), "{}", err);
    }

    #[test]
    fn evaluation_error_keeps_source() {
        let err = LaunchError::Evaluation {
            attribute: "p_service".into(),
            source: EvaluationError::UnknownSymbol { name: "os".into() },
        };
        assert_eq!(err.category(), ErrorCategory::Evaluation);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("'os'"));
    }

    #[test]
    fn exit_codes_separate_usage_from_faults() {
        assert_eq!(ErrorCategory::Argument.exit_code(), 2);
        assert_eq!(ErrorCategory::Runtime.exit_code(), 1);
        assert_eq!(
            LaunchError::DatasetMissing {
                path: PathBuf::from("/nope")
            }
            .category(),
            ErrorCategory::Configuration
        );
    }
}
