// Error types for the virtual ECU launcher
//
// Launch errors are grouped into four categories (argument, evaluation,
// configuration, runtime). Each carries a stable numeric code so the binary
// and log consumers can classify failures without string matching.

mod evaluation;
mod launch;

pub use evaluation::{EvaluationError, EvaluationErrorCodes};
pub use launch::{log_launch_error, ErrorCategory, LaunchError, LaunchErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
