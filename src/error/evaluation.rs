// Override expression errors and constants

use thiserror::Error;

use crate::error::ErrorCode;

/// Evaluation error code constants
///
/// Error code range: 3001-3007
pub struct EvaluationErrorCodes {}

impl EvaluationErrorCodes {
    /// Expression is not well formed
    pub const SYNTAX: i32 = 3001;

    /// Expression names something outside the service identifier table
    pub const UNKNOWN_SYMBOL: i32 = 3002;

    /// Result type does not fit the target attribute
    pub const TYPE_MISMATCH: i32 = 3003;

    /// Result is of the right type but outside the accepted range
    pub const OUT_OF_RANGE: i32 = 3004;

    /// Operator applied to operands it does not support
    pub const INVALID_OPERANDS: i32 = 3005;

    /// Expression nests deeper than the evaluator allows
    pub const TOO_DEEP: i32 = 3006;

    /// Expression has more tokens than the evaluator accepts
    pub const TOO_LONG: i32 = 3007;
}

/// Failures while parsing, evaluating or coercing an override expression.
///
/// All of them are fatal at startup: the launcher aborts before any backend
/// or transport exists.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("syntax error at offset {position}: {reason}")]
    Syntax { position: usize, reason: String },

    #[error("unknown symbol '{name}' (only service identifier names are allowed)")]
    UnknownSymbol { name: String },

    #[error("expected {expected}, got {found}")]
    TypeMismatch { expected: &'static str, found: String },

    #[error("value {value} out of range (expected {expected})")]
    OutOfRange { value: String, expected: &'static str },

    #[error("operator '{op}' cannot be applied to {operands}")]
    InvalidOperands { op: &'static str, operands: String },

    #[error("expression nests deeper than {limit} levels")]
    TooDeep { limit: usize },

    #[error("expression is longer than {limit} tokens")]
    TooLong { limit: usize },
}

impl ErrorCode for EvaluationError {
    fn code(&self) -> i32 {
        match self {
            EvaluationError::Syntax { .. } => EvaluationErrorCodes::SYNTAX,
            EvaluationError::UnknownSymbol { .. } => EvaluationErrorCodes::UNKNOWN_SYMBOL,
            EvaluationError::TypeMismatch { .. } => EvaluationErrorCodes::TYPE_MISMATCH,
            EvaluationError::OutOfRange { .. } => EvaluationErrorCodes::OUT_OF_RANGE,
            EvaluationError::InvalidOperands { .. } => EvaluationErrorCodes::INVALID_OPERANDS,
            EvaluationError::TooDeep { .. } => EvaluationErrorCodes::TOO_DEEP,
            EvaluationError::TooLong { .. } => EvaluationErrorCodes::TOO_LONG,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let errors = [
            EvaluationError::Syntax {
                position: 0,
                reason: "x".into(),
            },
            EvaluationError::UnknownSymbol { name: "os".into() },
            EvaluationError::TypeMismatch {
                expected: "a probability",
                found: "a list".into(),
            },
            EvaluationError::OutOfRange {
                value: "2".into(),
                expected: "0.0..=1.0",
            },
            EvaluationError::InvalidOperands {
                op: "<",
                operands: "list and bool".into(),
            },
            EvaluationError::TooDeep { limit: 64 },
            EvaluationError::TooLong { limit: 4096 },
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        codes.dedup();
        assert_eq!(codes, vec![3001, 3002, 3003, 3004, 3005, 3006, 3007]);
    }

    #[test]
    fn unknown_symbol_message_names_the_symbol() {
        let err = EvaluationError::UnknownSymbol { name: "os".into() };
        assert!(err.message().contains("'os'"));
    }
}
