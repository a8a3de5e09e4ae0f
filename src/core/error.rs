/*!
# Unified Error Type

This module provides the unified error enum for all Aquifer operations, from
entry-point validation through scoring-expression parsing to the evaluation
CLI.
*/

use std::error::Error;
use std::fmt;

/// Unified error type for all Aquifer operations.
#[derive(Debug)]
pub enum AquiferError {
    /// Input array has the wrong rank, channel count, or spatial shape
    ShapeMismatch(String),

    /// Input value is outside its valid domain (thresholds, labels, options)
    InvalidInput(String),

    /// Scoring expression text could not be parsed
    ScoringParse(String),

    /// Scoring primitive or operator exists but is not supported here
    UnsupportedScoring(String),

    /// Internal invariant of the region graph or merge loop was violated
    InvariantViolation(String),

    /// I/O error (CLI only)
    IoError(String),

    /// Serialization/deserialization error
    SerializationError(String),
}

impl AquiferError {
    /// Creates a shape mismatch error.
    pub fn shape_mismatch(message: impl Into<String>) -> Self {
        AquiferError::ShapeMismatch(message.into())
    }

    /// Creates an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        AquiferError::InvalidInput(message.into())
    }

    /// Creates a scoring parse error.
    pub fn scoring_parse(message: impl Into<String>) -> Self {
        AquiferError::ScoringParse(message.into())
    }

    /// Creates an unsupported scoring error.
    pub fn unsupported_scoring(message: impl Into<String>) -> Self {
        AquiferError::UnsupportedScoring(message.into())
    }

    /// Creates an invariant violation error.
    pub fn invariant_violation(message: impl Into<String>) -> Self {
        AquiferError::InvariantViolation(message.into())
    }

    /// Creates an I/O error.
    pub fn io_error(message: impl Into<String>) -> Self {
        AquiferError::IoError(message.into())
    }
}

impl fmt::Display for AquiferError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AquiferError::ShapeMismatch(msg) => write!(f, "Shape mismatch: {}", msg),
            AquiferError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AquiferError::ScoringParse(msg) => write!(f, "Scoring parse error: {}", msg),
            AquiferError::UnsupportedScoring(msg) => write!(f, "Unsupported scoring: {}", msg),
            AquiferError::InvariantViolation(msg) => write!(f, "Invariant violation: {}", msg),
            AquiferError::IoError(msg) => write!(f, "I/O error: {}", msg),
            AquiferError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl Error for AquiferError {}

impl From<std::io::Error> for AquiferError {
    fn from(e: std::io::Error) -> Self {
        AquiferError::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for AquiferError {
    fn from(e: serde_json::Error) -> Self {
        AquiferError::SerializationError(e.to_string())
    }
}

/// Result type alias using [`AquiferError`].
pub type Result<T> = std::result::Result<T, AquiferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AquiferError::shape_mismatch("affinities must be (3, D, H, W)");
        assert_eq!(
            format!("{}", err),
            "Shape mismatch: affinities must be (3, D, H, W)"
        );

        let err = AquiferError::scoring_parse("unexpected token '>'");
        assert_eq!(format!("{}", err), "Scoring parse error: unexpected token '>'");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.tif");
        let err: AquiferError = io.into();
        assert!(matches!(err, AquiferError::IoError(_)));
    }
}
