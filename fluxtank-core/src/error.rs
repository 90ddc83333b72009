//! Error types for FluxTank

use thiserror::Error;

/// Result type alias for FluxTank operations
pub type Result<T> = std::result::Result<T, FluxError>;

/// FluxTank error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FluxError {
    /// The caller broke the encoder contract, e.g. a push after finish or a
    /// timestamp that is not increasing
    #[error("Encoding contract violation: {0}")]
    EncodingContractViolation(String),

    /// Malformed or truncated chunk payload
    #[error("Decode corruption: {0}")]
    DecodeCorruption(String),

    /// Aggregator input maps to a bucket that is already closed
    #[error("Ordering violation: ts {ts} maps to boundary {boundary}, current is {current}")]
    OrderingViolation { ts: u32, boundary: u32, current: u32 },

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FluxError {
    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            FluxError::DecodeCorruption(_)
                | FluxError::ChecksumMismatch { .. }
                | FluxError::InvalidFormat(_)
        )
    }

    /// Check if error was caused by the caller breaking an ordering or encoding contract
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            FluxError::EncodingContractViolation(_) | FluxError::OrderingViolation { .. }
        )
    }
}
