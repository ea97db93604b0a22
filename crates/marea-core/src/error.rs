//! Error types for Marea

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Invalid block size: {0} (must be a power of two <= 4096)")]
    InvalidBlockSize(usize),

    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(usize),

    #[error("Sample rate mismatch: effect at {effect} Hz, engine at {engine} Hz")]
    SampleRateMismatch { effect: u32, engine: u32 },

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;

/// Validate a block size (power of two, at most 4096)
pub fn validate_block_size(block_size: usize) -> CoreResult<usize> {
    if block_size == 0 || block_size > 4096 || !block_size.is_power_of_two() {
        return Err(CoreError::InvalidBlockSize(block_size));
    }
    Ok(block_size)
}
