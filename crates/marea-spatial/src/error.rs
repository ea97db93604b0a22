//! Spatial audio error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpatialError {
    #[error("Invalid HRTF: {0}")]
    InvalidHrtf(String),

    #[error("Unsupported channel layout: {0} channels")]
    UnsupportedLayout(usize),
}

pub type SpatialResult<T> = Result<T, SpatialError>;
