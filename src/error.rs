//! Engine error taxonomy
//!
//! Insufficient data is normally resolved by a documented safe default inside
//! each stage; the variants here cover the cases that must surface to the caller.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("Insufficient data: need {required} observations, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    #[error("Unknown regime label: {0:?}")]
    UnknownRegime(String),

    #[error("Series misaligned: {0}")]
    Misaligned(String),

    #[error("Timestamps must be strictly increasing (violation at position {0})")]
    UnorderedIndex(usize),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
