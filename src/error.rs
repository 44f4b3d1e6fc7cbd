use thiserror::Error;
use std::path::PathBuf;

use crate::model::{OperandType, OperationType};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Model parsing error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Failed to load model from {0}: {1}")]
    ModelLoadError(PathBuf, String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Operand {index} has unsupported type {operand_type:?}")]
    UnsupportedOperandType { index: usize, operand_type: OperandType },

    #[error("Operand {index} references pool {pool_index}, but only {pool_count} pools are mapped")]
    InvalidPoolIndex { index: usize, pool_index: u32, pool_count: usize },

    #[error("Operand {index} has unknown lifetime code {lifetime}")]
    UnknownLifetime { index: usize, lifetime: i32 },

    #[error("Operand {index}: {length} bytes is not a valid size for elements of {element_size} bytes")]
    SizeMismatch { index: usize, length: usize, element_size: usize },

    #[error("Invalid data location: {0}")]
    InvalidLocation(String),

    #[error("No translator for operation type {0:?}")]
    UnsupportedOperator(OperationType),

    #[error("Operand {0} was consumed before any operation produced it")]
    UnresolvedOperand(usize),

    #[error("Model output operand {0} was never produced by the graph")]
    DisconnectedGraph(usize),

    #[error("Operation {operation:?} failed validation: {reason}")]
    OperatorValidationFailed { operation: OperationType, reason: String },

    #[error("Operand {0} was already registered in the graph")]
    OperandRedefined(usize),

    #[error("Shape inference failed for node {node}: {reason}")]
    ShapeInference { node: String, reason: String },

    #[error("Request binding error: {0}")]
    BindingMismatch(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Shorthand for a translator validation failure
    pub fn validation(operation: OperationType, reason: impl Into<String>) -> Self {
        Error::OperatorValidationFailed {
            operation,
            reason: reason.into(),
        }
    }
}
