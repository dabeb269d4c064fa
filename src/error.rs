//! Error handling for sigstream
//!
//! Errors fall in two groups. Configuration faults are detected while a
//! pipeline is being set up and must abort construction. Runtime faults
//! (untrained model, failed load, I/O) are reported to the caller and leave
//! the component in a well-defined state.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sigstream operations
pub type Result<T> = std::result::Result<T, SigstreamError>;

/// Main error type for sigstream operations
#[derive(Error, Debug)]
pub enum SigstreamError {
    // Configuration faults
    #[error("Unsupported sample type in {component}: expected {expected}, found {found}")]
    UnsupportedType {
        component: String,
        expected: String,
        found: String,
    },

    #[error("Shape mismatch in {component}: {reason}")]
    ShapeMismatch { component: String, reason: String },

    #[error("Invalid parameter '{param}': got {value}, expected {expected}")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    #[error("Malformed descriptor {path}: {reason}")]
    DescriptorParse { path: PathBuf, reason: String },

    #[error("Malformed parameter file {path} (line {line}): {reason}")]
    ParameterFile {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Unknown model kind: {model}")]
    ModelNotFound { model: String },

    #[error("Cyclic model reference through '{name}'")]
    CyclicReference { name: String },

    #[error("Unknown model handle: {handle}")]
    UnknownHandle { handle: usize },

    // Runtime faults
    #[error("Model '{model}' is not trained")]
    NotTrained { model: String },

    #[error("Loading model '{model}' failed: {reason}")]
    LoadFailed { model: String, reason: String },

    #[error("Operation '{operation}' is not supported by {model}")]
    Unsupported { operation: String, model: String },

    #[error("File not found: {path}")]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("XML error: {0}")]
    Xml(String),

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SigstreamError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            SigstreamError::UnsupportedType { .. } => "UNSUPPORTED_TYPE",
            SigstreamError::ShapeMismatch { .. } => "SHAPE_MISMATCH",
            SigstreamError::InvalidParameter { .. } => "INVALID_PARAMETER",
            SigstreamError::DescriptorParse { .. } => "DESCRIPTOR_PARSE",
            SigstreamError::ParameterFile { .. } => "PARAMETER_FILE",
            SigstreamError::ModelNotFound { .. } => "MODEL_NOT_FOUND",
            SigstreamError::CyclicReference { .. } => "CYCLIC_REFERENCE",
            SigstreamError::UnknownHandle { .. } => "UNKNOWN_HANDLE",
            SigstreamError::NotTrained { .. } => "NOT_TRAINED",
            SigstreamError::LoadFailed { .. } => "LOAD_FAILED",
            SigstreamError::Unsupported { .. } => "UNSUPPORTED",
            SigstreamError::FileNotFound { .. } => "FILE_NOT_FOUND",
            SigstreamError::Xml(_) => "XML_ERROR",
            SigstreamError::Io(_) => "IO_ERROR",
            SigstreamError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is a configuration fault
    ///
    /// Configuration faults must abort pipeline construction; they are never
    /// retried.
    pub fn is_configuration_fault(&self) -> bool {
        matches!(
            self,
            SigstreamError::UnsupportedType { .. }
                | SigstreamError::ShapeMismatch { .. }
                | SigstreamError::InvalidParameter { .. }
                | SigstreamError::DescriptorParse { .. }
                | SigstreamError::ParameterFile { .. }
                | SigstreamError::ModelNotFound { .. }
                | SigstreamError::CyclicReference { .. }
                | SigstreamError::UnknownHandle { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            SigstreamError::UnsupportedType { .. } => vec![
                "Insert a converting operator upstream",
                "Check the element type declared by the provider",
            ],
            SigstreamError::ShapeMismatch { .. } => vec![
                "Check the dimension of the upstream stream",
                "Check the selection indices of the consumer",
            ],
            SigstreamError::DescriptorParse { .. } | SigstreamError::ParameterFile { .. } => vec![
                "Re-export the model from the training tool",
                "Check the file was not truncated",
            ],
            SigstreamError::ModelNotFound { .. } => vec![
                "Supported kinds: NaiveBayes, OnlineNaiveBayes, Svm",
            ],
            SigstreamError::NotTrained { .. } => vec![
                "Wait for the model load to complete",
                "Train the model before classifying",
            ],
            SigstreamError::LoadFailed { .. } => vec![
                "Check the parameter file path in the descriptor",
            ],
            _ => vec![],
        }
    }
}
