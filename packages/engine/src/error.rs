//! Error types for the RegelRecht engine

use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Failed to load or parse a regulation file
    #[error("Failed to load regulation: {0}")]
    LoadError(String),

    /// YAML parsing error
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid reference format
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Regulation not found in the registry
    #[error("Regulation not found: {0}")]
    RegulationNotFound(String),

    /// Article not found within a regulation
    #[error("Article not found: {law_id} article {article}")]
    ArticleNotFound { law_id: String, article: String },

    /// Output not found within a regulation
    #[error("Output '{output}' not found in regulation '{law_id}'")]
    OutputNotFound { law_id: String, output: String },

    /// Division by zero in a DIVIDE operation
    #[error("Division by zero")]
    DivisionByZero,

    /// Type mismatch during operation evaluation
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Malformed operation expression (missing operands, empty values)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Invalid calculation date
    #[error("Invalid date format: {0}")]
    InvalidDate(String),

    /// Input source spec that cannot be dispatched
    #[error("Cannot resolve input '{0}': no valid source specification found")]
    MissingSource(String),

    /// Cross-regulation resolution exceeded the depth limit
    #[error(
        "Cross-regulation resolution depth exceeded {limit} levels; \
         possible circular reference involving {reference}"
    )]
    DepthExceeded { limit: usize, reference: String },

    /// Mandatory delegation without implementing regulation or defaults
    #[error(
        "No regulation found for mandatory delegation {law_id} article {article} \
         with criteria [{criteria}]. No legal basis for decision."
    )]
    NoLegalBasis {
        law_id: String,
        article: String,
        criteria: String,
    },

    /// Resolve dispatch found no implementing regulation at all
    #[error("No regulations found with legal basis {law_id} article {article}")]
    NoImplementingRegulation { law_id: String, article: String },

    /// Resolve dispatch probed every candidate without a match
    #[error(
        "No matching regulation found for {law_id} article {article} \
         with match criteria {criteria}"
    )]
    NoResolveMatch {
        law_id: String,
        article: String,
        criteria: String,
    },

    /// Resolve dispatch matched more than one candidate
    #[error(
        "Multiple regulations match for {law_id} article {article}: [{candidates}]. \
         Add more specific match criteria to ensure deterministic resolution."
    )]
    AmbiguousResolve {
        law_id: String,
        article: String,
        candidates: String,
    },
}

impl EngineError {
    /// Stable error-kind name used by the golden-fixture contract.
    ///
    /// These names match the recording side of the fixture corpus, so they
    /// must stay stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::DivisionByZero => "DivisionByZero",
            EngineError::RegulationNotFound(_) => "LawNotFound",
            EngineError::OutputNotFound { .. } => "OutputNotFound",
            EngineError::TypeMismatch { .. } => "TypeError",
            EngineError::YamlError(_) | EngineError::LoadError(_) => "LoadError",
            EngineError::JsonError(_) | EngineError::IoError(_) => "IoError",
            EngineError::InvalidDate(_) => "ValueError",
            EngineError::InvalidUri(_)
            | EngineError::ArticleNotFound { .. }
            | EngineError::InvalidOperation(_)
            | EngineError::MissingSource(_)
            | EngineError::DepthExceeded { .. }
            | EngineError::NoLegalBasis { .. }
            | EngineError::NoImplementingRegulation { .. }
            | EngineError::NoResolveMatch { .. }
            | EngineError::AmbiguousResolve { .. } => "ValueError",
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
