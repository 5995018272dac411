//! Core error types for the merge pipeline.
//!
//! Only conditions that abort a whole page or volume are errors. Line-local
//! recoverable conditions (no candidate produced, candidate rejected by the
//! gate, ambiguous span classification) are recorded as reason codes on the
//! line's [`Decision`](crate::domain::Decision) instead.

use thiserror::Error;

/// Enum representing different stages of processing in the merge pipeline.
///
/// Used to identify which stage an error occurred in, providing context for
/// debugging and error handling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProcessingStage {
    /// Error occurred while harvesting re-OCR candidates.
    CandidateSource,
    /// Error occurred in the similarity/gain gate.
    Gate,
    /// Error occurred during span classification.
    SpanClassification,
    /// Error occurred during scope-gated normalization.
    Normalization,
    /// Error occurred while emitting audit rows.
    AuditEmission,
    /// Error occurred during corpus-wide variant aggregation.
    VariantAggregation,
    /// Generic processing error.
    Generic,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::CandidateSource => write!(f, "candidate source"),
            ProcessingStage::Gate => write!(f, "gate"),
            ProcessingStage::SpanClassification => write!(f, "span classification"),
            ProcessingStage::Normalization => write!(f, "normalization"),
            ProcessingStage::AuditEmission => write!(f, "audit emission"),
            ProcessingStage::VariantAggregation => write!(f, "variant aggregation"),
            ProcessingStage::Generic => write!(f, "processing"),
        }
    }
}

/// Errors that can occur in the two-pass merge pipeline.
#[derive(Error, Debug)]
pub enum MergeError {
    /// A required input file for a page or volume is missing.
    #[error("missing required input: {path}")]
    MissingInput {
        /// Path or identifier of the missing input.
        path: String,
    },

    /// Geometry input produced zero lines for a page expected to have text.
    #[error("malformed geometry: page {page} yielded no lines")]
    MalformedGeometry {
        /// The page number with no usable line geometry.
        page: u32,
    },

    /// Error indicating invalid input data.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// A message describing the invalid input.
        message: String,
    },

    /// Error indicating a configuration problem.
    #[error("configuration: {message}")]
    Config {
        /// A message describing the configuration error.
        message: String,
    },

    /// The approved-rewrite table contains conflicting entries for one source
    /// token. Conflicts are fatal: silently picking a winner would apply an
    /// unreviewed rewrite corpus-wide.
    #[error(
        "conflicting approved rewrites for '{from_token}': '{to_a}' vs '{to_b}'"
    )]
    RewriteConflict {
        /// The source token with conflicting targets.
        from_token: String,
        /// First approved target.
        to_a: String,
        /// Second, conflicting approved target.
        to_b: String,
    },

    /// Error occurred during processing.
    #[error("{stage} failed: {context}")]
    Processing {
        /// The stage of processing where the error occurred.
        stage: ProcessingStage,
        /// Additional context about the error.
        context: String,
        /// The underlying error that caused this error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),

    /// CSV serialization error while emitting audit tables.
    #[error("csv")]
    Csv(#[from] csv::Error),

    /// JSON (de)serialization error in the checkpoint store.
    #[error("checkpoint serialization")]
    Checkpoint(#[from] serde_json::Error),
}

/// Convenient result alias used throughout the crate.
pub type MergeResult<T> = Result<T, MergeError>;

impl MergeError {
    /// Creates a configuration error with enhanced context and details.
    pub fn config_detailed(context: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Config {
            message: format!("{}: {}", context.into(), details.into()),
        }
    }

    /// Creates a configuration error for invalid field values.
    pub fn invalid_field(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Config {
            message: format!(
                "invalid value for field '{}': expected {}, got {}",
                field.into(),
                expected.into(),
                actual.into()
            ),
        }
    }

    /// Wraps an error from a processing stage with context.
    pub fn processing(
        stage: ProcessingStage,
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            stage,
            context: context.into(),
            source: Box::new(source),
        }
    }
}
