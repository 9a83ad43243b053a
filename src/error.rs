use thiserror::Error;

/// Main error type for Sifter
#[derive(Error, Debug)]
pub enum SifterError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Segmentation or marker oracle errors (network, malformed replies, timeouts)
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// Embedding API errors
    #[error("Embedding API error: {0}")]
    Embedding(String),

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Parse errors (frontmatter, oracle JSON)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Text produced by a segmentation or marking step does not reproduce its input
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Document rejected by validation (oversized paragraph, missing taxonomy)
    #[error("Document rejected ({kind}): {message}")]
    Rejected { kind: String, message: String },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A stored row changed between reading it and committing against it
    #[error("Concurrent change: {0}")]
    Conflict(String),
}

impl SifterError {
    pub fn rejected(kind: impl Into<String>, message: impl Into<String>) -> Self {
        SifterError::Rejected {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Convenient Result type using SifterError
pub type Result<T> = std::result::Result<T, SifterError>;
