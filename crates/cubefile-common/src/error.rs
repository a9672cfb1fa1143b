//! Error types for CUBE File construction.

use thiserror::Error;

/// Result type alias using CubeError.
pub type Result<T> = std::result::Result<T, CubeError>;

/// Broad classes of failure. Every class except `Resource` is fatal to the
/// construction attempt; `Resource` is only surfaced once the allocation
/// back-off has given up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed schema, chunk id or fact file.
    Input,
    /// A chunk cannot be placed even after large-chunk resolution.
    Capacity,
    /// Memory could not be reserved.
    Resource,
    /// A logic defect was detected.
    Internal,
    /// The storage manager failed.
    Storage,
    /// The construction configuration is invalid.
    Config,
}

/// Errors that can occur while building or reading a CUBE File.
#[derive(Debug, Error)]
pub enum CubeError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Schema / input errors
    #[error("Malformed chunk id '{id}': {reason}")]
    MalformedChunkId { id: String, reason: String },

    #[error("Member not found: dimension {dimension}, level {level}, order code {order_code}")]
    MemberNotFound {
        dimension: String,
        level: String,
        order_code: i32,
    },

    #[error("No fact line matches chunk prefix '{0}'")]
    PrefixNotFound(String),

    #[error("Duplicate entry for grain cell '{0}'")]
    DuplicateCell(String),

    #[error("Fact file error at line {line}: {reason}")]
    FactFile { line: usize, reason: String },

    #[error("Schema error: {0}")]
    Schema(String),

    // Capacity errors
    #[error("Capacity error: {0}")]
    Capacity(String),

    // Resource errors
    #[error("Allocation failed: requested {requested} bytes (minimum {minimum})")]
    AllocationFailed { requested: usize, minimum: usize },

    #[error("Root directory needs at least {required} bytes, memory budget is {budget}")]
    RootDirectoryTooLarge { required: usize, budget: usize },

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Record not found: {record_id} in file {file_id}")]
    RecordNotFound { file_id: u32, record_id: u32 },

    #[error("Record corrupted: {record_id}, reason: {reason}")]
    RecordCorrupted { record_id: u32, reason: String },

    #[error("Bucket full: need {needed} bytes, {available} available")]
    BucketFull { needed: usize, available: usize },

    #[error("No active transaction")]
    NoActiveTransaction,

    #[error("Transaction already active")]
    TransactionActive,

    // Codec errors
    #[error("Chunk decode error: {0}")]
    Decode(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<CubeError>,
    },
}

impl CubeError {
    /// Wraps this error with an outer frame of context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        CubeError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error of a context chain.
    pub fn root_cause(&self) -> &CubeError {
        let mut err = self;
        while let CubeError::Context { source, .. } = err {
            err = source;
        }
        err
    }

    /// Classifies the innermost error.
    pub fn category(&self) -> ErrorCategory {
        match self.root_cause() {
            CubeError::MalformedChunkId { .. }
            | CubeError::MemberNotFound { .. }
            | CubeError::PrefixNotFound(_)
            | CubeError::DuplicateCell(_)
            | CubeError::FactFile { .. }
            | CubeError::Schema(_) => ErrorCategory::Input,
            CubeError::Capacity(_) | CubeError::RootDirectoryTooLarge { .. } => {
                ErrorCategory::Capacity
            }
            CubeError::AllocationFailed { .. } => ErrorCategory::Resource,
            CubeError::Io(_)
            | CubeError::Storage(_)
            | CubeError::RecordNotFound { .. }
            | CubeError::RecordCorrupted { .. }
            | CubeError::BucketFull { .. }
            | CubeError::NoActiveTransaction
            | CubeError::TransactionActive
            | CubeError::Decode(_) => ErrorCategory::Storage,
            CubeError::ConfigError(_)
            | CubeError::InvalidParameter { .. }
            | CubeError::Unsupported(_) => ErrorCategory::Config,
            CubeError::Internal(_) => ErrorCategory::Internal,
            CubeError::Context { .. } => unreachable!("root_cause strips context frames"),
        }
    }
}

/// Adds context frames to results.
pub trait ResultExt<T> {
    /// Prefixes the error (if any) with the lazily built context message.
    fn context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
