//! CUBE File common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all CUBE File components.

pub mod alloc;
pub mod config;
pub mod error;
pub mod ids;

pub use alloc::{reserve_with_backoff, MIN_RESERVATION};
pub use config::{
    ClusteringAlgorithm, ConstructionConfig, LargeChunkResolution, RootDirectoryStrategyKind,
    TraversalOrderKind,
};
pub use error::{CubeError, ErrorCategory, Result, ResultExt};
pub use ids::{BucketId, FileId, RecordId, DEFAULT_BUCKET_SIZE, MAX_SUBTREES_PER_BUCKET};
