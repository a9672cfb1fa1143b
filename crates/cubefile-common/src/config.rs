//! Construction configuration for CUBE File.
//!
//! The configuration selects one implementation for each pluggable
//! construction strategy and carries the numeric sizing parameters. It is
//! read from a plain `key = value` text file; a missing file yields the
//! defaults.

use crate::error::{CubeError, Result};
use crate::ids::{DEFAULT_BUCKET_SIZE, MAX_SUBTREES_PER_BUCKET};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Algorithm used to group small sibling subtrees into buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClusteringAlgorithm {
    /// Greedy row-major grouping.
    #[default]
    Simple,
    /// Locality around the current point in time. Not implemented.
    CurrentPointInTime,
}

/// Order in which the chunks of one subtree are laid out in a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TraversalOrderKind {
    #[default]
    DepthFirst,
    BreadthFirst,
}

/// Strategy for splitting a data chunk that does not fit in one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LargeChunkResolution {
    /// Equi-grid members per dimension, equi-children per member.
    #[default]
    EquiGridEquiChildren,
}

/// Strategy for persisting the memory-resident root directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RootDirectoryStrategyKind {
    /// All root directory chunks in one record, depth-first.
    #[default]
    SingleBucketDepthFirst,
    /// Breadth-first layout. Declared extension point, stores nothing.
    BreadthFirst,
}

impl FromStr for ClusteringAlgorithm {
    type Err = CubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "simple" => Ok(Self::Simple),
            "current_point_in_time" => Ok(Self::CurrentPointInTime),
            _ => Err(invalid("clustering_algorithm", s)),
        }
    }
}

impl FromStr for TraversalOrderKind {
    type Err = CubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "depth_first" => Ok(Self::DepthFirst),
            "breadth_first" => Ok(Self::BreadthFirst),
            _ => Err(invalid("traversal_order", s)),
        }
    }
}

impl FromStr for LargeChunkResolution {
    type Err = CubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "equi_grid_equi_children" => Ok(Self::EquiGridEquiChildren),
            _ => Err(invalid("large_chunk_resolution", s)),
        }
    }
}

impl FromStr for RootDirectoryStrategyKind {
    type Err = CubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "single_bucket_depth_first" => Ok(Self::SingleBucketDepthFirst),
            "breadth_first" => Ok(Self::BreadthFirst),
            _ => Err(invalid("root_directory_strategy", s)),
        }
    }
}

fn invalid(name: &str, value: &str) -> CubeError {
    CubeError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}

/// Construction parameters for one CUBE File build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructionConfig {
    /// Clustering algorithm for small subtrees.
    pub clustering_algorithm: ClusteringAlgorithm,
    /// Chunk layout order inside a bucket.
    pub traversal_order: TraversalOrderKind,
    /// Resolution strategy for oversized data chunks.
    pub large_chunk_resolution: LargeChunkResolution,
    /// Root directory persistence strategy.
    pub root_directory_strategy: RootDirectoryStrategyKind,
    /// Bytes available for keeping the root directory resident while querying.
    pub root_directory_memory_budget: usize,
    /// Fraction of every bucket body kept free for growth.
    pub extra_space: f64,
    /// Bucket size in bytes, header included.
    pub bucket_size: usize,
    /// Fraction of the usable body a subtree must reach to get its own bucket.
    pub bucket_threshold: f64,
    /// Maximum number of subtrees clustered into one bucket.
    pub max_subtrees_per_bucket: usize,
}

impl Default for ConstructionConfig {
    fn default() -> Self {
        Self {
            clustering_algorithm: ClusteringAlgorithm::default(),
            traversal_order: TraversalOrderKind::default(),
            large_chunk_resolution: LargeChunkResolution::default(),
            root_directory_strategy: RootDirectoryStrategyKind::default(),
            root_directory_memory_budget: 64 * 1024 * 1024, // 64 MB
            extra_space: 0.0,
            bucket_size: DEFAULT_BUCKET_SIZE,
            bucket_threshold: 0.5,
            max_subtrees_per_bucket: MAX_SUBTREES_PER_BUCKET,
        }
    }
}

impl ConstructionConfig {
    /// Loads the configuration file at `path`.
    ///
    /// A missing file is not an error: the defaults are returned.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    path = %path.display(),
                    "Construction config file not found, using defaults"
                );
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parses `key = value` lines. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = Self::default();

        for (index, raw) in text.lines().enumerate() {
            let line = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                CubeError::ConfigError(format!(
                    "line {}: expected 'key = value', got '{}'",
                    index + 1,
                    line
                ))
            })?;
            config.set(key.trim(), value.trim())?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets one parameter from its textual value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "clustering_algorithm" => self.clustering_algorithm = value.parse()?,
            "traversal_order" => self.traversal_order = value.parse()?,
            "large_chunk_resolution" => self.large_chunk_resolution = value.parse()?,
            "root_directory_strategy" => self.root_directory_strategy = value.parse()?,
            "root_directory_memory_budget" => {
                self.root_directory_memory_budget = parse_number(key, value)?
            }
            "extra_space" => self.extra_space = parse_number(key, value)?,
            "bucket_size" => self.bucket_size = parse_number(key, value)?,
            "bucket_threshold" => self.bucket_threshold = parse_number(key, value)?,
            "max_subtrees_per_bucket" => {
                self.max_subtrees_per_bucket = parse_number(key, value)?
            }
            _ => {
                return Err(CubeError::ConfigError(format!(
                    "unknown configuration key '{}'",
                    key
                )))
            }
        }
        Ok(())
    }

    /// Checks the numeric parameters for consistency.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.extra_space) {
            return Err(invalid("extra_space", &self.extra_space.to_string()));
        }
        if !(self.bucket_threshold > 0.0 && self.bucket_threshold <= 1.0) {
            return Err(invalid("bucket_threshold", &self.bucket_threshold.to_string()));
        }
        if self.bucket_size < 512 {
            return Err(invalid("bucket_size", &self.bucket_size.to_string()));
        }
        if self.max_subtrees_per_bucket == 0 {
            return Err(invalid(
                "max_subtrees_per_bucket",
                &self.max_subtrees_per_bucket.to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| invalid(key, value))
}
