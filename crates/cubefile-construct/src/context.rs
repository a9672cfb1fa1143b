//! State shared by one construction run.

use crate::constants::DIR_ENTRY_SIZE;
use cubefile_common::{ConstructionConfig, CubeError, Result, MAX_SUBTREES_PER_BUCKET};
use cubefile_storage::constants::CHUNK_SLOT_SIZE;
use cubefile_storage::BucketHeader;

/// Byte limits that drive subtree classification and clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackingLimits {
    /// Bucket body size (bucket size minus bucket header).
    pub body_size: usize,
    /// Part of the body that may be filled; the rest is reserved as extra
    /// space. Subtrees above this are split.
    pub usable_body: usize,
    /// Subtrees below this are clustered.
    pub threshold: usize,
    /// Largest total cost of one cluster.
    pub cluster_limit: usize,
    /// Largest number of subtrees in one bucket.
    pub max_subtrees: usize,
}

impl PackingLimits {
    /// Derives the limits from a validated config.
    pub fn from_config(config: &ConstructionConfig) -> Result<Self> {
        let body_size = config
            .bucket_size
            .checked_sub(BucketHeader::SIZE)
            .filter(|body| *body > 0)
            .ok_or_else(|| CubeError::InvalidParameter {
                name: "bucket_size".to_string(),
                value: config.bucket_size.to_string(),
            })?;
        let usable_body = (body_size as f64 * (1.0 - config.extra_space)).floor() as usize;
        let threshold = (usable_body as f64 * config.bucket_threshold).floor() as usize;
        Ok(Self {
            body_size,
            usable_body,
            threshold,
            cluster_limit: usable_body,
            max_subtrees: config.max_subtrees_per_bucket.min(MAX_SUBTREES_PER_BUCKET),
        })
    }

    /// Limits with no extra space.
    pub fn new(body_size: usize, threshold: usize, max_subtrees: usize) -> Self {
        Self {
            body_size,
            usable_body: body_size,
            threshold,
            cluster_limit: body_size,
            max_subtrees: max_subtrees.min(MAX_SUBTREES_PER_BUCKET),
        }
    }

    /// Returns true if a subtree of `cost` bytes cannot fit one bucket.
    pub fn is_oversized(&self, cost: usize) -> bool {
        cost > self.usable_body
    }

    /// Cost of a single chunk of `size` bytes.
    pub fn chunk_cost(size: usize) -> usize {
        size + CHUNK_SLOT_SIZE
    }

    /// Number of directory entries that fit one bucket next to
    /// `fixed_overhead` bytes of chunk header.
    pub fn max_dir_entries(&self, fixed_overhead: usize) -> usize {
        self.usable_body
            .saturating_sub(fixed_overhead + CHUNK_SLOT_SIZE)
            / DIR_ENTRY_SIZE
    }
}

/// Counters reported at the end of a construction run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstructionStats {
    /// Chunks in the cost tree, including synthetic ones.
    pub chunks: usize,
    pub data_chunks: usize,
    pub buckets_written: usize,
    /// Buckets written by clustering.
    pub clustered_buckets: usize,
    /// Large data chunks split by large-chunk resolution.
    pub resolved_chunks: usize,
    /// Chunks stored in the root directory.
    pub root_chunks: usize,
    pub root_directory_bytes: usize,
}

/// Config, limits and counters of one run, passed to every stage.
#[derive(Debug, Clone)]
pub struct ConstructionContext {
    pub cube_name: String,
    pub config: ConstructionConfig,
    pub limits: PackingLimits,
    pub stats: ConstructionStats,
}

impl ConstructionContext {
    /// Validates `config` and derives the packing limits.
    pub fn new(cube_name: &str, config: ConstructionConfig) -> Result<Self> {
        config.validate()?;
        let limits = PackingLimits::from_config(&config)?;
        Ok(Self {
            cube_name: cube_name.to_string(),
            config,
            limits,
            stats: ConstructionStats::default(),
        })
    }
}
