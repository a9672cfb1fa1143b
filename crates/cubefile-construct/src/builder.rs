//! CUBE File construction driver.
//!
//! One run builds the cost tree of a cube from its fact file, packs it into
//! buckets and stores the root directory, all inside a single storage
//! transaction. Any failure aborts the transaction so no partial file is
//! left behind.

use crate::chunk::DirEntry;
use crate::chunk_id::ChunkId;
use crate::context::{ConstructionContext, ConstructionStats};
use crate::cost::build_cost_tree;
use crate::facts::FactFile;
use crate::header::ChunkHeader;
use crate::packing::{BucketPacker, RootChunkVector};
use crate::root_dir::{root_directory_strategy, RootDirectoryWriter};
use crate::schema::CubeInfo;
use cubefile_common::{ConstructionConfig, FileId, Result, ResultExt};
use cubefile_storage::StorageManager;
use tracing::{info, info_span, warn};

/// Result of a successful construction.
#[derive(Debug, Clone)]
pub struct ConstructionOutcome {
    /// The cube with its file id, root bucket id and config filled in.
    pub cube: CubeInfo,
    pub stats: ConstructionStats,
    /// Entry addressing the root chunk.
    pub root_entry: DirEntry,
}

/// Builds CUBE Files with one construction config.
#[derive(Debug, Clone, Default)]
pub struct CubeFileBuilder {
    config: ConstructionConfig,
}

impl CubeFileBuilder {
    pub fn new(config: ConstructionConfig) -> Self {
        Self { config }
    }

    /// Builder using the config stored with `cube`.
    pub fn for_cube(cube: &CubeInfo) -> Self {
        Self::new(cube.config.clone())
    }

    pub fn config(&self) -> &ConstructionConfig {
        &self.config
    }

    /// Constructs the CUBE File of `cube` from `facts` as file `file_id`.
    pub fn construct(
        &self,
        cube: &CubeInfo,
        facts: &FactFile,
        storage: &mut dyn StorageManager,
        file_id: FileId,
    ) -> Result<ConstructionOutcome> {
        let span = info_span!("construct_cube", cube = %cube.name, file = %file_id);
        let _enter = span.enter();

        cube.validate()?;
        let mut ctx = ConstructionContext::new(&cube.name, self.config.clone())?;
        storage.begin_txn()?;

        let root_entry = match self.run(cube, facts, storage, file_id, &mut ctx) {
            Ok(entry) => entry,
            Err(e) => {
                if let Err(abort_error) = storage.abort() {
                    warn!(error = %abort_error, "Failed to abort construction transaction");
                }
                return Err(e);
            }
        };
        storage.commit()?;

        let stats = ctx.stats;
        info!(
            chunks = stats.chunks,
            data_chunks = stats.data_chunks,
            buckets = stats.buckets_written,
            clustered = stats.clustered_buckets,
            resolved = stats.resolved_chunks,
            root_chunks = stats.root_chunks,
            root_bytes = stats.root_directory_bytes,
            "Constructed CUBE File"
        );

        let mut built = cube.clone();
        built.config = self.config.clone();
        built.file_id = Some(file_id);
        built.root_bucket_id = Some(root_entry.bucket_id);
        Ok(ConstructionOutcome {
            cube: built,
            stats,
            root_entry,
        })
    }

    fn run(
        &self,
        cube: &CubeInfo,
        facts: &FactFile,
        storage: &mut dyn StorageManager,
        file_id: FileId,
        ctx: &mut ConstructionContext,
    ) -> Result<DirEntry> {
        let root_bucket_id = storage.allocate_record_id(file_id)?;
        let header = ChunkHeader::for_chunk(ChunkId::root(), cube)?;
        let tree = build_cost_tree(header, cube, facts, ctx).context(|| "building cost tree")?;
        info!(
            chunks = ctx.stats.chunks,
            cost = tree.subtree_cost(),
            "Built cost tree"
        );

        let mut root = RootChunkVector::new();
        let slot = root.reserve();
        let root_entry = {
            let mut packer = BucketPacker::new(ctx, facts, &mut *storage, file_id, root_bucket_id);
            packer.pack(tree, slot, &mut root).context(|| "packing buckets")?
        };

        let chunks = root.into_chunks()?;
        ctx.stats.root_chunks = chunks.len();
        let strategy = root_directory_strategy(ctx.config.root_directory_strategy);
        let mut writer = RootDirectoryWriter {
            storage,
            file_id,
            bucket_id: root_bucket_id,
        };
        ctx.stats.root_directory_bytes = strategy
            .store(&chunks, ctx.config.root_directory_memory_budget, &mut writer)
            .context(|| format!("storing root directory with {}", strategy.name()))?;
        Ok(root_entry)
    }
}
