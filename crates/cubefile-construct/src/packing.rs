//! Bucket packing.
//!
//! Packing walks the cost tree top-down. Every child subtree of a directory
//! is classified by its cost:
//!
//! - Case A: large enough to fill a bucket on its own, stored alone;
//! - Case B: below the bucket threshold, clustered with small siblings;
//! - Case C: too large for one bucket. A directory child joins the root
//!   directory and packing recurses into it; a data child is split by
//!   large-chunk resolution first.
//!
//! Directories that are not stored in a bucket form the root directory.
//! They are collected in a [`RootChunkVector`] in depth-first order and
//! addressed as `(root bucket id, slot)`.

use crate::chunk::{DataChunk, DirChunk, DirEntry};
use crate::cluster::ClusteringStrategy;
use crate::codec::{encode_data_chunk, encode_dir_chunk};
use crate::context::{ConstructionContext, PackingLimits};
use crate::cost::CostNode;
use crate::equigrid::LargeChunkResolver;
use crate::facts::FactFile;
use crate::traversal::{LaidOutChunk, TraversalOrder};
use cubefile_common::{BucketId, CubeError, FileId, Result, ResultExt};
use cubefile_storage::{DiskBucket, StorageManager};
use tracing::debug;

/// Placement class of a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackCase {
    /// Stored alone in its own bucket.
    StoreAlone,
    /// Clustered with small siblings.
    Cluster,
    /// Too large for one bucket.
    Split,
}

/// Classifies a subtree of `cost` bytes.
pub fn classify(cost: usize, limits: &PackingLimits) -> PackCase {
    if cost > limits.usable_body {
        PackCase::Split
    } else if cost < limits.threshold {
        PackCase::Cluster
    } else {
        PackCase::StoreAlone
    }
}

/// Directory chunks of the root directory, by slot.
#[derive(Debug, Default)]
pub struct RootChunkVector {
    slots: Vec<Option<DirChunk>>,
}

impl RootChunkVector {
    /// Creates an empty vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next slot.
    pub fn reserve(&mut self) -> usize {
        self.slots.push(None);
        self.slots.len() - 1
    }

    /// Fills a reserved slot.
    pub fn insert(&mut self, slot: usize, chunk: DirChunk) -> Result<()> {
        match self.slots.get_mut(slot) {
            Some(entry @ None) => {
                *entry = Some(chunk);
                Ok(())
            }
            Some(Some(existing)) => Err(CubeError::Internal(format!(
                "root slot {} already holds {}",
                slot, existing.header.id
            ))),
            None => Err(CubeError::Internal(format!("root slot {} was never reserved", slot))),
        }
    }

    /// Number of reserved slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no slot is reserved.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Chunk in `slot`, if filled.
    pub fn get(&self, slot: usize) -> Option<&DirChunk> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Returns the chunks in slot order. Every reserved slot must be filled.
    pub fn into_chunks(self) -> Result<Vec<DirChunk>> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(slot, chunk)| {
                chunk.ok_or_else(|| CubeError::Internal(format!("root slot {} left empty", slot)))
            })
            .collect()
    }
}

fn slot_number(slot: usize) -> Result<u16> {
    u16::try_from(slot).map_err(|_| {
        CubeError::Capacity(format!("chunk slot {} exceeds the addressable range", slot))
    })
}

/// Places a cost tree into buckets.
pub struct BucketPacker<'a> {
    ctx: &'a mut ConstructionContext,
    facts: &'a FactFile,
    storage: &'a mut dyn StorageManager,
    file_id: FileId,
    root_bucket_id: BucketId,
    clustering: Box<dyn ClusteringStrategy>,
    resolver: Box<dyn LargeChunkResolver>,
    traversal: Box<dyn TraversalOrder>,
}

impl<'a> BucketPacker<'a> {
    /// Creates a packer writing buckets of `file_id` through `storage`.
    /// `root_bucket_id` addresses the root directory.
    pub fn new(
        ctx: &'a mut ConstructionContext,
        facts: &'a FactFile,
        storage: &'a mut dyn StorageManager,
        file_id: FileId,
        root_bucket_id: BucketId,
    ) -> Self {
        let clustering = crate::cluster::clustering_strategy(ctx.config.clustering_algorithm);
        let resolver = crate::equigrid::large_chunk_resolver(ctx.config.large_chunk_resolution);
        let traversal = crate::traversal::traversal_order(ctx.config.traversal_order);
        Self {
            ctx,
            facts,
            storage,
            file_id,
            root_bucket_id,
            clustering,
            resolver,
            traversal,
        }
    }

    /// Stores the children of the directory `node` and places the directory
    /// itself into root slot `slot`. Returns the entry addressing it.
    pub fn pack(&mut self, mut node: CostNode, slot: usize, root: &mut RootChunkVector) -> Result<DirEntry> {
        if !node.header.is_directory() {
            return Err(CubeError::Internal(format!(
                "only directories are packed, {} is a data chunk",
                node.header.id
            )));
        }
        let children = node.take_children();
        if children.is_empty() {
            return Err(CubeError::Internal(format!("directory {} has no children", node.header.id)));
        }
        let id = node.header.id.clone();
        let mut dir = DirChunk::new(node.header);
        let mut small = Vec::new();

        for child in children {
            let cost = child.subtree_cost();
            match classify(cost, &self.ctx.limits) {
                PackCase::StoreAlone => {
                    let coords = child.coordinates()?;
                    debug!(chunk = %child.header.id, cost, "Storing subtree in its own bucket");
                    let entry = self
                        .store_subtrees(vec![child])?
                        .pop()
                        .ok_or_else(|| CubeError::Internal("bucket stored no subtree".to_string()))?;
                    dir.set_entry(&coords, entry)?;
                }
                PackCase::Cluster => {
                    debug!(
                        chunk = %child.header.id,
                        cost,
                        kind = %child.header.kind,
                        "Deferring small subtree to clustering"
                    );
                    small.push(child);
                }
                PackCase::Split => {
                    let coords = child.coordinates()?;
                    let child_slot = root.reserve();
                    let child_id = child.header.id.clone();
                    let packed = if child.header.is_data() {
                        self.resolve_large_data_chunk(child, child_slot, root)
                    } else {
                        debug!(
                            chunk = %child_id,
                            cost,
                            slot = child_slot,
                            "Moving large directory to root directory"
                        );
                        self.pack(child, child_slot, root)
                    };
                    let entry = packed.context(|| format!("packing large subtree {}", child_id))?;
                    dir.set_entry(&coords, entry)?;
                }
            }
        }

        if !small.is_empty() {
            let coords = small
                .iter()
                .map(CostNode::coordinates)
                .collect::<Result<Vec<_>>>()?;
            let entries = self
                .cluster(small)
                .context(|| format!("clustering children of {}", id))?;
            for (coords, entry) in coords.iter().zip(entries) {
                dir.set_entry(coords, entry)?;
            }
        }

        if dir.populated() != dir.header.real_num_cells {
            return Err(CubeError::Internal(format!(
                "directory {} has {} entries set, expected {}",
                id,
                dir.populated(),
                dir.header.real_num_cells
            )));
        }
        root.insert(slot, dir)?;
        Ok(DirEntry::new(self.root_bucket_id, slot_number(slot)?))
    }

    /// Splits the oversized data chunk `node` and packs the resulting
    /// artificial directory into root slot `slot`.
    pub fn resolve_large_data_chunk(
        &mut self,
        node: CostNode,
        slot: usize,
        root: &mut RootChunkVector,
    ) -> Result<DirEntry> {
        debug!(
            chunk = %node.header.id,
            size = node.header.size,
            resolver = self.resolver.name(),
            "Resolving large data chunk"
        );
        let subtree = self.resolver.resolve(node, &self.ctx.limits)?;
        self.ctx.stats.resolved_chunks += 1;
        self.ctx.stats.chunks += subtree.children.len();
        self.pack(subtree, slot, root)
    }

    /// Clusters small sibling subtrees into shared buckets. Returns one
    /// entry per subtree, in input order.
    pub fn cluster(&mut self, subtrees: Vec<CostNode>) -> Result<Vec<DirEntry>> {
        let costs: Vec<usize> = subtrees.iter().map(CostNode::subtree_cost).collect();
        let regions = self.clustering.cluster(&costs, &self.ctx.limits)?;

        let mut pending: Vec<Option<CostNode>> = subtrees.into_iter().map(Some).collect();
        let mut entries = vec![DirEntry::EMPTY; pending.len()];
        for region in regions {
            let members = region
                .members
                .iter()
                .map(|&i| {
                    pending
                        .get_mut(i)
                        .and_then(Option::take)
                        .ok_or_else(|| CubeError::Internal(format!("subtree {} clustered twice", i)))
                })
                .collect::<Result<Vec<_>>>()?;
            debug!(
                strategy = self.clustering.name(),
                subtrees = members.len(),
                cost = region.cost,
                "Writing clustered bucket"
            );
            let stored = self.store_subtrees(members)?;
            for (&i, entry) in region.members.iter().zip(stored) {
                entries[i] = entry;
            }
            self.ctx.stats.clustered_buckets += 1;
        }

        if pending.iter().any(Option::is_some) {
            return Err(CubeError::Internal("clustering left subtrees unplaced".to_string()));
        }
        Ok(entries)
    }

    /// Writes `subtrees` into one new bucket, each as a contiguous run of
    /// chunks in traversal order. Returns the entry of each subtree root.
    pub fn store_subtrees(&mut self, subtrees: Vec<CostNode>) -> Result<Vec<DirEntry>> {
        let bucket_id = self.storage.allocate_record_id(self.file_id)?;
        let mut bucket = DiskBucket::new(bucket_id, self.ctx.limits.body_size);
        let mut roots = Vec::with_capacity(subtrees.len());

        for subtree in subtrees {
            bucket.begin_subtree()?;
            let base = bucket.chunk_count() as usize;
            let layout = self.traversal.layout(&subtree);

            let mut children: Vec<Vec<usize>> = vec![Vec::new(); layout.len()];
            for (index, chunk) in layout.iter().enumerate() {
                if let Some(parent) = chunk.parent {
                    children[parent].push(index);
                }
            }

            for (index, chunk) in layout.iter().enumerate() {
                let bytes = self
                    .encode_in_bucket(chunk, &layout, &children[index], bucket_id, base)
                    .context(|| format!("storing chunk {} in {}", chunk.node.header.id, bucket_id))?;
                let slot = bucket.add_chunk(&bytes)?;
                if slot as usize != base + index {
                    return Err(CubeError::Internal(format!(
                        "chunk {} landed in slot {}, expected {}",
                        chunk.node.header.id,
                        slot,
                        base + index
                    )));
                }
            }
            roots.push(DirEntry::new(bucket_id, slot_number(base)?));
        }

        let (header, body) = bucket.to_record();
        self.storage
            .create_record(self.file_id, bucket_id, &header, body, self.ctx.config.bucket_size)?;
        self.ctx.stats.buckets_written += 1;
        debug!(
            bucket = %bucket_id,
            subtrees = roots.len(),
            chunks = bucket.chunk_count(),
            free = bucket.free_space(),
            "Wrote bucket"
        );
        Ok(roots)
    }

    fn encode_in_bucket(
        &self,
        chunk: &LaidOutChunk<'_>,
        layout: &[LaidOutChunk<'_>],
        children: &[usize],
        bucket_id: BucketId,
        base: usize,
    ) -> Result<Vec<u8>> {
        let header = &chunk.node.header;
        if header.is_data() {
            let data = DataChunk::load(header, self.facts)?;
            return encode_data_chunk(&data);
        }

        let mut dir = DirChunk::new(header.clone());
        for &child in children {
            let coords = layout[child].node.coordinates()?;
            dir.set_entry(&coords, DirEntry::new(bucket_id, slot_number(base + child)?))?;
        }
        if dir.populated() != header.real_num_cells {
            return Err(CubeError::Internal(format!(
                "directory {} has {} of {} children in its bucket",
                header.id,
                dir.populated(),
                header.real_num_cells
            )));
        }
        encode_dir_chunk(&dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_id::ChunkId;
    use crate::codec::{decode_chunk, ChunkView, DirChunkView};
    use crate::cost::build_cost_tree;
    use crate::header::ChunkHeader;
    use crate::schema::{CubeInfo, Dimension};
    use cubefile_common::ConstructionConfig;
    use cubefile_storage::MemoryStorage;

    const FILE: FileId = FileId(7);

    #[test]
    fn test_classify_cases() {
        let limits = PackingLimits::new(8000, 200, 32);
        let cases: Vec<_> = [500, 50, 9000, 500].iter().map(|&c| classify(c, &limits)).collect();
        assert_eq!(
            cases,
            vec![PackCase::StoreAlone, PackCase::Cluster, PackCase::Split, PackCase::StoreAlone]
        );
        assert_eq!(classify(200, &limits), PackCase::StoreAlone);
        assert_eq!(classify(8000, &limits), PackCase::StoreAlone);
        assert_eq!(classify(8001, &limits), PackCase::Split);
    }

    #[test]
    fn test_root_chunk_vector() {
        let cube = CubeInfo::new(
            "rv",
            vec![Dimension::balanced("a", &[1, 2])],
            vec!["m".to_string()],
        );
        let header = ChunkHeader::for_chunk(ChunkId::root(), &cube).unwrap();
        let mut root = RootChunkVector::new();
        let first = root.reserve();
        let second = root.reserve();
        assert_eq!((first, second), (0, 1));

        root.insert(second, DirChunk::new(header.clone())).unwrap();
        assert!(root.insert(second, DirChunk::new(header.clone())).is_err());
        assert!(root.insert(5, DirChunk::new(header.clone())).is_err());

        let mut unfinished = RootChunkVector::new();
        unfinished.reserve();
        assert!(unfinished.into_chunks().is_err());

        root.insert(first, DirChunk::new(header)).unwrap();
        assert_eq!(root.into_chunks().unwrap().len(), 2);
    }

    fn create_test_cube() -> CubeInfo {
        CubeInfo::new(
            "pack",
            vec![Dimension::balanced("a", &[1, 4, 3]), Dimension::balanced("b", &[1, 2, 2])],
            vec!["m".to_string()],
        )
    }

    fn create_test_facts(cube: &CubeInfo) -> FactFile {
        let mut text = String::from("VALUES_START\n");
        for a1 in 0..4 {
            for b1 in 0..2 {
                for a2 in a1 * 3..a1 * 3 + 3 {
                    for b2 in b1 * 2..b1 * 2 + 2 {
                        text.push_str(&format!("0|0.{}|{}.{}|{} {}\n", a1, b1, a2, b2, a2 * 10 + b2));
                    }
                }
            }
        }
        text.push_str("VALUES_END\n");
        FactFile::from_text(&text, cube)
    }

    #[test]
    fn test_pack_clusters_small_children() {
        let cube = create_test_cube();
        let facts = create_test_facts(&cube);
        let mut ctx = ConstructionContext::new("pack", ConstructionConfig::default()).unwrap();
        let root_header = ChunkHeader::for_chunk(ChunkId::root(), &cube).unwrap();
        let tree = build_cost_tree(root_header, &cube, &facts, &mut ctx).unwrap();

        let mut storage = MemoryStorage::new();
        storage.begin_txn().unwrap();
        let root_bucket = storage.allocate_record_id(FILE).unwrap();
        let mut root = RootChunkVector::new();
        let slot = root.reserve();
        let entry = {
            let mut packer = BucketPacker::new(&mut ctx, &facts, &mut storage, FILE, root_bucket);
            packer.pack(tree, slot, &mut root).unwrap()
        };
        storage.commit().unwrap();

        assert_eq!(entry, DirEntry::new(root_bucket, 0));
        assert_eq!(root.len(), 1);
        assert_eq!(ctx.stats.buckets_written, 1);
        assert_eq!(ctx.stats.clustered_buckets, 1);

        // The whole tree below the root fits one bucket as a single subtree.
        let root_dir = root.get(0).unwrap();
        let child = root_dir.entry_at(&[0, 0]).unwrap();
        let record = storage.read_record(FILE, child.bucket_id).unwrap();
        let bucket = DiskBucket::from_record(&record.header, record.body).unwrap();
        assert_eq!(bucket.chunk_count(), 1 + 8);
        assert_eq!(bucket.subtree_first_slots(), &[0]);

        let dir = DirChunkView::decode(bucket.chunk(child.chunk_slot).unwrap()).unwrap();
        for entry in dir.entries() {
            assert_eq!(entry.bucket_id, child.bucket_id);
            match decode_chunk(bucket.chunk(entry.chunk_slot).unwrap()).unwrap() {
                ChunkView::Data(data) => assert_eq!(data.num_entries(), 6),
                ChunkView::Directory(_) => panic!("expected data chunk"),
            }
        }
    }

    #[test]
    fn test_pack_rejects_data_chunk() {
        let cube = create_test_cube();
        let facts = create_test_facts(&cube);
        let mut ctx = ConstructionContext::new("pack", ConstructionConfig::default()).unwrap();
        let header = ChunkHeader::for_chunk("0|0.0|0".parse().unwrap(), &cube).unwrap();
        let node = CostNode::new(header, None, Vec::new());

        let mut storage = MemoryStorage::new();
        let mut root = RootChunkVector::new();
        let slot = root.reserve();
        let mut packer = BucketPacker::new(&mut ctx, &facts, &mut storage, FILE, BucketId(1));
        assert!(matches!(packer.pack(node, slot, &mut root), Err(CubeError::Internal(_))));
    }
}
