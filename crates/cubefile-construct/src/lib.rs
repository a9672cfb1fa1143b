//! CUBE File construction.
//!
//! This crate provides:
//! - Chunk ids, cell coordinates and the cube schema
//! - Cost tree: per-chunk storage cost built from the fact file
//! - Bucket packing: subtrees stored alone, clustered or split
//! - Large data chunk resolution over an equal grid of synthetic members
//! - Chunk codec and the root directory record
//! - CubeFileBuilder: the transactional construction driver

pub mod bitmap;
pub mod builder;
pub mod cell_map;
pub mod chunk;
pub mod chunk_id;
pub mod cluster;
pub mod codec;
pub mod constants;
pub mod context;
pub mod coords;
pub mod cost;
pub mod equigrid;
pub mod facts;
pub mod header;
pub mod packing;
pub mod reader;
pub mod root_dir;
pub mod schema;
pub mod traversal;

pub use bitmap::Bitmap;
pub use builder::{ConstructionOutcome, CubeFileBuilder};
pub use cell_map::{CellMap, DuplicatePolicy};
pub use chunk::{DataChunk, DataEntry, DirChunk, DirEntry};
pub use chunk_id::{ChunkId, Domain, PSEUDO_ORDER_CODE};
pub use cluster::{clustering_strategy, ClusteringStrategy, Region, SimpleClustering};
pub use codec::{decode_chunk, encode_data_chunk, encode_dir_chunk, ChunkView, DataChunkView, DirChunkView};
pub use context::{ConstructionContext, ConstructionStats, PackingLimits};
pub use coords::{calc_cell_offset, cell_coordinates, total_cells, Coordinates, LevelRange};
pub use cost::{build_cost_tree, CostNode};
pub use equigrid::{large_chunk_resolver, EquiGridEquiChildren, EquiGridPlan, LargeChunkResolver};
pub use facts::{FactFile, FactLine};
pub use header::{ArtificialHierarchy, ChunkHeader, ChunkKind};
pub use packing::{classify, BucketPacker, PackCase, RootChunkVector};
pub use reader::{CubeFileReader, StoredCell};
pub use root_dir::{root_directory_strategy, RootDirectory, RootDirectoryStrategy, SingleBucketDepthFirst};
pub use schema::{CubeInfo, Dimension, Level, Member};
pub use traversal::{traversal_order, TraversalOrder};
