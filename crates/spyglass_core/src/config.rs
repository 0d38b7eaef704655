//! Engine configuration.

use crate::segment::Compression;

/// Configuration of the index side: partitions, cache, and scheduling.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Events per partition before the active partition seals.
    pub max_partition_size: u64,
    /// Number of open partitions the scheduler keeps cached.
    pub in_memory_partitions: usize,
    /// Partitions scheduled immediately after a lookup; the rest wait
    /// for `continue_query`.
    pub taste_partitions: usize,
    /// Query worker threads.
    pub num_workers: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_partition_size: 1 << 20,
            in_memory_partitions: 10,
            taste_partitions: 5,
            num_workers: 4,
        }
    }
}

/// Configuration of the archive side: segments and their cache.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Compressed bytes per segment before rotation.
    pub max_segment_bytes: u64,
    /// Events per chunk.
    pub max_events_per_chunk: u32,
    /// Decompressed segments the archive keeps cached.
    pub segment_cache_capacity: usize,
    /// Chunk compression method.
    pub compression: Compression,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_segment_bytes: 128 << 20,
            max_events_per_chunk: 4096,
            segment_cache_capacity: 10,
            compression: Compression::Lz4,
        }
    }
}
