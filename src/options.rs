use crate::bloom::BloomFilterSizing;
use crate::checksum::ChecksumType;

/// How column files are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IOBackend {
    /// `read_at` on a shared file handle. Falls back to
    /// [`IOBackend::NormalRead`] on platforms without positioned reads.
    #[default]
    PositionedRead,
    /// `seek` + `read` under a mutex.
    NormalRead,
}

/// Options for building the column and bloom files of one rowset.
#[derive(Clone)]
pub struct ColumnBuilderOptions {
    /// Target encoded size of one block, in bytes.
    pub target_block_size: usize,

    /// Checksum applied to every block and index region.
    pub checksum_type: ChecksumType,

    /// Sizing of the bloom filter built over encoded keys.
    pub bloom_sizing: BloomFilterSizing,
}

impl Default for ColumnBuilderOptions {
    fn default() -> Self {
        Self {
            target_block_size: 16 * 1024,
            checksum_type: ChecksumType::Crc32,
            bloom_sizing: BloomFilterSizing::default(),
        }
    }
}

impl ColumnBuilderOptions {
    pub fn default_for_test() -> Self {
        Self {
            target_block_size: 128,
            checksum_type: ChecksumType::Crc32,
            bloom_sizing: BloomFilterSizing::default(),
        }
    }
}
