// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

//! Split-block bloom filter over encoded keys.
//!
//! The filter follows the parquet SBBF layout: 256-bit blocks of eight
//! 32-bit words. A key is hashed once with XxHash64; the upper 32 bits of
//! the hash select the block and the lower 32 bits drive an eight-way
//! salted mask inside it. Probes carry the precomputed hash so a key is
//! never hashed twice.
//!
//! On disk the filter is the block array followed by a footer:
//!
//! ```plain
//! | block (32B) | ... | magic (4B) | nblocks (8B) | nkeys (8B) |
//!   checksum type (4B) | checksum (8B) |
//! ```

use std::hash::Hasher;
use std::path::Path;

use bytes::{Buf, BufMut};
use tokio::io::AsyncReadExt;
use twox_hash::XxHash64;

use crate::checksum::{build_checksum, verify_checksum, ChecksumType};
use crate::error::{StorageResult, TracedStorageError};

const BLOOM_FILE_MAGIC: u32 = 0x5349_4C42;
const BLOOM_FOOTER_SIZE: usize = 4 + 8 + 8 + 4 + 8;
const BLOOM_HASH_SEED: u64 = 0;

/// Salt as defined in the parquet spec.
const SALT: [u32; 8] = [
    0x47b6137b, 0x44974d91, 0x8824ad5b, 0xa2b7289d, 0x705495c7, 0x2df1424b, 0x9efc4947, 0x5c6bfb31,
];

/// Each block is 256 bits, eight contiguous 32-bit words.
#[derive(Debug, Copy, Clone)]
struct BloomBlock([u32; 8]);

impl BloomBlock {
    const ZERO: Self = Self([0; 8]);

    /// A block in which each word has exactly one bit set, derived from
    /// the lower hash bits.
    fn mask(x: u32) -> Self {
        let mut result = [0u32; 8];
        for i in 0..8 {
            let y = x.wrapping_mul(SALT[i]) >> 27;
            result[i] = 1 << y;
        }
        Self(result)
    }

    fn insert(&mut self, hash: u32) {
        let mask = Self::mask(hash);
        for i in 0..8 {
            self.0[i] |= mask.0[i];
        }
    }

    fn check(&self, hash: u32) -> bool {
        let mask = Self::mask(hash);
        for i in 0..8 {
            if self.0[i] & mask.0[i] == 0 {
                return false;
            }
        }
        true
    }
}

/// Hash an encoded key for bloom filter use.
pub fn bloom_hash(encoded_key: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(BLOOM_HASH_SEED);
    hasher.write(encoded_key);
    hasher.finish()
}

/// A precomputed bloom probe for one encoded key.
#[derive(Debug, Clone, Copy)]
pub struct BloomKeyProbe {
    pub hash: u64,
}

impl BloomKeyProbe {
    pub fn new(encoded_key: &[u8]) -> Self {
        Self {
            hash: bloom_hash(encoded_key),
        }
    }
}

/// Sizing of the bloom filter built at rowset write time. The false
/// positive rate over absent keys is bounded by `fpp` for the number of
/// keys actually inserted.
#[derive(Debug, Clone, Copy)]
pub struct BloomFilterSizing {
    pub fpp: f64,
}

impl Default for BloomFilterSizing {
    fn default() -> Self {
        Self { fpp: 0.01 }
    }
}

impl BloomFilterSizing {
    /// Number of 256-bit blocks for the expected key count.
    fn num_blocks(&self, ndv: usize) -> usize {
        // Standard bloom sizing, m = -n ln p / (ln 2)^2 bits.
        let ln2 = std::f64::consts::LN_2;
        let bits = -(ndv.max(1) as f64) * self.fpp.ln() / (ln2 * ln2);
        (bits / 256.0).ceil().max(1.0) as usize
    }
}

/// Builds the bloom file of one rowset.
pub struct BloomFilterBuilder {
    blocks: Vec<BloomBlock>,
    nkeys: u64,
    checksum_type: ChecksumType,
}

impl BloomFilterBuilder {
    pub fn new(sizing: BloomFilterSizing, expected_keys: usize, checksum_type: ChecksumType) -> Self {
        Self {
            blocks: vec![BloomBlock::ZERO; sizing.num_blocks(expected_keys)],
            nkeys: 0,
            checksum_type,
        }
    }

    pub fn append_key(&mut self, encoded_key: &[u8]) {
        self.append_hash(bloom_hash(encoded_key));
    }

    pub fn append_hash(&mut self, hash: u64) {
        let block_id = block_of_hash(hash, self.blocks.len());
        self.blocks[block_id].insert(hash as u32);
        self.nkeys += 1;
    }

    pub fn finish(self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.blocks.len() * 32 + BLOOM_FOOTER_SIZE);
        for block in &self.blocks {
            for word in block.0 {
                data.put_u32_le(word);
            }
        }
        let checksum = build_checksum(self.checksum_type, &data);
        data.put_u32(BLOOM_FILE_MAGIC);
        data.put_u64(self.blocks.len() as u64);
        data.put_u64(self.nkeys);
        data.put_i32(self.checksum_type as i32);
        data.put_u64(checksum);
        data
    }
}

/// The loaded bloom filter of one rowset. Answers "definitely absent" or
/// "possibly present".
pub struct BloomFilter {
    blocks: Vec<BloomBlock>,
    nkeys: u64,
}

impl BloomFilter {
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let mut file = tokio::fs::File::open(path.as_ref()).await?;
        let mut data = vec![];
        file.read_to_end(&mut data).await?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> StorageResult<Self> {
        if data.len() < BLOOM_FOOTER_SIZE {
            return Err(TracedStorageError::corruption("bloom file too small"));
        }
        let body = &data[..data.len() - BLOOM_FOOTER_SIZE];
        let mut footer = &data[data.len() - BLOOM_FOOTER_SIZE..];
        if footer.get_u32() != BLOOM_FILE_MAGIC {
            return Err(TracedStorageError::decode(
                "failed to decode bloom file: invalid magic",
            ));
        }
        let nblocks = footer.get_u64() as usize;
        if nblocks == 0 {
            return Err(TracedStorageError::decode("bloom file with no blocks"));
        }
        let nkeys = footer.get_u64();
        let checksum_type = ChecksumType::from_i32(footer.get_i32())
            .ok_or_else(|| TracedStorageError::decode("invalid checksum type"))?;
        let checksum = footer.get_u64();
        if body.len() != nblocks * 32 {
            return Err(TracedStorageError::decode("bloom file length mismatch"));
        }
        verify_checksum(checksum_type, body, checksum)?;

        let mut body = body;
        let mut blocks = Vec::with_capacity(nblocks);
        for _ in 0..nblocks {
            let mut words = [0u32; 8];
            for word in &mut words {
                *word = body.get_u32_le();
            }
            blocks.push(BloomBlock(words));
        }
        Ok(Self { blocks, nkeys })
    }

    pub fn nkeys(&self) -> u64 {
        self.nkeys
    }

    /// `false` means the key is definitely absent.
    pub fn check_probe(&self, probe: &BloomKeyProbe) -> bool {
        self.check_hash(probe.hash)
    }

    pub fn check_hash(&self, hash: u64) -> bool {
        let block_id = block_of_hash(hash, self.blocks.len());
        self.blocks[block_id].check(hash as u32)
    }
}

/// Block selection by the multiply-shift scheme of the parquet spec.
fn block_of_hash(hash: u64, nblocks: usize) -> usize {
    (((hash >> 32) * nblocks as u64) >> 32) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(keys: impl Iterator<Item = Vec<u8>>, expected: usize, fpp: f64) -> BloomFilter {
        let mut builder = BloomFilterBuilder::new(
            BloomFilterSizing { fpp },
            expected,
            ChecksumType::Crc32,
        );
        for key in keys {
            builder.append_key(&key);
        }
        BloomFilter::from_bytes(&builder.finish()).unwrap()
    }

    fn key_of(i: u64) -> Vec<u8> {
        format!("key_{}", i).into_bytes()
    }

    #[test]
    fn test_no_false_negatives() {
        let filter = build((0..10_000).map(key_of), 10_000, 0.01);
        for i in 0..10_000 {
            assert!(filter.check_probe(&BloomKeyProbe::new(&key_of(i))));
        }
    }

    #[test]
    fn test_false_positive_rate_bounded() {
        let filter = build((0..10_000).map(key_of), 10_000, 0.01);
        let mut false_positives = 0;
        let probes = 100_000;
        for i in 0..probes {
            if filter.check_probe(&BloomKeyProbe::new(&key_of(1_000_000 + i))) {
                false_positives += 1;
            }
        }
        // Allow generous slack over the configured 1%.
        assert!(
            (false_positives as f64) < probes as f64 * 0.03,
            "false positive rate too high: {}/{}",
            false_positives,
            probes
        );
    }

    #[test]
    fn test_empty_filter() {
        let filter = build(std::iter::empty(), 0, 0.01);
        assert_eq!(filter.nkeys(), 0);
        assert!(!filter.check_probe(&BloomKeyProbe::new(b"anything")));
    }

    #[test]
    fn test_corrupted_bloom_file() {
        let mut builder =
            BloomFilterBuilder::new(BloomFilterSizing::default(), 16, ChecksumType::Crc32);
        builder.append_key(b"k");
        let mut data = builder.finish();
        data[0] ^= 0xff;
        assert!(BloomFilter::from_bytes(&data).is_err());
    }
}
