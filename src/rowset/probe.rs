// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use crate::bloom::BloomKeyProbe;
use crate::error::StorageResult;
use crate::schema::Schema;
use crate::types::Value;

/// Caches an encoded and hashed key, suitable for probing rowsets without
/// re-encoding the key per rowset.
///
/// The raw key is borrowed, so the probe must not outlive it.
pub struct KeyProbe<'a> {
    raw_key: &'a [Value],
    encoded_key: Vec<u8>,
    bloom_probe: BloomKeyProbe,
}

impl<'a> KeyProbe<'a> {
    pub fn new(schema: &Schema, raw_key: &'a [Value]) -> StorageResult<Self> {
        let encoded_key = schema.encode_key(raw_key)?;
        let bloom_probe = BloomKeyProbe::new(&encoded_key);
        Ok(Self {
            raw_key,
            encoded_key,
            bloom_probe,
        })
    }

    pub fn raw_key(&self) -> &'a [Value] {
        self.raw_key
    }

    /// The key encoded to be contiguous and lexicographically comparable.
    pub fn encoded_key(&self) -> &[u8] {
        &self.encoded_key
    }

    /// The cached structure used to query bloom filters.
    pub fn bloom_probe(&self) -> &BloomKeyProbe {
        &self.bloom_probe
    }
}
