// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

//! Column readers, builders and iterators.
//!
//! A column file is composed of checksummed blocks, a block index and an
//! optional key index (see [`crate::index_builder::IndexBuilder`] for the
//! layout). [`Column`] is the shared read handle; builders chunk arrays
//! into blocks, and iterators stream them back out by rowid.

mod column_builder;
mod column_iterator;

pub use column_builder::*;
pub use column_iterator::*;

use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes};
use moka::future::Cache;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::block::{Block, BlockCacheKey, BlockHeader, BLOCK_HEADER_SIZE};
use crate::checksum::verify_checksum;
use crate::error::{StorageResult, TracedStorageError};
use crate::index::{decode_column_index, ColumnIndex, KeyIndex};
use crate::index_builder::COLUMN_FOOTER_SIZE;
use crate::options::IOBackend;

#[derive(Clone)]
pub enum ColumnReadableFile {
    /// Offset reads on a shared handle, no seeking.
    #[cfg(unix)]
    PositionedRead(Arc<std::fs::File>),
    /// Seek-then-read under a mutex, for platforms without `read_at`.
    NormalRead(Arc<Mutex<std::fs::File>>),
}

/// The read handle of one column file: the in-memory index regions, the
/// file handle and a binding into the shared block cache. Cloning is
/// cheap, so iterators take their own copies.
#[derive(Clone)]
pub struct Column {
    index: ColumnIndex,
    key_index: KeyIndex,
    file: ColumnReadableFile,
    block_cache: Cache<BlockCacheKey, Block>,
    base_block_key: BlockCacheKey,
    file_size: u64,
}

impl Column {
    /// Open a column file, reading its index regions into memory.
    pub async fn open(
        path: impl AsRef<Path>,
        block_cache: Cache<BlockCacheKey, Block>,
        base_block_key: BlockCacheKey,
        io_backend: IOBackend,
    ) -> StorageResult<Self> {
        let mut file = tokio::fs::OpenOptions::new()
            .read(true)
            .open(path.as_ref())
            .await?;
        let file_size = file.metadata().await?.len();
        if file_size < COLUMN_FOOTER_SIZE as u64 {
            return Err(TracedStorageError::corruption(format!(
                "column file {} too small",
                path.as_ref().display()
            )));
        }

        let mut footer = vec![0; COLUMN_FOOTER_SIZE];
        file.seek(SeekFrom::End(-(COLUMN_FOOTER_SIZE as i64))).await?;
        file.read_exact(&mut footer).await?;

        // The index length sits right after the magic.
        let index_len = (&footer[4..12]).get_u64();
        let index_end = file_size - COLUMN_FOOTER_SIZE as u64;
        if index_len > index_end {
            return Err(TracedStorageError::corruption(format!(
                "column file {} has invalid index length",
                path.as_ref().display()
            )));
        }
        let mut index_data = vec![0; index_len as usize];
        file.seek(SeekFrom::Start(index_end - index_len)).await?;
        file.read_exact(&mut index_data).await?;

        let (index, key_index) = decode_column_index(&index_data, &footer)?;

        let file = file.into_std().await;
        let file = match io_backend {
            #[cfg(unix)]
            IOBackend::PositionedRead => ColumnReadableFile::PositionedRead(Arc::new(file)),
            _ => ColumnReadableFile::NormalRead(Arc::new(Mutex::new(file))),
        };
        Ok(Self {
            index,
            key_index,
            file,
            block_cache,
            base_block_key,
            file_size,
        })
    }

    pub fn index(&self) -> &ColumnIndex {
        &self.index
    }

    pub fn key_index(&self) -> &KeyIndex {
        &self.key_index
    }

    pub fn row_count(&self) -> u32 {
        self.index.row_count()
    }

    pub fn on_disk_size(&self) -> u64 {
        self.file_size
    }

    /// Fetch a block, through the block cache.
    pub async fn get_block(&self, block_id: u32) -> StorageResult<(BlockHeader, Block)> {
        let key = self.base_block_key.with_block(block_id);

        let block = if let Some(block) = self.block_cache.get(&key).await {
            block
        } else {
            // Cache miss: read the frame off disk and fill the cache.
            let file = self.file.clone();
            let info = self.index.index(block_id).clone();
            let block = tokio::task::spawn_blocking(move || {
                let mut data = vec![0; info.length as usize];
                match file {
                    #[cfg(unix)]
                    ColumnReadableFile::PositionedRead(file) => {
                        file.read_exact_at(&mut data[..], info.offset)?
                    }
                    ColumnReadableFile::NormalRead(file) => {
                        let mut file = file.lock().unwrap();
                        file.seek(SeekFrom::Start(info.offset))?;
                        file.read_exact(&mut data[..])?;
                    }
                }
                Ok::<_, std::io::Error>(Bytes::from(data))
            })
            .await
            .expect("block read task failed")?;

            self.block_cache.insert(key, block.clone()).await;
            block
        };

        if block.len() < BLOCK_HEADER_SIZE {
            return Err(TracedStorageError::corruption("block frame too small"));
        }
        let header = BlockHeader::decode(&mut &block[..])?;
        // The checksum covers the whole frame after its own field.
        verify_checksum(header.checksum_type, &block[8..], header.checksum)?;
        Ok((header, block.slice(BLOCK_HEADER_SIZE..)))
    }
}
