// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use moka::future::Cache;
use parking_lot::RwLock;
use tracing::info;

use super::base_data::BaseData;
use super::compaction::CompactionInput;
use super::delta::RowChange;
use super::delta_tracker::DeltaTracker;
use super::probe::KeyProbe;
use super::rowset_iterator::RowsetIteratorImpl;
use super::{Rowset, DELETING_ROWSET_SUFFIX};
use crate::block::{Block, BlockCacheKey};
use crate::checksum::ChecksumType;
use crate::error::StorageResult;
use crate::mvcc::{MvccSnapshot, TxId};
use crate::options::IOBackend;
use crate::schema::Schema;
use crate::types::Value;

/// One on-disk rowset: the immutable columnar base image bound to its
/// mutable delta track.
///
/// A `DiskRowset` owns its [`BaseData`] and [`DeltaTracker`] for its
/// lifetime; file handles are released when the rowset is dropped. The
/// rowset is either open or deleted, and both states are terminal.
pub struct DiskRowset {
    schema: Arc<Schema>,
    dir: Arc<RwLock<PathBuf>>,
    base: BaseData,
    deltas: DeltaTracker,
    rowset_id: u32,
    open: AtomicBool,
    compact_flush_lock: Arc<tokio::sync::Mutex<()>>,
}

impl DiskRowset {
    /// Open a rowset directory: the base image first, then the delta
    /// track. Fails closed; on error everything opened so far is
    /// released.
    pub async fn open(
        directory: impl AsRef<Path>,
        schema: Arc<Schema>,
        block_cache: Cache<BlockCacheKey, Block>,
        rowset_id: u32,
        io_backend: IOBackend,
    ) -> StorageResult<Self> {
        let dir = Arc::new(RwLock::new(directory.as_ref().to_path_buf()));
        let base = BaseData::open(
            directory.as_ref(),
            schema.clone(),
            block_cache,
            rowset_id,
            io_backend,
        )
        .await?;
        let deltas = DeltaTracker::open(
            dir.clone(),
            schema.clone(),
            base.count_rows(),
            ChecksumType::Crc32,
        )
        .await?;

        Ok(Self {
            schema,
            dir,
            base,
            deltas,
            rowset_id,
            open: AtomicBool::new(true),
            compact_flush_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    fn assert_open(&self) {
        assert!(self.open.load(Ordering::Acquire), "rowset is not open");
    }

    pub fn rowset_id(&self) -> u32 {
        self.rowset_id
    }

    pub fn directory(&self) -> PathBuf {
        self.dir.read().clone()
    }

    pub(super) fn base(&self) -> &BaseData {
        &self.base
    }

    pub(super) fn delta_tracker(&self) -> &DeltaTracker {
        &self.deltas
    }

    /// Resolve a key to its rowid in the base image.
    pub async fn find_row(&self, encoded_key: &[u8]) -> StorageResult<u32> {
        self.assert_open();
        self.base.find_row(encoded_key).await
    }

    /// Record a mutation against a known rowid. Used by the compaction
    /// finish phase to carry deltas into the output rowset.
    pub(super) fn update_rowid(
        &self,
        txid: TxId,
        rowid: u32,
        change: RowChange,
    ) -> StorageResult<()> {
        self.assert_open();
        self.deltas.update(txid, rowid, change)
    }

    /// Promote the in-memory delta buffer into a new delta file.
    pub async fn flush_deltas(&self) -> StorageResult<()> {
        self.assert_open();
        self.deltas.flush().await
    }

    /// Atomically rename the rowset directory.
    pub async fn rename(&self, new_dir: impl AsRef<Path>) -> StorageResult<()> {
        self.assert_open();
        let new_dir = new_dir.as_ref().to_path_buf();
        let mut dir = self.dir.write();
        // Sync rename under the path lock; the std call avoids holding a
        // parking_lot guard across an await point.
        std::fs::rename(&*dir, &new_dir).map_err(crate::error::TracedStorageError::from)?;
        *dir = new_dir;
        Ok(())
    }
}

#[async_trait]
impl Rowset for DiskRowset {
    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    async fn check_row_present(&self, probe: &KeyProbe<'_>) -> StorageResult<bool> {
        self.assert_open();
        // Presence is a key-domain question about the base image; the
        // delta track is not consulted.
        self.base.check_row_present(probe).await
    }

    async fn mutate_row(
        &self,
        txid: TxId,
        key: &[Value],
        change: &RowChange,
    ) -> StorageResult<()> {
        self.assert_open();
        let encoded_key = self.schema.encode_key(key)?;
        let rowid = self.base.find_row(&encoded_key).await?;
        self.deltas.update(txid, rowid, change.clone())
    }

    async fn new_row_iterator(
        &self,
        projection: Arc<[usize]>,
        snap: &MvccSnapshot,
    ) -> StorageResult<RowsetIteratorImpl> {
        self.assert_open();
        let base_iter = self.base.new_iterator(projection.clone()).await?;
        Ok(self
            .deltas
            .wrap_iterator(base_iter, snap.clone(), projection)
            .into())
    }

    async fn new_compaction_input(&self, snap: &MvccSnapshot) -> StorageResult<CompactionInput> {
        self.assert_open();
        CompactionInput::new(self, snap.clone()).await
    }

    async fn count_rows(&self) -> StorageResult<u32> {
        self.assert_open();
        Ok(self.base.count_rows())
    }

    fn estimate_on_disk_size(&self) -> u64 {
        self.assert_open();
        // TODO: include the flushed delta files once callers are ready
        // for compaction policy to see them.
        self.base.estimate_on_disk_size()
    }

    async fn delete(&self) -> StorageResult<()> {
        self.assert_open();
        self.open.store(false, Ordering::Release);
        let dir = self.directory();
        let mut deleting = dir.clone().into_os_string();
        deleting.push(DELETING_ROWSET_SUFFIX);
        let deleting = PathBuf::from(deleting);
        // Rename first: a crash in between leaves a clearly-marked
        // garbage directory the startup sweep finishes unlinking.
        tokio::fs::rename(&dir, &deleting).await?;
        tokio::fs::remove_dir_all(&deleting).await?;
        info!("deleted rowset {}", dir.display());
        Ok(())
    }

    fn compact_flush_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        self.compact_flush_lock.clone()
    }

    async fn debug_dump(&self) -> StorageResult<Vec<String>> {
        self.assert_open();
        let mut input = self
            .new_compaction_input(&MvccSnapshot::all_committed())
            .await?;
        let mut lines = vec![self.describe()];
        while let Some(rows) = input.next_block().await? {
            for row in rows {
                let mut line = format!(
                    "rowid {}: ({})",
                    row.rowid,
                    row.values
                        .iter()
                        .map(|value| value.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                for (txid, change) in &row.deltas {
                    line.push_str(&format!(" @{}: {};", txid, change));
                }
                lines.push(line);
            }
        }
        Ok(lines)
    }

    fn describe(&self) -> String {
        format!("DiskRowset({})", self.directory().display())
    }
}
