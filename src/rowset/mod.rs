// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

//! Rowsets: the unit of flush, read and compaction.
//!
//! A [`DiskRowset`] binds the immutable base image ([`BaseData`]) with the
//! mutable delta track ([`DeltaTracker`]). A [`DuplicatingRowset`] is the
//! transitional façade installed while a flush or compaction replaces one
//! set of rowsets with another. Both implement the [`Rowset`] capability
//! trait, which is what the tablet layer dispatches through.

mod base_data;
mod compaction;
mod delta;
mod delta_file;
mod delta_tracker;
mod disk_rowset;
mod duplicating;
mod probe;
mod rowset_builder;
mod rowset_iterator;
mod rowset_writer;

pub use base_data::*;
pub use compaction::*;
pub use delta::*;
pub use delta_file::*;
pub use delta_tracker::*;
pub use disk_rowset::*;
pub use duplicating::*;
pub use probe::*;
pub use rowset_builder::*;
pub use rowset_iterator::*;
pub use rowset_writer::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::StorageResult;
use crate::mvcc::{MvccSnapshot, TxId};
use crate::schema::Schema;
use crate::types::Value;

pub const COLUMN_FILE_PREFIX: &str = "col_";
pub const DELTA_FILE_PREFIX: &str = "delta_";
pub const BLOOM_FILE_NAME: &str = "bloom";
pub const TMP_ROWSET_SUFFIX: &str = ".tmp";
pub const DELETING_ROWSET_SUFFIX: &str = ".deleting";

/// Path of one column file inside a rowset directory.
pub fn path_of_column(dir: impl AsRef<Path>, column_idx: usize) -> PathBuf {
    dir.as_ref()
        .join(format!("{}{}", COLUMN_FILE_PREFIX, column_idx))
}

/// Path of the bloom filter file inside a rowset directory.
pub fn path_of_bloom(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(BLOOM_FILE_NAME)
}

/// Path of one delta file inside a rowset directory.
pub fn path_of_delta(dir: impl AsRef<Path>, delta_id: u32) -> PathBuf {
    dir.as_ref().join(format!("{}{}", DELTA_FILE_PREFIX, delta_id))
}

/// The operations every rowset variant supports.
#[async_trait]
pub trait Rowset: Send + Sync {
    /// Schema of the data in this rowset.
    fn schema(&self) -> &Arc<Schema>;

    /// Check if a given row key is present in this rowset. This is a
    /// key-domain question about the base image: a row deleted by a delta
    /// still answers `true`.
    async fn check_row_present(&self, probe: &KeyProbe<'_>) -> StorageResult<bool>;

    /// Update or delete a row in this rowset. Returns `NotFound` if the
    /// key does not exist here; callers try other rowsets on that.
    async fn mutate_row(&self, txid: TxId, key: &[Value], change: &RowChange)
        -> StorageResult<()>;

    /// A new iterator over this rowset with the given projection,
    /// reflecting exactly the transactions committed per `snap`.
    async fn new_row_iterator(
        &self,
        projection: Arc<[usize]>,
        snap: &MvccSnapshot,
    ) -> StorageResult<RowsetIteratorImpl>;

    /// The input stream a compaction merger consumes.
    async fn new_compaction_input(&self, snap: &MvccSnapshot) -> StorageResult<CompactionInput>;

    /// Number of rows in the base image.
    async fn count_rows(&self) -> StorageResult<u32>;

    /// Estimated on-disk size in bytes.
    fn estimate_on_disk_size(&self) -> u64;

    /// Delete the underlying storage for this rowset.
    async fn delete(&self) -> StorageResult<()>;

    /// The lock a caller must hold to include this rowset as input to a
    /// compaction or flush. Prevents two overlapping compactions from
    /// selecting the same rowset; unrelated to delta-buffer
    /// synchronization.
    fn compact_flush_lock(&self) -> Arc<tokio::sync::Mutex<()>>;

    /// Dump the full contents of this rowset. Very verbose, only useful
    /// within tests.
    async fn debug_dump(&self) -> StorageResult<Vec<String>>;

    /// A displayable summary of this rowset.
    fn describe(&self) -> String;
}

/// Sweep leftover transient directories under a storage root: `*.tmp`
/// from interrupted writers and `*.deleting` from interrupted deleters.
/// Returns the paths removed.
pub async fn sweep_transient_dirs(root: impl AsRef<Path>) -> StorageResult<Vec<PathBuf>> {
    let mut removed = vec![];
    let mut entries = tokio::fs::read_dir(root.as_ref()).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if name.ends_with(TMP_ROWSET_SUFFIX) || name.ends_with(DELETING_ROWSET_SUFFIX) {
            info!("sweeping transient rowset directory {}", path.display());
            tokio::fs::remove_dir_all(&path).await?;
            removed.push(path);
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sweep_transient_dirs() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path();
        tokio::fs::create_dir(root.join("rs_1")).await.unwrap();
        tokio::fs::create_dir(root.join("rs_2.tmp")).await.unwrap();
        tokio::fs::create_dir(root.join("rs_3.deleting")).await.unwrap();
        tokio::fs::write(root.join("rs_3.deleting").join("col_0"), b"x")
            .await
            .unwrap();

        let removed = sweep_transient_dirs(root).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(root.join("rs_1").exists());
        assert!(!root.join("rs_2.tmp").exists());
        assert!(!root.join("rs_3.deleting").exists());
    }
}
