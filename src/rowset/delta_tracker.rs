// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use itertools::Itertools;
use parking_lot::RwLock;
use tracing::info;

use super::delta::{DeltaKey, RowChange};
use super::delta_file::{write_delta_file, DeltaFileReader};
use super::{path_of_delta, DELTA_FILE_PREFIX};
use crate::checksum::ChecksumType;
use crate::error::{StorageResult, TracedStorageError};
use crate::mvcc::{MvccSnapshot, TxId};
use crate::schema::Schema;

/// The in-memory delta buffer: a concurrent ordered map from
/// `(rowid, txid)` to the recorded change.
pub type DeltaBuffer = SkipMap<DeltaKey, RowChange>;

struct DeltaTrackerInner {
    /// Mutations not yet flushed.
    buffer: Arc<DeltaBuffer>,

    /// The buffer detached by an in-progress flush. Still visible to
    /// readers until the flushed file is installed.
    flushing: Option<Arc<DeltaBuffer>>,

    /// Flushed delta files, oldest first.
    files: Arc<Vec<Arc<DeltaFileReader>>>,

    /// Id of the next delta file, `max(existing) + 1`.
    next_delta_id: u32,
}

/// Owns the mutable state layered over one rowset's base image: an
/// in-memory delta buffer plus zero or more flushed delta files.
///
/// Snapshot discipline: the tracker state is three `Arc`s behind a short
/// [`RwLock`]; readers clone them in one critical section and hold a
/// consistent view, so a flush is either fully visible (file installed,
/// buffer detached) or not at all. The buffer itself is a concurrent
/// skiplist shared with live snapshots; deltas inserted after a snapshot
/// was taken may be structurally reachable through it, but carry txids
/// the snapshot's MVCC filter rejects. Callers must not reuse a txid that
/// is already visible to a live snapshot.
pub struct DeltaTracker {
    dir: Arc<RwLock<PathBuf>>,
    schema: Arc<Schema>,
    base_rows: u32,
    checksum_type: ChecksumType,
    inner: RwLock<DeltaTrackerInner>,

    /// Serializes flushes; never held while readers or updaters run.
    flush_lock: tokio::sync::Mutex<()>,
}

impl DeltaTracker {
    /// List and open every `delta_*` file in the rowset directory.
    pub async fn open(
        dir: Arc<RwLock<PathBuf>>,
        schema: Arc<Schema>,
        base_rows: u32,
        checksum_type: ChecksumType,
    ) -> StorageResult<Self> {
        let path = dir.read().clone();
        let mut delta_ids = vec![];
        let mut entries = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(name) => name,
                None => continue,
            };
            if let Some(id) = name.strip_prefix(DELTA_FILE_PREFIX) {
                let id = id.parse::<u32>().map_err(|_| {
                    TracedStorageError::corruption(format!("unexpected delta file name {}", name))
                })?;
                delta_ids.push(id);
            }
        }
        // Gaps are tolerated: a failed flush may have died between
        // reserving an id and writing the file.
        delta_ids.sort_unstable();

        let mut files = Vec::with_capacity(delta_ids.len());
        for id in &delta_ids {
            let reader =
                DeltaFileReader::open(*id, path_of_delta(&path, *id), &schema, base_rows).await?;
            files.push(Arc::new(reader));
        }
        let next_delta_id = delta_ids.last().map(|id| id + 1).unwrap_or(0);

        Ok(Self {
            dir,
            schema,
            base_rows,
            checksum_type,
            inner: RwLock::new(DeltaTrackerInner {
                buffer: Arc::new(SkipMap::new()),
                flushing: None,
                files: Arc::new(files),
                next_delta_id,
            }),
            flush_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn base_rows(&self) -> u32 {
        self.base_rows
    }

    /// Record an update or delete against a base row.
    pub fn update(&self, txid: TxId, rowid: u32, change: RowChange) -> StorageResult<()> {
        if rowid >= self.base_rows {
            return Err(TracedStorageError::not_found("rowid", rowid));
        }
        change.validate(&self.schema)?;

        let buffer = self.inner.read().buffer.clone();
        let key = DeltaKey { rowid, txid };
        // Two mutations of the same row within one transaction fold into
        // one record. Callers serialize writes per transaction.
        let merged = match buffer.get(&key) {
            Some(entry) => {
                let mut merged = entry.value().clone();
                merged.merge(&change);
                merged
            }
            None => change,
        };
        buffer.insert(key, merged);
        Ok(())
    }

    /// A consistent view of the delta state for one iterator.
    pub fn snapshot(&self) -> DeltaSnapshot {
        let inner = self.inner.read();
        DeltaSnapshot {
            buffer: inner.buffer.clone(),
            flushing: inner.flushing.clone(),
            files: inner.files.clone(),
        }
    }

    /// Wrap a base iterator so that every delta committed per `snap` is
    /// applied to its batches.
    pub fn wrap_iterator(
        &self,
        base_iter: super::BaseDataIterator,
        snap: MvccSnapshot,
        projection: Arc<[usize]>,
    ) -> super::RowsetIterator {
        super::RowsetIterator::new(base_iter, self.snapshot(), snap, projection)
    }

    /// Promote the in-memory buffer into a new immutable `delta_<k>` file.
    ///
    /// Three phases: detach the buffer (readers keep seeing it through the
    /// `flushing` slot), write the file without holding any lock, then
    /// install the reader and drop the detached buffer. Readers at every
    /// instant see each delta exactly once; updates racing the flush land
    /// in the fresh buffer.
    pub async fn flush(&self) -> StorageResult<()> {
        let _flushing = self.flush_lock.lock().await;

        let (detached, delta_id) = {
            let mut inner = self.inner.write();
            if inner.buffer.is_empty() {
                return Ok(());
            }
            assert!(inner.flushing.is_none(), "flush already in progress");
            let detached = std::mem::replace(&mut inner.buffer, Arc::new(SkipMap::new()));
            inner.flushing = Some(detached.clone());
            (detached, inner.next_delta_id)
        };

        let records = detached
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect_vec();
        let path = path_of_delta(&*self.dir.read(), delta_id);

        let result = async {
            write_delta_file(&path, &records, self.checksum_type).await?;
            DeltaFileReader::open(delta_id, &path, &self.schema, self.base_rows).await
        }
        .await;

        let reader = match result {
            Ok(reader) => reader,
            Err(e) => {
                // Fold the detached buffer back so nothing is lost. An
                // entry re-recorded meanwhile is newer; keep it.
                let mut inner = self.inner.write();
                for entry in detached.iter() {
                    if inner.buffer.get(entry.key()).is_none() {
                        inner.buffer.insert(*entry.key(), entry.value().clone());
                    }
                }
                inner.flushing = None;
                return Err(e);
            }
        };

        {
            let mut inner = self.inner.write();
            let mut files = (*inner.files).clone();
            files.push(Arc::new(reader));
            inner.files = Arc::new(files);
            inner.flushing = None;
            inner.next_delta_id = delta_id + 1;
        }
        info!(
            "flushed {} delta records to {}",
            records.len(),
            path.display()
        );
        Ok(())
    }
}

/// The delta state an iterator holds: flushed files plus the shared
/// buffer(s) as of iterator creation.
#[derive(Clone)]
pub struct DeltaSnapshot {
    buffer: Arc<DeltaBuffer>,
    flushing: Option<Arc<DeltaBuffer>>,
    files: Arc<Vec<Arc<DeltaFileReader>>>,
}

impl DeltaSnapshot {
    /// An empty delta view.
    pub fn empty() -> Self {
        Self {
            buffer: Arc::new(SkipMap::new()),
            flushing: None,
            files: Arc::new(vec![]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
            && self.flushing.as_ref().map_or(true, |map| map.is_empty())
            && self.files.iter().all(|file| file.records().is_empty())
    }

    /// All deltas for rowids in `[start, end)`, in `(rowid, txid)` order,
    /// with records for the same `(rowid, txid)` folded oldest-to-newest.
    pub fn collect_range(&self, start: u32, end: u32) -> Vec<(DeltaKey, RowChange)> {
        let mut folded: BTreeMap<DeltaKey, RowChange> = BTreeMap::new();
        let mut fold = |key: DeltaKey, change: &RowChange| match folded.entry(key) {
            std::collections::btree_map::Entry::Occupied(mut entry) => {
                entry.get_mut().merge(change);
            }
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(change.clone());
            }
        };

        // Oldest sources first, so newer records win the fold.
        for file in self.files.iter() {
            for (key, change) in file.records_in_range(start, end) {
                fold(*key, change);
            }
        }
        let range = (
            std::ops::Bound::Included(DeltaKey {
                rowid: start,
                txid: 0,
            }),
            std::ops::Bound::Excluded(DeltaKey {
                rowid: end,
                txid: 0,
            }),
        );
        if let Some(flushing) = &self.flushing {
            for entry in flushing.range(range) {
                fold(*entry.key(), entry.value());
            }
        }
        for entry in self.buffer.range(range) {
            fold(*entry.key(), entry.value());
        }

        folded.into_iter().collect()
    }

    /// Deltas committed per `snap` for rowids in `[start, end)`.
    pub fn collect_range_committed(
        &self,
        start: u32,
        end: u32,
        snap: &MvccSnapshot,
    ) -> Vec<(DeltaKey, RowChange)> {
        self.collect_range(start, end)
            .into_iter()
            .filter(|(key, _)| snap.is_committed(key.txid))
            .collect()
    }
}
