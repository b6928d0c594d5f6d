// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

//! Compaction: merging several rowsets into one new rowset, consolidating
//! base images and delta tracks.

use std::path::Path;
use std::sync::Arc;

use itertools::Itertools;
use moka::future::Cache;
use tracing::{info, warn};

use super::delta::RowChange;
use super::delta_tracker::DeltaSnapshot;
use super::disk_rowset::DiskRowset;
use super::rowset_writer::RowsetWriter;
use super::Rowset;
use super::base_data::BaseDataIterator;
use crate::array::ArrayImpl;
use crate::block::{Block, BlockCacheKey};
use crate::error::StorageResult;
use crate::mvcc::{MvccSnapshot, TxId};
use crate::options::{ColumnBuilderOptions, IOBackend};
use crate::schema::Schema;
use crate::types::Value;

/// One row of a compaction stream: the full base row with every recorded
/// delta, committed or not. The consumer partitions the deltas by its
/// snapshot: committed ones fold into the output base, the rest are
/// carried into the output's delta track.
pub struct CompactionInputRow {
    pub encoded_key: Vec<u8>,
    pub rowid: u32,
    pub values: Vec<Value>,
    pub deltas: Vec<(TxId, RowChange)>,
}

/// A raw stream of base rows and their delta sequences, ordered by rowid.
pub struct CompactionInput {
    schema: Arc<Schema>,
    base_iter: BaseDataIterator,
    deltas: DeltaSnapshot,
    snap: MvccSnapshot,
}

impl CompactionInput {
    pub(super) async fn new(rowset: &DiskRowset, snap: MvccSnapshot) -> StorageResult<Self> {
        let schema = rowset.schema().clone();
        let projection: Arc<[usize]> = (0..schema.num_columns()).collect_vec().into();
        let base_iter = rowset.base().new_iterator(projection).await?;
        Ok(Self {
            schema,
            base_iter,
            deltas: rowset.delta_tracker().snapshot(),
            snap,
        })
    }

    /// The snapshot the compaction started from.
    pub fn snapshot(&self) -> &MvccSnapshot {
        &self.snap
    }

    pub async fn next_block(&mut self) -> StorageResult<Option<Vec<CompactionInputRow>>> {
        let (first_rowid, arrays): (u32, Vec<ArrayImpl>) =
            match self.base_iter.next_batch(None).await? {
                Some(batch) => batch,
                None => return Ok(None),
            };
        let row_count = arrays[0].len();
        let end_rowid = first_rowid + row_count as u32;
        let mut deltas = self
            .deltas
            .collect_range(first_rowid, end_rowid)
            .into_iter()
            .peekable();

        let mut rows = Vec::with_capacity(row_count);
        for offset in 0..row_count {
            let rowid = first_rowid + offset as u32;
            let values: Vec<Value> = arrays.iter().map(|array| array.value(offset)).collect();
            let mut row_deltas = vec![];
            while let Some((key, _)) = deltas.peek() {
                if key.rowid != rowid {
                    break;
                }
                let (key, change) = deltas.next().unwrap();
                row_deltas.push((key.txid, change));
            }
            rows.push(CompactionInputRow {
                encoded_key: self.schema.encode_key_of_values(&values),
                rowid,
                values,
                deltas: row_deltas,
            });
        }
        Ok(Some(rows))
    }
}

/// Merge the input rowsets into one new rowset at `out_dir`.
///
/// The output base image reflects every delta committed per `snap`; rows
/// whose latest committed delta is a delete are dropped. Deltas not
/// committed per `snap` (the mutations that raced the compaction and were
/// recorded through the duplicating façade) are re-keyed to output rowids
/// and carried into the output's delta track, so no mutation is lost
/// between snapshot and swap.
///
/// Callers hold every input's `compact_flush_lock` for the duration.
pub async fn compact_rowsets(
    inputs: &[Arc<dyn Rowset>],
    snap: &MvccSnapshot,
    out_dir: impl AsRef<Path>,
    options: ColumnBuilderOptions,
    block_cache: Cache<BlockCacheKey, Block>,
    out_rowset_id: u32,
    io_backend: IOBackend,
) -> StorageResult<DiskRowset> {
    assert!(!inputs.is_empty(), "no input rowsets");
    let schema = inputs[0].schema().clone();
    for input in inputs {
        assert_eq!(**input.schema(), *schema, "schema mismatch across inputs");
    }

    // Collect every input row. Inputs are given oldest first; on a key
    // collision the row from the newest input wins.
    let mut merged: Vec<(usize, CompactionInputRow)> = vec![];
    for (input_idx, input) in inputs.iter().enumerate() {
        let mut stream = input.new_compaction_input(snap).await?;
        while let Some(rows) = stream.next_block().await? {
            for row in rows {
                merged.push((input_idx, row));
            }
        }
    }
    merged.sort_by(|(a_idx, a), (b_idx, b)| {
        a.encoded_key
            .cmp(&b.encoded_key)
            .then(b_idx.cmp(a_idx))
    });
    merged.dedup_by(|(_, next), (_, kept)| next.encoded_key == kept.encoded_key);

    let mut writer = RowsetWriter::open(out_dir.as_ref(), schema.clone(), options).await?;
    let mut carried: Vec<(TxId, u32, RowChange)> = vec![];
    for (_, row) in merged {
        // Fold the committed history into the base row.
        let mut values = row.values;
        let mut deleted = false;
        for (_, change) in row
            .deltas
            .iter()
            .filter(|(txid, _)| snap.is_committed(*txid))
        {
            match change {
                RowChange::Delete => deleted = true,
                RowChange::Update(columns) => {
                    deleted = false;
                    for (col_idx, value) in columns {
                        values[*col_idx] = value.clone();
                    }
                }
            }
        }

        let uncommitted = row
            .deltas
            .iter()
            .filter(|(txid, _)| !snap.is_committed(*txid))
            .collect_vec();
        if deleted {
            if !uncommitted.is_empty() {
                warn!(
                    "dropping {} in-flight deltas against a row deleted at the compaction snapshot",
                    uncommitted.len()
                );
            }
            continue;
        }

        let out_rowid = writer.written_count();
        writer.write_row(&values)?;
        for (txid, change) in uncommitted {
            carried.push((*txid, out_rowid, change.clone()));
        }
    }
    writer.finish().await?;

    let output =
        DiskRowset::open(out_dir.as_ref(), schema, block_cache, out_rowset_id, io_backend).await?;
    if !carried.is_empty() {
        info!(
            "carrying {} in-flight deltas into compacted rowset {}",
            carried.len(),
            out_rowset_id
        );
        for (txid, rowid, change) in carried {
            output.update_rowid(txid, rowid, change)?;
        }
        output.flush_deltas().await?;
    }
    info!(
        "compaction complete: {} -> {}",
        inputs.iter().map(|input| input.describe()).join(", "),
        output.describe()
    );
    Ok(output)
}
