// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

//! End-to-end scenarios over whole rowsets.

use std::path::Path;
use std::sync::Arc;

use itertools::Itertools;
use moka::future::Cache;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use crate::{
    compact_rowsets, sweep_transient_dirs, ColumnBuilderOptions, ColumnDesc, DataChunk, DataType,
    DiskRowset, DuplicatingRowset, IOBackend, KeyProbe, MvccSnapshot, RowChange, Rowset,
    RowsetWriter, Schema, Value,
};

fn kv_schema() -> Arc<Schema> {
    Arc::new(Schema::new(
        vec![
            ColumnDesc::new("k", DataType::UInt32),
            ColumnDesc::new("v", DataType::UInt32),
        ],
        1,
    ))
}

fn kv_rows(rows: &[(u32, u32)]) -> Vec<Vec<Value>> {
    rows.iter()
        .map(|(k, v)| vec![Value::UInt32(*k), Value::UInt32(*v)])
        .collect_vec()
}

async fn build_kv_rowset(dir: impl AsRef<Path>, rows: &[(u32, u32)]) -> DiskRowset {
    let schema = kv_schema();
    let mut writer = RowsetWriter::open(
        dir.as_ref(),
        schema.clone(),
        ColumnBuilderOptions::default_for_test(),
    )
    .await
    .unwrap();
    if !rows.is_empty() {
        writer
            .append_block(DataChunk::from_rows(
                &kv_rows(rows),
                &[DataType::UInt32, DataType::UInt32],
            ))
            .unwrap();
    }
    writer.finish().await.unwrap();
    DiskRowset::open(dir.as_ref(), schema, Cache::new(2333), 0, IOBackend::default())
        .await
        .unwrap()
}

fn set_v(v: u32) -> RowChange {
    RowChange::update(vec![(1, Value::UInt32(v))])
}

fn key(k: u32) -> Vec<Value> {
    vec![Value::UInt32(k)]
}

async fn scan(rowset: &dyn Rowset, snap: &MvccSnapshot) -> Vec<(u32, u32)> {
    let mut iter = rowset
        .new_row_iterator([0usize, 1].into_iter().collect_vec().into(), snap)
        .await
        .unwrap();
    iter.collect_rows()
        .await
        .unwrap()
        .into_iter()
        .map(|row| match (&row[0], &row[1]) {
            (Value::UInt32(k), Value::UInt32(v)) => (*k, *v),
            _ => unreachable!(),
        })
        .collect_vec()
}

#[tokio::test]
async fn test_read_through_delta() {
    // S1: an update is visible exactly when its txid is in the snapshot.
    let tempdir = TempDir::new().unwrap();
    let rowset = build_kv_rowset(tempdir.path().join("rs"), &[(1, 10), (2, 20), (3, 30)]).await;

    rowset.mutate_row(5, &key(2), &set_v(99)).await.unwrap();

    assert_eq!(
        scan(&rowset, &MvccSnapshot::from_committed([5])).await,
        vec![(1, 10), (2, 99), (3, 30)]
    );
    assert_eq!(
        scan(&rowset, &MvccSnapshot::empty()).await,
        vec![(1, 10), (2, 20), (3, 30)]
    );
}

#[tokio::test]
async fn test_delete_marker_and_presence() {
    // S2: a delta delete hides the row from iteration but not from the
    // key domain of the base.
    let tempdir = TempDir::new().unwrap();
    let rowset = build_kv_rowset(tempdir.path().join("rs"), &[(1, 10), (2, 20), (3, 30)]).await;

    rowset
        .mutate_row(7, &key(2), &RowChange::delete())
        .await
        .unwrap();

    assert_eq!(
        scan(&rowset, &MvccSnapshot::from_committed([7])).await,
        vec![(1, 10), (3, 30)]
    );

    let schema = rowset.schema().clone();
    let key_values = key(2);
    let probe = KeyProbe::new(&schema, &key_values).unwrap();
    assert!(rowset.check_row_present(&probe).await.unwrap());

    let absent = key(42);
    let probe = KeyProbe::new(&schema, &absent).unwrap();
    assert!(!rowset.check_row_present(&probe).await.unwrap());
}

#[tokio::test]
async fn test_mutate_missing_key_is_not_found() {
    let tempdir = TempDir::new().unwrap();
    let rowset = build_kv_rowset(tempdir.path().join("rs"), &[(1, 10)]).await;
    let err = rowset.mutate_row(1, &key(99), &set_v(0)).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_delta_ordering_within_row() {
    // Two committed deltas for one rowid apply in ascending txid order.
    let tempdir = TempDir::new().unwrap();
    let rowset = build_kv_rowset(tempdir.path().join("rs"), &[(1, 10)]).await;

    rowset.mutate_row(3, &key(1), &set_v(33)).await.unwrap();
    rowset.mutate_row(8, &key(1), &set_v(88)).await.unwrap();

    assert_eq!(
        scan(&rowset, &MvccSnapshot::from_committed([3, 8])).await,
        vec![(1, 88)]
    );
    assert_eq!(
        scan(&rowset, &MvccSnapshot::from_committed([3])).await,
        vec![(1, 33)]
    );

    // A delete followed by a later committed update resurrects the row.
    rowset
        .mutate_row(9, &key(1), &RowChange::delete())
        .await
        .unwrap();
    rowset.mutate_row(11, &key(1), &set_v(111)).await.unwrap();
    assert_eq!(
        scan(&rowset, &MvccSnapshot::from_committed([3, 8, 9])).await,
        vec![]
    );
    assert_eq!(
        scan(&rowset, &MvccSnapshot::from_committed([3, 8, 9, 11])).await,
        vec![(1, 111)]
    );
}

#[tokio::test]
async fn test_flush_equivalence() {
    // S4: iteration output is identical whether deltas sit in the buffer
    // or in flushed delta files.
    let tempdir = TempDir::new().unwrap();
    let base = (0..500u32).map(|k| (k, k)).collect_vec();
    let rowset = build_kv_rowset(tempdir.path().join("rs"), &base).await;

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut committed = vec![];
    for txid in 0..1000u64 {
        let k = rng.gen_range(0..500u32);
        if rng.gen_bool(0.1) {
            rowset
                .mutate_row(txid, &key(k), &RowChange::delete())
                .await
                .unwrap();
        } else {
            rowset
                .mutate_row(txid, &key(k), &set_v(rng.gen()))
                .await
                .unwrap();
        }
        if rng.gen_bool(0.7) {
            committed.push(txid);
        }
    }
    let snap = MvccSnapshot::from_committed(committed);

    let before = scan(&rowset, &snap).await;
    rowset.flush_deltas().await.unwrap();
    let after_flush = scan(&rowset, &snap).await;
    assert_eq!(before, after_flush);

    // And identical again after a reopen that reads the delta files.
    let reopened = DiskRowset::open(
        tempdir.path().join("rs"),
        kv_schema(),
        Cache::new(2333),
        1,
        IOBackend::NormalRead,
    )
    .await
    .unwrap();
    assert_eq!(before, scan(&reopened, &snap).await);
}

#[tokio::test]
async fn test_compaction_window() {
    // S3: a mutation not committed at the compaction snapshot reaches the
    // output rowset through the carry-forward, and a snapshot including
    // it sees the new value on the output alone.
    let tempdir = TempDir::new().unwrap();
    let input: Arc<dyn Rowset> = Arc::new(
        build_kv_rowset(tempdir.path().join("rs_in"), &[(1, 10), (2, 20), (3, 30)]).await,
    );

    // The update arrives after the compaction snapshot was taken.
    let compaction_snap = MvccSnapshot::empty();
    input.mutate_row(9, &key(2), &set_v(42)).await.unwrap();

    let inputs = vec![input.clone()];
    let _locks = {
        let mut locks = vec![];
        for input in &inputs {
            locks.push(input.compact_flush_lock().try_lock_owned().unwrap());
        }
        locks
    };
    let output = compact_rowsets(
        &inputs,
        &compaction_snap,
        tempdir.path().join("rs_out"),
        ColumnBuilderOptions::default_for_test(),
        Cache::new(2333),
        1,
        IOBackend::default(),
    )
    .await
    .unwrap();

    assert_eq!(
        scan(&output, &MvccSnapshot::from_committed([9])).await,
        vec![(1, 10), (2, 42), (3, 30)]
    );
    assert_eq!(
        scan(&output, &MvccSnapshot::empty()).await,
        vec![(1, 10), (2, 20), (3, 30)]
    );
}

#[tokio::test]
async fn test_duplicating_rowset_routing() {
    // Invariant: while the duplicating façade is installed, a mutation
    // reaches both the inputs and the output.
    let tempdir = TempDir::new().unwrap();
    let input: Arc<dyn Rowset> =
        Arc::new(build_kv_rowset(tempdir.path().join("rs_in"), &[(1, 10), (2, 20)]).await);
    let output: Arc<dyn Rowset> = Arc::new(
        compact_rowsets(
            &[input.clone()],
            &MvccSnapshot::all_committed(),
            tempdir.path().join("rs_out"),
            ColumnBuilderOptions::default_for_test(),
            Cache::new(2333),
            1,
            IOBackend::default(),
        )
        .await
        .unwrap(),
    );

    let duplicating = DuplicatingRowset::new(vec![input.clone()], output.clone());
    assert!(duplicating.compact_flush_lock().try_lock().is_err());

    duplicating.mutate_row(11, &key(2), &set_v(55)).await.unwrap();

    let snap = MvccSnapshot::from_committed([11]);
    // The façade reads through the inputs.
    assert_eq!(scan(&duplicating, &snap).await, vec![(1, 10), (2, 55)]);
    // After the swap, the output alone carries the mutation.
    assert_eq!(scan(output.as_ref(), &snap).await, vec![(1, 10), (2, 55)]);
    // And the input delta track received it too.
    assert_eq!(scan(input.as_ref(), &snap).await, vec![(1, 10), (2, 55)]);

    // A mutation for a key in no input is NotFound.
    let err = duplicating
        .mutate_row(12, &key(99), &set_v(0))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_compaction_folds_committed_and_drops_deleted() {
    let tempdir = TempDir::new().unwrap();
    let input: Arc<dyn Rowset> = Arc::new(
        build_kv_rowset(tempdir.path().join("rs_in"), &[(1, 10), (2, 20), (3, 30)]).await,
    );
    input.mutate_row(4, &key(1), &set_v(100)).await.unwrap();
    input
        .mutate_row(5, &key(3), &RowChange::delete())
        .await
        .unwrap();

    let output = compact_rowsets(
        &[input.clone()],
        &MvccSnapshot::from_committed([4, 5]),
        tempdir.path().join("rs_out"),
        ColumnBuilderOptions::default_for_test(),
        Cache::new(2333),
        1,
        IOBackend::default(),
    )
    .await
    .unwrap();

    // The fold is part of the base now and visible under any snapshot.
    assert_eq!(
        scan(&output, &MvccSnapshot::empty()).await,
        vec![(1, 100), (2, 20)]
    );
    assert_eq!(output.count_rows().await.unwrap(), 2);
}

#[tokio::test]
async fn test_compaction_merges_multiple_inputs() {
    let tempdir = TempDir::new().unwrap();
    let old: Arc<dyn Rowset> =
        Arc::new(build_kv_rowset(tempdir.path().join("rs_old"), &[(1, 1), (5, 5)]).await);
    let new: Arc<dyn Rowset> =
        Arc::new(build_kv_rowset(tempdir.path().join("rs_new"), &[(3, 3), (5, 50)]).await);

    let output = compact_rowsets(
        &[old, new],
        &MvccSnapshot::all_committed(),
        tempdir.path().join("rs_out"),
        ColumnBuilderOptions::default_for_test(),
        Cache::new(2333),
        2,
        IOBackend::default(),
    )
    .await
    .unwrap();

    // Sorted by key; the newest input wins the duplicate key.
    assert_eq!(
        scan(&output, &MvccSnapshot::empty()).await,
        vec![(1, 1), (3, 3), (5, 50)]
    );
}

#[tokio::test]
async fn test_delete_and_recover() {
    // S6: delete is rename-then-unlink, and the sweep finishes a crashed
    // delete.
    let tempdir = TempDir::new().unwrap();
    let dir = tempdir.path().join("rs");
    let rowset = build_kv_rowset(&dir, &[(1, 10)]).await;
    rowset.delete().await.unwrap();
    assert!(!dir.exists());
    assert!(!tempdir.path().join("rs.deleting").exists());

    // Crash injected between rename and unlink: only the marked
    // directory remains, and the startup sweep completes the delete.
    let dir2 = tempdir.path().join("rs2");
    build_kv_rowset(&dir2, &[(1, 10)]).await;
    tokio::fs::rename(&dir2, tempdir.path().join("rs2.deleting"))
        .await
        .unwrap();
    sweep_transient_dirs(tempdir.path()).await.unwrap();
    assert!(!dir2.exists());
    assert!(!tempdir.path().join("rs2.deleting").exists());
}

#[tokio::test]
async fn test_rename_rowset() {
    let tempdir = TempDir::new().unwrap();
    let dir = tempdir.path().join("rs");
    let rowset = build_kv_rowset(&dir, &[(1, 10)]).await;

    let new_dir = tempdir.path().join("rs_renamed");
    rowset.rename(&new_dir).await.unwrap();
    assert!(!dir.exists());
    assert!(new_dir.exists());

    // Delta flushes land in the renamed directory.
    rowset.mutate_row(2, &key(1), &set_v(11)).await.unwrap();
    rowset.flush_deltas().await.unwrap();
    assert!(new_dir.join("delta_0").exists());
}

#[tokio::test]
async fn test_empty_rowset() {
    let tempdir = TempDir::new().unwrap();
    let rowset = build_kv_rowset(tempdir.path().join("rs"), &[]).await;
    assert_eq!(rowset.count_rows().await.unwrap(), 0);
    assert_eq!(scan(&rowset, &MvccSnapshot::all_committed()).await, vec![]);

    let schema = rowset.schema().clone();
    let key_values = key(1);
    let probe = KeyProbe::new(&schema, &key_values).unwrap();
    assert!(!rowset.check_row_present(&probe).await.unwrap());
}

#[tokio::test]
async fn test_bloom_backed_presence_over_many_keys() {
    // Every written key answers present; row count coherence across the
    // column files is checked by open.
    let tempdir = TempDir::new().unwrap();
    let rows = (0..2000u32).map(|k| (k * 2, k)).collect_vec();
    let rowset = build_kv_rowset(tempdir.path().join("rs"), &rows).await;
    assert_eq!(rowset.count_rows().await.unwrap(), 2000);

    // Even keys were written, odd keys were not; a bloom false positive
    // on an odd key is overruled by the key index.
    let schema = rowset.schema().clone();
    for k in (0..4000u32).step_by(401).chain([1, 3999, 3998]) {
        let key_values = key(k);
        let probe = KeyProbe::new(&schema, &key_values).unwrap();
        assert_eq!(
            rowset.check_row_present(&probe).await.unwrap(),
            k % 2 == 0,
            "presence mismatch for key {}",
            k
        );
    }
}

#[tokio::test]
async fn test_projection_excludes_columns() {
    let tempdir = TempDir::new().unwrap();
    let rowset = build_kv_rowset(tempdir.path().join("rs"), &[(1, 10), (2, 20)]).await;
    rowset.mutate_row(3, &key(2), &set_v(99)).await.unwrap();

    // Project only the value column; the delta still applies to it.
    let mut iter = rowset
        .new_row_iterator(vec![1usize].into(), &MvccSnapshot::from_committed([3]))
        .await
        .unwrap();
    let rows = iter.collect_rows().await.unwrap();
    assert_eq!(
        rows,
        vec![vec![Value::UInt32(10)], vec![Value::UInt32(99)]]
    );
}

#[tokio::test]
async fn test_debug_dump_lists_rows_and_deltas() {
    let tempdir = TempDir::new().unwrap();
    let rowset = build_kv_rowset(tempdir.path().join("rs"), &[(1, 10), (2, 20)]).await;
    rowset.mutate_row(5, &key(2), &set_v(99)).await.unwrap();

    let lines = rowset.debug_dump().await.unwrap();
    assert!(lines[0].starts_with("DiskRowset("));
    assert_eq!(lines.len(), 3);
    assert!(lines[2].contains("@5"));
}
