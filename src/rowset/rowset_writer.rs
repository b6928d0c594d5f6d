// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::rowset_builder::{EncodedRowset, RowsetBuilder};
use super::{path_of_bloom, path_of_column, TMP_ROWSET_SUFFIX};
use crate::array::DataChunk;
use crate::error::{StorageResult, TracedStorageError};
use crate::options::ColumnBuilderOptions;
use crate::schema::Schema;
use crate::types::{DataType, Value};

/// Builds one new rowset directory from an ordered stream of row chunks.
///
/// The writer stages everything under `<dir>.tmp` and renames it to
/// `<dir>` on [`finish`](RowsetWriter::finish), so a crash mid-write
/// leaves only a transient directory for the startup sweep. The writer
/// never cleans up after an error itself.
pub struct RowsetWriter {
    /// Final directory of the rowset.
    dir: PathBuf,

    /// Staging directory, `<dir>.tmp`.
    tmp_dir: PathBuf,

    schema: Arc<Schema>,
    builder: Option<RowsetBuilder>,
    finished: bool,
}

impl RowsetWriter {
    /// Create the staging directory and the in-memory column builders.
    /// Fails with `InvalidArgument` if the target already exists.
    pub async fn open(
        dir: impl AsRef<Path>,
        schema: Arc<Schema>,
        options: ColumnBuilderOptions,
    ) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        if tokio::fs::try_exists(&dir).await? {
            return Err(TracedStorageError::invalid_argument(format!(
                "rowset directory {} already exists",
                dir.display()
            )));
        }
        let mut tmp_dir = dir.clone().into_os_string();
        tmp_dir.push(TMP_ROWSET_SUFFIX);
        let tmp_dir = PathBuf::from(tmp_dir);
        tokio::fs::create_dir(&tmp_dir).await?;

        Ok(Self {
            dir,
            tmp_dir,
            builder: Some(RowsetBuilder::new(schema.clone(), options)),
            schema,
            finished: false,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Append a chunk of rows. Rowids are assigned in arrival order;
    /// callers deliver rows in ascending encoded-key order when they
    /// intend the base to be sorted.
    pub fn append_block(&mut self, chunk: DataChunk) -> StorageResult<()> {
        assert!(!self.finished, "append after finish");
        self.builder.as_mut().unwrap().append(chunk)
    }

    /// Append a single row.
    pub fn write_row(&mut self, row: &[Value]) -> StorageResult<()> {
        let datatypes = self
            .schema
            .columns()
            .iter()
            .map(|column| column.datatype())
            .collect::<Vec<DataType>>();
        self.append_block(DataChunk::from_rows(std::slice::from_ref(&row.to_vec()), &datatypes))
    }

    pub fn written_count(&self) -> u32 {
        self.builder.as_ref().unwrap().row_count()
    }

    /// Write one file of the staging directory and force it to disk. The
    /// content arrives as a single prebuilt buffer, so one `write_all` is
    /// all the I/O there is.
    async fn persist(&self, name: PathBuf, content: &[u8]) -> StorageResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&name)
            .await?;
        file.write_all(content).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Finalize every column file, then the bloom file, and publish the
    /// directory under its final name. Must be called exactly once.
    pub async fn finish(mut self) -> StorageResult<()> {
        assert!(!self.finished, "finish called twice");
        self.finished = true;
        let rowset: EncodedRowset = self.builder.take().unwrap().finish();

        for (idx, column) in rowset.columns.iter().enumerate() {
            self.persist(path_of_column(&self.tmp_dir, idx), &column.data)
                .await?;
        }
        self.persist(path_of_bloom(&self.tmp_dir), &rowset.bloom).await?;
        File::open(&self.tmp_dir).await?.sync_data().await?;

        tokio::fs::rename(&self.tmp_dir, &self.dir).await?;
        if let Some(parent) = self.dir.parent() {
            File::open(parent).await?.sync_data().await?;
        }
        info!(
            "wrote rowset of {} rows to {}",
            rowset.size,
            self.dir.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;
    use crate::schema::ColumnDesc;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(
            vec![
                ColumnDesc::new("k", DataType::UInt32),
                ColumnDesc::new("v", DataType::UInt32),
            ],
            1,
        ))
    }

    #[tokio::test]
    async fn test_rowset_write() {
        let tempdir = tempfile::tempdir().unwrap();
        let dir = tempdir.path().join("rs_0");

        let mut writer =
            RowsetWriter::open(&dir, schema(), ColumnBuilderOptions::default_for_test())
                .await
                .unwrap();
        let rows = (0..1000u32)
            .map(|i| vec![Value::UInt32(i), Value::UInt32(i * 2)])
            .collect_vec();
        writer
            .append_block(DataChunk::from_rows(
                &rows,
                &[DataType::UInt32, DataType::UInt32],
            ))
            .unwrap();
        assert_eq!(writer.written_count(), 1000);
        writer.finish().await.unwrap();

        assert!(dir.join("col_0").exists());
        assert!(dir.join("col_1").exists());
        assert!(dir.join("bloom").exists());
        assert!(!tempdir.path().join("rs_0.tmp").exists());
    }

    #[tokio::test]
    async fn test_open_rejects_existing_dir() {
        let tempdir = tempfile::tempdir().unwrap();
        let dir = tempdir.path().join("rs_0");
        tokio::fs::create_dir(&dir).await.unwrap();
        assert!(
            RowsetWriter::open(&dir, schema(), ColumnBuilderOptions::default_for_test())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_unfinished_writer_leaves_tmp() {
        let tempdir = tempfile::tempdir().unwrap();
        let dir = tempdir.path().join("rs_0");
        let mut writer =
            RowsetWriter::open(&dir, schema(), ColumnBuilderOptions::default_for_test())
                .await
                .unwrap();
        writer
            .write_row(&[Value::UInt32(1), Value::UInt32(2)])
            .unwrap();
        drop(writer);
        assert!(tempdir.path().join("rs_0.tmp").exists());
        assert!(!dir.exists());
    }
}
