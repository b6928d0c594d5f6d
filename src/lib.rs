// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

//! Silt is an embeddable columnar rowset storage engine.
//!
//! A rowset is the minimum managing unit of a column-oriented table store:
//! a content-addressed directory holding an immutable columnar base image
//! of a contiguous range of rows, plus a mutable delta track recording the
//! point updates and deletes made after the base was frozen. Deltas are
//! applied at read time against an MVCC snapshot of committed transactions.
//!
//! For example, a rowset of a three-column table with a one-column key
//! produces the following directory structure:
//!
//! ```plain
//! rs_42          rowset directory
//! |- col_0       data for the key column, with block index and key index
//! |- col_1       data for the second column, with block index
//! |- col_2       data for the third column, with block index
//! |- bloom       split-block bloom filter over encoded keys
//! |- delta_0     first flushed delta file
//! \- delta_1     second flushed delta file
//! ```
//!
//! Data flushed to the directory is immutable; only new `delta_<k>` files
//! are ever added. While a rowset directory is being written it is named
//! `<dir>.tmp`, and while it is being deleted it is renamed to
//! `<dir>.deleting`; both transient names are swept by
//! [`sweep_transient_dirs`] on startup.
//!
//! Reads enter at [`DiskRowset::new_row_iterator`], which layers the delta
//! track over the base columns and yields [`StorageChunk`]s with a
//! visibility bitmap. Writes enter at [`DiskRowset::mutate_row`], which
//! resolves the key to a row ordinal through the base's key index and
//! records the change in the [`DeltaTracker`]. During a flush or
//! compaction a [`DuplicatingRowset`] temporarily stands in for the
//! rowsets being replaced, fanning mutations to both the old and the new
//! sets until the swap is committed.

// public modules and structures
mod chunk;
mod error;
mod mvcc;
mod options;
mod rowset;
mod schema;
mod types;

pub use chunk::*;
pub use error::*;
pub use mvcc::*;
pub use options::*;
pub use rowset::*;
pub use schema::*;
pub use types::*;

// internal modules and structures
mod array;
mod block;
mod bloom;
mod checksum;
mod column;
mod encode;
mod index;
mod index_builder;
mod keycode;

pub use array::{ArrayBuilderImpl, ArrayImpl, DataChunk};
pub use block::{Block, BlockCacheKey};
pub use bloom::{BloomFilterSizing, BloomKeyProbe};
pub use checksum::ChecksumType;

#[cfg(test)]
mod tests;
