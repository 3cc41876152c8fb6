use anyhow::{Context, Result};
use arrow::{datatypes::SchemaRef, record_batch::RecordBatch};
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::{basic::Compression, file::properties::WriterProperties};
use serde::Serialize;
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

use crate::common::{delete_if_exists, ensure_parent_dir, tmp_path_for};

/// A row kind that knows its Arrow schema and how to turn a slice of
/// buffered rows into one record batch.
pub trait TableRow: Sized {
    const TABLE: &'static str;

    fn schema() -> SchemaRef;

    fn to_record_batch(rows: &[Self], schema: SchemaRef) -> Result<RecordBatch>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub path: PathBuf,
    pub rows_written: u64,
    pub batches_flushed: u64,
    pub peak_buffered: usize,
}

/// Bounded-memory Parquet writer for one output table.
///
/// Rows accumulate in an ordered buffer that is converted and written as a
/// single row group once it reaches `capacity`, then cleared. The file is
/// written under `<name>.tmp` and only renamed into place by [`finish`], so
/// a reader never sees a file without a footer.
///
/// [`finish`]: BatchedTableWriter::finish
pub struct BatchedTableWriter<R: TableRow> {
    output_path: PathBuf,
    tmp_path: PathBuf,
    schema: SchemaRef,
    writer: ArrowWriter<File>,
    buffer: Vec<R>,
    capacity: usize,
    rows_written: u64,
    batches_flushed: u64,
    peak_buffered: usize,
}

impl<R: TableRow> BatchedTableWriter<R> {
    pub fn try_new(output_path: &Path, capacity: usize) -> Result<Self> {
        ensure_parent_dir(output_path)?;
        let tmp_path = tmp_path_for(output_path);
        let capacity = capacity.max(1);
        let schema = R::schema();

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_max_row_group_size(capacity)
            .build();

        let file = File::create(&tmp_path)
            .with_context(|| format!("Failed creating {}", tmp_path.display()))?;
        let writer = ArrowWriter::try_new(file, Arc::clone(&schema), Some(props))
            .with_context(|| format!("Failed creating Parquet ArrowWriter for {}", R::TABLE))?;

        Ok(Self {
            output_path: output_path.to_path_buf(),
            tmp_path,
            schema,
            writer,
            buffer: Vec::new(),
            capacity,
            rows_written: 0,
            batches_flushed: 0,
            peak_buffered: 0,
        })
    }

    pub fn append(&mut self, row: R) -> Result<()> {
        self.buffer.push(row);
        self.peak_buffered = self.peak_buffered.max(self.buffer.len());
        if self.buffer.len() >= self.capacity {
            self.flush()?;
        }
        Ok(())
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Writes the buffered rows as one row group and clears the buffer.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let batch = R::to_record_batch(&self.buffer, Arc::clone(&self.schema))
            .with_context(|| format!("Failed creating RecordBatch for {}", R::TABLE))?;
        self.writer
            .write(&batch)
            .with_context(|| format!("Failed writing Parquet RecordBatch for {}", R::TABLE))?;
        self.writer
            .flush()
            .with_context(|| format!("Failed flushing Parquet row group for {}", R::TABLE))?;

        self.rows_written += self.buffer.len() as u64;
        self.batches_flushed += 1;
        debug!(
            table = R::TABLE,
            rows = self.buffer.len(),
            total = self.rows_written,
            "flushed batch"
        );
        self.buffer.clear();
        Ok(())
    }

    /// Flushes the remaining partial batch, writes the footer and moves the
    /// file into place.
    pub fn finish(mut self) -> Result<TableSummary> {
        self.flush()?;
        self.writer
            .close()
            .with_context(|| format!("Failed closing Parquet writer for {}", R::TABLE))?;
        fs::rename(&self.tmp_path, &self.output_path).with_context(|| {
            format!(
                "Failed moving temp parquet {} to {}",
                self.tmp_path.display(),
                self.output_path.display()
            )
        })?;
        Ok(TableSummary {
            path: self.output_path,
            rows_written: self.rows_written,
            batches_flushed: self.batches_flushed,
            peak_buffered: self.peak_buffered,
        })
    }

    /// Drops the temp file without touching any existing output.
    pub fn abort(self) -> Result<()> {
        let _ = self.writer.close();
        delete_if_exists(&self.tmp_path)
    }
}
