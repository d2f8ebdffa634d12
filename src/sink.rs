//! Destinations for join output.
//!
//! Workers hand finished rows to a [`RowSink`] in batches. Sinks are shared
//! by all workers of a join, so implementations must be `Sync`.
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::Result;
use crate::tuple::{Relation, Tuple};

pub trait RowSink: Sync {
    /// Accepts a batch of rows produced by `worker`.
    fn write_rows(&self, worker: usize, rows: Vec<Tuple>) -> Result<()>;
}

/// Keeps one private buffer per worker and merges them after the join.
///
/// Worker `i` only ever locks buffer `i`, so the locks are uncontended.
#[derive(Debug)]
pub struct CollectSink {
    buffers: Vec<Mutex<Vec<Tuple>>>,
}

impl CollectSink {
    /// At least one buffer is always allocated, so no rows are ever lost.
    pub fn new(workers: usize) -> Self {
        Self {
            buffers: (0..workers.max(1)).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    /// Concatenates the worker buffers in worker order.
    pub fn into_rows(self) -> Vec<Tuple> {
        let total = self.buffers.iter().map(|b| b.lock().len()).sum();
        let mut rows = Vec::with_capacity(total);
        for buffer in self.buffers {
            rows.append(&mut buffer.into_inner());
        }
        rows
    }

    pub fn into_relation(self, arity: usize) -> Relation {
        Relation::from_parts(arity, self.into_rows())
    }
}

impl RowSink for CollectSink {
    fn write_rows(&self, worker: usize, mut rows: Vec<Tuple>) -> Result<()> {
        // Sinks may be shared by a different number of workers than they were
        // sized for, fold extra workers onto the existing buffers.
        self.buffers[worker % self.buffers.len()].lock().append(&mut rows);
        Ok(())
    }
}

/// Writes rows as delimited text, no header. One writer owns the output and
/// every batch is written while holding it, so rows never interleave.
pub struct CsvSink<W: Write + Send> {
    writer: Mutex<csv::Writer<W>>,
    rows: AtomicUsize,
}

impl<W: Write + Send> CsvSink<W> {
    pub fn new(out: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(out);
        Self {
            writer: Mutex::new(writer),
            rows: AtomicUsize::new(0),
        }
    }

    pub fn rows_written(&self) -> usize {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn flush(&self) -> Result<()> {
        self.writer.lock().flush()?;
        Ok(())
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .into_inner()
            .map_err(|e| e.into_error().into())
    }
}

impl<W: Write + Send> RowSink for CsvSink<W> {
    fn write_rows(&self, _worker: usize, rows: Vec<Tuple>) -> Result<()> {
        let mut writer = self.writer.lock();
        for row in &rows {
            writer.write_record(row.to_strings())?;
        }
        self.rows.fetch_add(rows.len(), Ordering::Relaxed);
        Ok(())
    }
}

/// Drops rows and only counts them.
#[derive(Debug, Default)]
pub struct CountingSink {
    rows: AtomicUsize,
}

impl CountingSink {
    pub fn count(&self) -> usize {
        self.rows.load(Ordering::Relaxed)
    }
}

impl RowSink for CountingSink {
    fn write_rows(&self, _worker: usize, rows: Vec<Tuple>) -> Result<()> {
        self.rows.fetch_add(rows.len(), Ordering::Relaxed);
        Ok(())
    }
}
