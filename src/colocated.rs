//! Redistribution ("co-located") left outer join.
//!
//! Both inputs are hash partitioned with the same shard count, so tuples with
//! equal keys sit in shards with the same index on both sides. Shard pair `i`
//! is then joined on its own by one task of a fixed size thread pool.
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};

use crate::engine::JoinSummary;
use crate::error::{JoinError, Result, panic_message};
use crate::index::{HashIndex, JoinType};
use crate::partition::hash_partition;
use crate::sink::RowSink;
use crate::tuple::Relation;

#[derive(Clone)]
pub struct ColocatedJoin {
    pool: Arc<ThreadPool>,
    workers: usize,
}

impl fmt::Debug for ColocatedJoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColocatedJoin")
            .field("num_threads", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

/// Output of one shard pair.
struct TaskOutput {
    rows: Relation,
    padded: usize,
}

impl ColocatedJoin {
    pub fn try_new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(JoinError::InvalidWorkerCount(workers));
        }
        let pool = ThreadPoolBuilder::new()
            .thread_name(|idx| format!("colocated_join_{idx}"))
            .num_threads(workers)
            .build()?;
        Ok(Self {
            pool: Arc::new(pool),
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Left outer joins `probe` with `build`. Rows reach `sink` only once
    /// every shard pair has been joined successfully.
    pub fn execute(&self, probe: &Relation, build: &Relation, sink: &dyn RowSink) -> Result<JoinSummary> {
        let probe_shards = hash_partition(probe, self.workers)?;
        let build_shards = hash_partition(build, self.workers)?;
        self.execute_partitioned(probe_shards, build_shards, sink)
    }

    /// Joins shard `i` of `probe_shards` with shard `i` of `build_shards`.
    /// Both must be hash partitioned with the same shard count and key.
    pub fn execute_partitioned(
        &self,
        probe_shards: Vec<Relation>,
        build_shards: Vec<Relation>,
        sink: &dyn RowSink,
    ) -> Result<JoinSummary> {
        self.execute_with(probe_shards, build_shards, sink, join_shard)
    }

    fn execute_with<F>(
        &self,
        probe_shards: Vec<Relation>,
        build_shards: Vec<Relation>,
        sink: &dyn RowSink,
        join: F,
    ) -> Result<JoinSummary>
    where
        F: Fn(usize, &Relation, &Relation) -> Result<TaskOutput> + Sync,
    {
        if probe_shards.len() != build_shards.len() {
            return Err(JoinError::PartitionMismatch {
                left: probe_shards.len(),
                right: build_shards.len(),
            });
        }

        debug!(shards = probe_shards.len(), "dispatching co-located join tasks");

        let outputs: Vec<TaskOutput> = self.pool.install(|| {
            probe_shards
                .par_iter()
                .zip(build_shards.par_iter())
                .enumerate()
                .map(|(task, (probe, build))| run_task(task, || join(task, probe, build)))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut summary = JoinSummary::default();
        for (task, output) in outputs.into_iter().enumerate() {
            summary.padded_rows += output.padded;
            summary.matched_rows += output.rows.len() - output.padded;
            if !output.rows.is_empty() {
                sink.write_rows(task, output.rows.into_tuples())?;
            }
        }
        Ok(summary)
    }
}

fn join_shard(_task: usize, probe: &Relation, build: &Relation) -> Result<TaskOutput> {
    let index = HashIndex::build(build);
    let (rows, padded) = index.join_counted(probe, JoinType::Left)?;
    Ok(TaskOutput { rows, padded })
}

/// Runs one shard pair, turning a panic into [`JoinError::WorkerPanicked`].
fn run_task(task: usize, join: impl FnOnce() -> Result<TaskOutput>) -> Result<TaskOutput> {
    match panic::catch_unwind(AssertUnwindSafe(join)) {
        Ok(output) => output,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(task, %message, "co-located join task panicked");
            Err(JoinError::WorkerPanicked {
                worker: task,
                message,
            })
        }
    }
}
