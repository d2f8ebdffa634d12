//! Ring pipeline ("circulating") left outer join.
//!
//! Both relations are split round-robin into N shards. Worker `i` keeps build
//! shard `i` in a hash index for the whole join. Probe shard `i` is wrapped in
//! a [`Token`] and pre-loaded into worker `i`'s inbound slot. Every worker
//! repeatedly takes a token from its predecessor, probes it against its local
//! index, emits matches and passes it on to its successor. After N hops a
//! token is back at its origin, which emits null-padded rows for every tuple
//! that never matched and stops.
//!
//! Slots hold one token each, so a worker can never get more than one hop
//! ahead of its successor.
//!
//! Every wait on a slot is bounded by [`RingJoin::handoff_timeout`]. When a
//! worker fails (timeout, sink error, panic) the shared abort flag is raised,
//! every other worker bails out at its next wait, and the first failure is
//! returned.
pub mod handoff;
pub mod token;
pub mod worker;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::engine::JoinSummary;
use crate::error::{JoinError, Result, panic_message};
use crate::partition::round_robin_partition;
use crate::sink::RowSink;
use crate::tuple::Relation;
use handoff::Slot;
pub use token::{DanglingSet, Token};
use worker::RingWorker;
pub use worker::WorkerStats;

const NOT_BLOCKED: usize = usize::MAX;

/// State shared by all workers of one ring.
pub(crate) struct RingControl {
    pub(crate) abort: AtomicBool,
    pub(crate) timeout: Duration,
    /// Per worker, the neighbour it is currently waiting on in a hand-off.
    blocked_on: Vec<AtomicUsize>,
    failure: Mutex<Option<JoinError>>,
}

impl RingControl {
    pub(crate) fn new(workers: usize, timeout: Duration) -> Self {
        Self {
            abort: AtomicBool::new(false),
            timeout,
            blocked_on: (0..workers).map(|_| AtomicUsize::new(NOT_BLOCKED)).collect(),
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn block(&self, worker: usize, on: usize) {
        self.blocked_on[worker].store(on, Ordering::Release);
    }

    /// Only called after a successful hand-off. A worker that gave up stays
    /// marked so that later timeouts still see it as waiting.
    pub(crate) fn unblock(&self, worker: usize) {
        self.blocked_on[worker].store(NOT_BLOCKED, Ordering::Release);
    }

    /// Follows the chain of waiting workers starting at `neighbour` and
    /// returns the first one that is not itself waiting on someone.
    pub(crate) fn stalled_worker(&self, neighbour: usize) -> usize {
        let mut culprit = neighbour;
        for _ in 0..self.blocked_on.len() {
            match self.blocked_on[culprit].load(Ordering::Acquire) {
                NOT_BLOCKED => break,
                next => culprit = next,
            }
        }
        culprit
    }

    /// Records `err` if it is the first root failure and tells every worker
    /// to stop.
    fn fail(&self, worker: usize, err: JoinError) {
        if !err.is_secondary() {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                warn!(worker, error = %err, "ring worker failed, aborting join");
                *failure = Some(err);
            }
        }
        self.abort.store(true, Ordering::Release);
    }

    fn take_failure(&self) -> Option<JoinError> {
        self.failure.lock().take()
    }
}

#[derive(Debug, Clone)]
pub struct RingJoin {
    workers: usize,
    handoff_timeout: Duration,
}

impl RingJoin {
    pub fn try_new(workers: usize, handoff_timeout: Duration) -> Result<Self> {
        if workers == 0 {
            return Err(JoinError::InvalidWorkerCount(workers));
        }
        Ok(Self {
            workers,
            handoff_timeout,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn handoff_timeout(&self) -> Duration {
        self.handoff_timeout
    }

    /// Left outer joins `probe` with `build`, streaming rows into `sink`.
    pub fn execute(&self, probe: &Relation, build: &Relation, sink: &dyn RowSink) -> Result<JoinSummary> {
        let probe_shards = round_robin_partition(probe, self.workers)?;
        let build_shards = round_robin_partition(build, self.workers)?;
        self.execute_partitioned(probe_shards, build_shards, build.arity(), sink)
    }

    /// Runs the ring over already partitioned inputs. Both sides need exactly
    /// one shard per worker.
    pub fn execute_partitioned(
        &self,
        probe_shards: Vec<Relation>,
        build_shards: Vec<Relation>,
        build_arity: usize,
        sink: &dyn RowSink,
    ) -> Result<JoinSummary> {
        let n = self.workers;
        if probe_shards.len() != n || build_shards.len() != n {
            return Err(JoinError::PartitionMismatch {
                left: probe_shards.len(),
                right: build_shards.len(),
            });
        }
        if build_arity == 0 {
            return Err(JoinError::InvalidArity(build_arity));
        }

        let slots: Vec<Slot<Token>> = (0..n).map(|_| Slot::new()).collect();
        for (origin, shard) in probe_shards.into_iter().enumerate() {
            slots[origin].try_put(Token::new(origin, shard)).map_err(|_| {
                JoinError::RingProtocol(format!("slot {origin} occupied before start"))
            })?;
        }

        let control = RingControl::new(n, self.handoff_timeout);
        debug!(workers = n, timeout = ?self.handoff_timeout, "starting ring");

        let outcomes: Vec<Option<WorkerStats>> = thread::scope(|s| {
            let mut handles = Vec::with_capacity(n);
            for (id, shard) in build_shards.into_iter().enumerate() {
                let inbound = &slots[id];
                let outbound = &slots[(id + 1) % n];
                let control = &control;
                let spawned = thread::Builder::new()
                    .name(format!("ring_worker_{id}"))
                    .spawn_scoped(s, move || {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            RingWorker::new(id, n, &shard, build_arity, inbound, outbound, control, sink)
                                .run()
                        }));
                        match result {
                            Ok(Ok(stats)) => Some(stats),
                            Ok(Err(err)) => {
                                control.fail(id, err);
                                None
                            }
                            Err(payload) => {
                                let message = panic_message(payload.as_ref());
                                control.fail(id, JoinError::WorkerPanicked { worker: id, message });
                                None
                            }
                        }
                    });
                match spawned {
                    Ok(handle) => handles.push((id, handle)),
                    Err(err) => {
                        control.fail(id, err.into());
                        break;
                    }
                }
            }

            let mut outcomes: Vec<Option<WorkerStats>> = handles
                .into_iter()
                .map(|(id, handle)| {
                    handle.join().unwrap_or_else(|payload| {
                        let message = panic_message(payload.as_ref());
                        control.fail(id, JoinError::WorkerPanicked { worker: id, message });
                        None
                    })
                })
                .collect();
            // Workers that never spawned count as failed.
            outcomes.resize(n, None);
            outcomes
        });

        if let Some(err) = control.take_failure() {
            return Err(err);
        }

        let mut summary = JoinSummary::default();
        for stats in outcomes {
            let stats = stats.ok_or(JoinError::Aborted)?;
            summary.matched_rows += stats.matched_rows;
            summary.padded_rows += stats.padded_rows;
        }
        Ok(summary)
    }
}
