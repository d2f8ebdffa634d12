//! Ring worker state machine.
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            ▼                              │
//!   ──► Receiving ──(hops < N)──► Processing ──► Forwarding
//!            │
//!        (hops == N)
//!            ▼
//!        Draining ──► Done
//! ```
//!
//! Only Receiving and Forwarding wait on a slot. The other transitions are
//! also reachable one token at a time through `RingWorker::handle`.
use tracing::{debug, trace};

use super::RingControl;
use super::handoff::{HandoffError, Slot};
use super::token::Token;
use crate::error::{JoinError, Result};
use crate::index::HashIndex;
use crate::sink::RowSink;
use crate::tuple::Relation;

/// Row counts produced by one worker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub matched_rows: usize,
    pub padded_rows: usize,
}

enum WorkerState {
    Receiving,
    Processing(Token),
    Forwarding(Token),
    Draining(Token),
    Done,
}

pub(crate) struct RingWorker<'a> {
    id: usize,
    ring_size: usize,
    /// Tokens processed and forwarded so far.
    hops: usize,
    index: HashIndex,
    /// Arity of the whole build relation, the local shard may be empty.
    build_arity: usize,
    inbound: &'a Slot<Token>,
    outbound: &'a Slot<Token>,
    control: &'a RingControl,
    sink: &'a dyn RowSink,
    stats: WorkerStats,
}

impl<'a> RingWorker<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: usize,
        ring_size: usize,
        build_shard: &Relation,
        build_arity: usize,
        inbound: &'a Slot<Token>,
        outbound: &'a Slot<Token>,
        control: &'a RingControl,
        sink: &'a dyn RowSink,
    ) -> Self {
        Self {
            id,
            ring_size,
            hops: 0,
            index: HashIndex::build(build_shard),
            build_arity,
            inbound,
            outbound,
            control,
            sink,
            stats: WorkerStats::default(),
        }
    }

    fn predecessor(&self) -> usize {
        (self.id + self.ring_size - 1) % self.ring_size
    }

    fn successor(&self) -> usize {
        (self.id + 1) % self.ring_size
    }

    #[cfg(test)]
    pub(crate) fn stats(&self) -> WorkerStats {
        self.stats
    }

    pub(crate) fn run(mut self) -> Result<WorkerStats> {
        debug!(worker = self.id, build_tuples = self.index.num_tuples(), "ring worker started");

        let mut state = WorkerState::Receiving;
        loop {
            state = match state {
                WorkerState::Receiving => {
                    let token = self.receive()?;
                    self.dispatch(token)
                }
                WorkerState::Forwarding(token) => {
                    self.forward(token)?;
                    WorkerState::Receiving
                }
                WorkerState::Done => {
                    debug!(worker = self.id, stats = ?self.stats, "ring worker done");
                    return Ok(self.stats);
                }
                state => self.step(state)?,
            };
        }
    }

    /// Processes or drains one received token without touching the slots.
    /// Returns the token to forward, or `None` once this worker's own token
    /// came back and was drained.
    pub(crate) fn handle(&mut self, token: Token) -> Result<Option<Token>> {
        let state = self.dispatch(token);
        match self.step(state)? {
            WorkerState::Forwarding(token) => Ok(Some(token)),
            _ => Ok(None),
        }
    }

    fn dispatch(&self, token: Token) -> WorkerState {
        if self.hops == self.ring_size {
            WorkerState::Draining(token)
        } else {
            WorkerState::Processing(token)
        }
    }

    /// Runs the transitions that do not wait on a slot.
    fn step(&mut self, state: WorkerState) -> Result<WorkerState> {
        let next = match state {
            WorkerState::Processing(token) => {
                let mut token = self.process(token)?;
                self.hops += 1;
                token.record_hop(self.id);
                WorkerState::Forwarding(token)
            }
            WorkerState::Draining(token) => {
                self.drain(token)?;
                WorkerState::Done
            }
            other => other,
        };
        Ok(next)
    }

    fn process(&mut self, mut token: Token) -> Result<Token> {
        let mut rows = Vec::new();
        let matched = token.process(&self.index, &mut rows);
        trace!(
            worker = self.id,
            origin = token.origin(),
            hop = self.hops,
            matched,
            dangling = token.dangling().len(),
            "processed token"
        );
        self.stats.matched_rows += matched;
        if !rows.is_empty() {
            self.sink.write_rows(self.id, rows)?;
        }
        Ok(token)
    }

    fn drain(&mut self, token: Token) -> Result<()> {
        self.check_returned(&token)?;
        let rows = token.drain(self.build_arity);
        debug!(worker = self.id, padded = rows.len(), "draining token");
        if !rows.is_empty() {
            self.stats.padded_rows += rows.len();
            self.sink.write_rows(self.id, rows)?;
        }
        Ok(())
    }

    fn receive(&self) -> Result<Token> {
        let from = self.predecessor();
        self.control.block(self.id, from);
        let token = self
            .inbound
            .take(self.control.timeout, &self.control.abort)
            .map_err(|e| self.handoff_error(e, from))?;
        self.control.unblock(self.id);
        Ok(token)
    }

    fn forward(&self, token: Token) -> Result<()> {
        let to = self.successor();
        self.control.block(self.id, to);
        self.outbound
            .put(token, self.control.timeout, &self.control.abort)
            .map_err(|e| self.handoff_error(e, to))?;
        self.control.unblock(self.id);
        Ok(())
    }

    /// A timeout blames the worker at the end of the waiting chain, not
    /// whichever neighbour happens to be waiting on it.
    fn handoff_error(&self, err: HandoffError, neighbour: usize) -> JoinError {
        match err {
            HandoffError::Aborted => JoinError::Aborted,
            HandoffError::TimedOut(waited) => JoinError::WorkerUnresponsive {
                worker: self.control.stalled_worker(neighbour),
                waited,
            },
        }
    }

    /// The token drained here must be our own, back after visiting every
    /// worker once in ring order starting with us.
    fn check_returned(&self, token: &Token) -> Result<()> {
        if token.origin() != self.id {
            return Err(JoinError::RingProtocol(format!(
                "worker {} received token from origin {} after {} hops",
                self.id,
                token.origin(),
                self.hops
            )));
        }
        let expected = (0..self.ring_size).map(|i| (self.id + i) % self.ring_size);
        if token.route().len() != self.ring_size || !token.route().iter().copied().eq(expected) {
            return Err(JoinError::RingProtocol(format!(
                "token {} returned with route {:?}",
                token.origin(),
                token.route()
            )));
        }
        Ok(())
    }
}
