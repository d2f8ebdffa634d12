//! Entry point tying the strategies together.
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use tracing::info;

use crate::colocated::ColocatedJoin;
use crate::error::{JoinError, Result};
use crate::partition::Partitioning;
use crate::ring::RingJoin;
use crate::sink::{CollectSink, RowSink};
use crate::tuple::Relation;

/// Row counts of a finished join.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JoinSummary {
    /// Rows combining a probe tuple with a build tuple.
    pub matched_rows: usize,
    /// Rows for probe tuples that matched nothing.
    pub padded_rows: usize,
}

impl JoinSummary {
    pub fn total_rows(&self) -> usize {
        self.matched_rows + self.padded_rows
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Hash partition both sides, join shard pairs independently.
    Colocated,
    /// Circulate probe shards past every build shard.
    Ring,
}

impl Strategy {
    /// How this strategy splits its inputs.
    pub fn partitioning(self) -> Partitioning {
        match self {
            Strategy::Colocated => Partitioning::Hash,
            Strategy::Ring => Partitioning::RoundRobin,
        }
    }
}

impl FromStr for Strategy {
    type Err = JoinError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "colocated" | "co-located" | "redistribution" | "roja" => Ok(Strategy::Colocated),
            "ring" | "pipeline" | "soja" => Ok(Strategy::Ring),
            other => Err(JoinError::UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Colocated => write!(f, "colocated"),
            Strategy::Ring => write!(f, "ring"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinConfig {
    pub workers: usize,
    pub strategy: Strategy,
    /// Longest a ring worker waits on a neighbour before giving up.
    pub handoff_timeout: Duration,
}

impl JoinConfig {
    pub const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(workers: usize, strategy: Strategy) -> Self {
        Self {
            workers,
            strategy,
            handoff_timeout: Self::DEFAULT_HANDOFF_TIMEOUT,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_handoff_timeout(mut self, timeout: Duration) -> Self {
        self.handoff_timeout = timeout;
        self
    }
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self::new(num_cpus::get(), Strategy::Ring)
    }
}

/// Distributed left outer join of two relations on the first field.
#[derive(Debug, Clone)]
pub struct JoinEngine {
    config: JoinConfig,
}

impl JoinEngine {
    pub fn new(config: JoinConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    /// Runs the join and returns every output row. Rows are grouped by the
    /// worker that produced them.
    pub fn collect(&self, left: &Relation, right: &Relation) -> Result<Relation> {
        let sink = CollectSink::new(self.config.workers);
        self.stream(left, right, &sink)?;
        Ok(sink.into_relation(left.arity() + right.arity() - 1))
    }

    /// Runs the join, handing rows to `sink` as they are produced.
    pub fn stream(&self, left: &Relation, right: &Relation, sink: &dyn RowSink) -> Result<JoinSummary> {
        let JoinConfig {
            workers,
            strategy,
            handoff_timeout,
        } = self.config;
        if workers == 0 {
            return Err(JoinError::InvalidWorkerCount(workers));
        }

        let start = Instant::now();
        let partitioning = strategy.partitioning();
        let left_shards = partitioning.apply(left, workers)?;
        let right_shards = partitioning.apply(right, workers)?;
        let summary = match strategy {
            Strategy::Colocated => {
                ColocatedJoin::try_new(workers)?.execute_partitioned(left_shards, right_shards, sink)?
            }
            Strategy::Ring => RingJoin::try_new(workers, handoff_timeout)?.execute_partitioned(
                left_shards,
                right_shards,
                right.arity(),
                sink,
            )?,
        };
        info!(
            %strategy,
            workers,
            left_tuples = left.len(),
            right_tuples = right.len(),
            matched = summary.matched_rows,
            padded = summary.padded_rows,
            elapsed = ?start.elapsed(),
            "join finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CountingSink;
    use crate::tuple::Tuple;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    fn left() -> Relation {
        Relation::from_rows(2, [(1, ["a"]), (2, ["b"]), (3, ["c"]), (4, ["d"])]).unwrap()
    }

    fn right() -> Relation {
        Relation::from_rows(2, [(2, ["X"]), (2, ["Y"]), (5, ["Z"])]).unwrap()
    }

    /// Nested loop left outer join.
    fn reference(left: &Relation, right: &Relation) -> Vec<Tuple> {
        let mut out = Vec::new();
        for l in left {
            let before = out.len();
            out.extend(right.iter().filter(|r| r.key() == l.key()).map(|r| l.concat(r)));
            if out.len() == before {
                out.push(l.pad_nulls(right.arity() - 1));
            }
        }
        out.sort();
        out
    }

    fn sorted(rel: Relation) -> Vec<Tuple> {
        let mut rows = rel.into_tuples();
        rows.sort();
        rows
    }

    fn random_relations(seed: u64) -> (Relation, Relation) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let key_space = rng.random_range(1..40i64);
        let left_len = rng.random_range(0..120usize);
        let right_len = rng.random_range(0..120usize);

        let left_rows: Vec<(i64, [String; 1])> = (0..left_len)
            .map(|i| (rng.random_range(-key_space..key_space), [format!("l{i}")]))
            .collect();
        // Right keys drawn from a wider range so some left keys miss.
        let mut right_rows: Vec<(i64, [String; 2])> = (0..right_len)
            .map(|i| {
                (
                    rng.random_range(0..2 * key_space),
                    [format!("r{i}"), format!("s{i}")],
                )
            })
            .collect();
        right_rows.shuffle(&mut rng);

        (
            Relation::from_rows(2, left_rows).unwrap(),
            Relation::from_rows(3, right_rows).unwrap(),
        )
    }

    #[test]
    fn parse_strategy() {
        assert_eq!("ROJA".parse::<Strategy>().unwrap(), Strategy::Colocated);
        assert_eq!("redistribution".parse::<Strategy>().unwrap(), Strategy::Colocated);
        assert_eq!("soja".parse::<Strategy>().unwrap(), Strategy::Ring);
        assert_eq!("pipeline".parse::<Strategy>().unwrap(), Strategy::Ring);
        assert!(matches!(
            "broadcast".parse::<Strategy>(),
            Err(JoinError::UnknownStrategy(s)) if s == "broadcast"
        ));
        assert_eq!(Strategy::Ring.to_string().parse::<Strategy>().unwrap(), Strategy::Ring);
        assert_eq!(Strategy::Colocated.partitioning(), Partitioning::Hash);
        assert_eq!(Strategy::Ring.partitioning(), Partitioning::RoundRobin);
    }

    #[test]
    fn config_defaults() {
        let config = JoinConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.strategy, Strategy::Ring);
        assert_eq!(config.handoff_timeout, Duration::from_secs(60));

        let config = config
            .with_workers(3)
            .with_strategy(Strategy::Colocated)
            .with_handoff_timeout(Duration::from_secs(5));
        assert_eq!(config.workers, 3);
        assert_eq!(config.strategy, Strategy::Colocated);
        assert_eq!(config.handoff_timeout, Duration::from_secs(5));
    }

    #[test]
    fn concrete_scenario_both_strategies() {
        let expected = reference(&left(), &right());
        assert_eq!(expected.len(), 5);
        for strategy in [Strategy::Colocated, Strategy::Ring] {
            for n in [1, 2, 4] {
                let engine = JoinEngine::new(JoinConfig::new(n, strategy));
                let out = engine.collect(&left(), &right()).unwrap();
                assert_eq!(out.arity(), 3);
                assert_eq!(sorted(out), expected, "{strategy} with {n} workers");
            }
        }
    }

    #[test]
    fn zero_workers_fail_fast() {
        for strategy in [Strategy::Colocated, Strategy::Ring] {
            let engine = JoinEngine::new(JoinConfig::new(0, strategy));
            assert!(matches!(
                engine.stream(&left(), &right(), &CountingSink::default()),
                Err(JoinError::InvalidWorkerCount(0))
            ));
        }
    }

    #[test]
    fn strategies_agree_with_nested_loop() {
        for seed in 0..24 {
            let (l, r) = random_relations(seed);
            let expected = reference(&l, &r);
            for strategy in [Strategy::Colocated, Strategy::Ring] {
                for n in [1, 3, 5] {
                    let engine = JoinEngine::new(JoinConfig::new(n, strategy));
                    let sink = CountingSink::default();
                    let summary = engine.stream(&l, &r, &sink).unwrap();
                    assert_eq!(summary.total_rows(), expected.len());
                    assert_eq!(sink.count(), expected.len());

                    let out = engine.collect(&l, &r).unwrap();
                    assert_eq!(sorted(out), expected, "seed {seed}, {strategy}, {n} workers");
                }
            }
        }
    }

    #[test]
    fn multiplicity_and_single_padding() {
        // Key 7 matches three build tuples, key 8 matches none.
        let l = Relation::from_rows(2, [(7, ["p"]), (8, ["q"])]).unwrap();
        let r = Relation::from_rows(2, [(7, ["x"]), (9, ["y"]), (7, ["z"]), (7, ["w"])]).unwrap();
        for strategy in [Strategy::Colocated, Strategy::Ring] {
            for n in [1, 2, 3, 4] {
                let engine = JoinEngine::new(JoinConfig::new(n, strategy));
                let out = engine.collect(&l, &r).unwrap();
                let sevens = out.iter().filter(|t| t.key() == 7).count();
                let eights: Vec<_> = out.iter().filter(|t| t.key() == 8).collect();
                assert_eq!(sevens, 3);
                assert!(out.iter().filter(|t| t.key() == 7).all(|t| !t.payload()[1].is_null()));
                assert_eq!(eights.len(), 1);
                assert!(eights[0].payload()[1].is_null());
            }
        }
    }

    #[test]
    fn empty_inputs() {
        let empty_left = Relation::empty(2).unwrap();
        let empty_right = Relation::empty(4).unwrap();
        for strategy in [Strategy::Colocated, Strategy::Ring] {
            let engine = JoinEngine::new(JoinConfig::new(3, strategy));
            assert!(engine.collect(&empty_left, &right()).unwrap().is_empty());

            let out = engine.collect(&left(), &empty_right).unwrap();
            assert_eq!(out.arity(), 5);
            assert_eq!(out.len(), 4);
            assert!(out.iter().all(|t| t.payload()[1..].iter().all(|f| f.is_null())));
        }
    }
}
