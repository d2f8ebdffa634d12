//! Splitting a relation into per-worker shards.
//!
//! Shards from one call are pairwise disjoint, their union is the input, and
//! every shard keeps the relative order of the tuples it received.
use crate::error::{JoinError, Result};
use crate::tuple::{Key, Relation, Tuple};

/// How a strategy wants its inputs split.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Partitioning {
    /// `key mod n`, matching keys land on the same shard index.
    Hash,
    /// `position mod n`, ignores keys.
    RoundRobin,
}

impl Partitioning {
    pub fn apply(self, relation: &Relation, n: usize) -> Result<Vec<Relation>> {
        match self {
            Partitioning::Hash => hash_partition(relation, n),
            Partitioning::RoundRobin => round_robin_partition(relation, n),
        }
    }
}

/// Bucket of `key` among `n` shards.
#[inline]
pub fn hash_bucket(key: Key, n: usize) -> usize {
    // rem_euclid keeps negative keys inside 0..n.
    key.rem_euclid(n as i64) as usize
}

pub fn hash_partition(relation: &Relation, n: usize) -> Result<Vec<Relation>> {
    hash_partition_by(relation, n, Tuple::key)
}

/// Hash partitions using a caller supplied key function. Both sides of a
/// co-located join must use the same `n` and `key_of`.
pub fn hash_partition_by<F>(relation: &Relation, n: usize, key_of: F) -> Result<Vec<Relation>>
where
    F: Fn(&Tuple) -> Key,
{
    scatter(relation, n, |_, tuple| hash_bucket(key_of(tuple), n))
}

pub fn round_robin_partition(relation: &Relation, n: usize) -> Result<Vec<Relation>> {
    scatter(relation, n, |pos, _| pos % n)
}

fn scatter<F>(relation: &Relation, n: usize, bucket_of: F) -> Result<Vec<Relation>>
where
    F: Fn(usize, &Tuple) -> usize,
{
    if n == 0 {
        return Err(JoinError::InvalidWorkerCount(n));
    }

    let per_shard = relation.len() / n + 1;
    let mut buckets: Vec<Vec<Tuple>> = (0..n).map(|_| Vec::with_capacity(per_shard)).collect();
    for (pos, tuple) in relation.iter().enumerate() {
        buckets[bucket_of(pos, tuple)].push(tuple.clone());
    }

    Ok(buckets
        .into_iter()
        .map(|tuples| Relation::from_parts(relation.arity(), tuples))
        .collect())
}
