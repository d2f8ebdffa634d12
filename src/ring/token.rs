//! The unit of circulating state in the ring.
use crate::index::HashIndex;
use crate::tuple::{Relation, Tuple};

/// Positions of probe tuples that have not matched anything yet.
///
/// Starts full and only ever shrinks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DanglingSet {
    words: Vec<u64>,
    capacity: usize,
    remaining: usize,
}

impl DanglingSet {
    /// A set containing every index in `0..capacity`.
    pub fn full(capacity: usize) -> Self {
        let mut words = vec![u64::MAX; capacity.div_ceil(64)];
        // Clear the bits past `capacity` in the last word.
        let tail = capacity % 64;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        Self {
            words,
            capacity,
            remaining: capacity,
        }
    }

    #[inline]
    pub fn contains(&self, idx: usize) -> bool {
        idx < self.capacity && self.words[idx / 64] & (1 << (idx % 64)) != 0
    }

    /// Removes `idx`. Returns false if it was already gone.
    #[inline]
    pub fn remove(&mut self, idx: usize) -> bool {
        if !self.contains(idx) {
            return false;
        }
        self.words[idx / 64] &= !(1 << (idx % 64));
        self.remaining -= 1;
        true
    }

    pub fn len(&self) -> usize {
        self.remaining
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    /// Remaining indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(w * 64 + bit)
            })
        })
    }
}

/// A probe shard travelling around the ring.
///
/// Exactly one token exists per probe shard. It is moved from worker to
/// worker, so whoever holds it owns its dangling set.
#[derive(Debug)]
pub struct Token {
    origin: usize,
    shard: Relation,
    dangling: DanglingSet,
    /// Workers that processed this token, in order.
    route: Vec<usize>,
}

impl Token {
    pub fn new(origin: usize, shard: Relation) -> Self {
        let dangling = DanglingSet::full(shard.len());
        Self {
            origin,
            shard,
            dangling,
            route: Vec::new(),
        }
    }

    pub fn origin(&self) -> usize {
        self.origin
    }

    pub fn shard(&self) -> &Relation {
        &self.shard
    }

    pub fn dangling(&self) -> &DanglingSet {
        &self.dangling
    }

    pub fn route(&self) -> &[usize] {
        &self.route
    }

    pub fn hops(&self) -> usize {
        self.route.len()
    }

    /// Probes every tuple of the shard against `index`, pushing combined rows
    /// into `out`. Tuples that already matched on an earlier hop are probed
    /// again since the same key can appear in several build shards; only
    /// their padding is suppressed. Returns the number of rows pushed.
    pub fn process(&mut self, index: &HashIndex, out: &mut Vec<Tuple>) -> usize {
        let before = out.len();
        for (i, tuple) in self.shard.iter().enumerate() {
            if index.probe_with(tuple, |row| out.push(row)) {
                self.dangling.remove(i);
            }
        }
        out.len() - before
    }

    pub fn record_hop(&mut self, worker: usize) {
        self.route.push(worker);
    }

    /// Consumes the token, producing one null-padded row per tuple that
    /// never matched.
    pub fn drain(self, build_arity: usize) -> Vec<Tuple> {
        let nulls = build_arity.saturating_sub(1);
        self.dangling
            .iter()
            .filter_map(|i| self.shard.get(i))
            .map(|t| t.pad_nulls(nulls))
            .collect()
    }
}
