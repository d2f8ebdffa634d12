//! Per-worker hash join primitive.
//!
//! A [`HashIndex`] groups the tuples of one shard by key. It is built once
//! and then only read, so a single index can be probed from several threads.
use std::fmt;
use std::str::FromStr;

use hashbrown::HashMap;

use crate::error::{JoinError, Result};
use crate::tuple::{Key, Relation, Tuple};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    /// Left join with the operands swapped.
    Right,
}

impl FromStr for JoinType {
    type Err = JoinError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inner" => Ok(JoinType::Inner),
            "left" => Ok(JoinType::Left),
            "right" => Ok(JoinType::Right),
            other => Err(JoinError::UnsupportedJoinType(other.to_string())),
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "inner"),
            JoinType::Left => write!(f, "left"),
            JoinType::Right => write!(f, "right"),
        }
    }
}

pub struct HashIndex {
    /// Build tuples, positions are referenced by `buckets`.
    tuples: Vec<Tuple>,
    /// Key to build tuple positions in insertion order.
    buckets: HashMap<Key, Vec<usize>>,
    arity: usize,
}

impl HashIndex {
    pub fn build(shard: &Relation) -> Self {
        let mut buckets: HashMap<Key, Vec<usize>> = HashMap::with_capacity(shard.len());
        for (pos, tuple) in shard.iter().enumerate() {
            buckets.entry(tuple.key()).or_default().push(pos);
        }
        Self {
            tuples: shard.tuples().to_vec(),
            buckets,
            arity: shard.arity(),
        }
    }

    /// Arity of the indexed (build side) tuples.
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn num_tuples(&self) -> usize {
        self.tuples.len()
    }

    pub fn num_keys(&self) -> usize {
        self.buckets.len()
    }

    /// Build tuples with `key`, in insertion order.
    pub fn matches(&self, key: Key) -> impl Iterator<Item = &Tuple> + '_ {
        self.buckets
            .get(&key)
            .into_iter()
            .flat_map(move |positions| positions.iter().map(move |&p| &self.tuples[p]))
    }

    /// Calls `callback` with every combined row for `probe`. Returns true if
    /// anything matched.
    #[inline]
    pub fn probe_with(&self, probe: &Tuple, mut callback: impl FnMut(Tuple)) -> bool {
        let Some(positions) = self.buckets.get(&probe.key()) else {
            return false;
        };
        for &p in positions {
            callback(probe.concat(&self.tuples[p]));
        }
        !positions.is_empty()
    }

    /// Combined rows `probe ++ build[1..]` for every build tuple sharing the
    /// key. Empty when nothing matches.
    pub fn probe(&self, probe: &Tuple) -> Vec<Tuple> {
        let mut out = Vec::new();
        self.probe_with(probe, |row| out.push(row));
        out
    }

    /// Joins `probe` against this index. Only inner and left joins are
    /// possible here since the build side is fixed.
    pub fn join(&self, probe: &Relation, join_type: JoinType) -> Result<Relation> {
        self.join_counted(probe, join_type).map(|(rows, _)| rows)
    }

    /// Like [`HashIndex::join`], also returning how many rows were null
    /// padded.
    pub fn join_counted(&self, probe: &Relation, join_type: JoinType) -> Result<(Relation, usize)> {
        let pad = match join_type {
            JoinType::Inner => false,
            JoinType::Left => true,
            JoinType::Right => {
                return Err(JoinError::UnsupportedJoinType(
                    "right join against a prebuilt index".to_string(),
                ));
            }
        };

        let mut out = Vec::with_capacity(probe.len());
        let mut padded = 0;
        for tuple in probe {
            let matched = self.probe_with(tuple, |row| out.push(row));
            if pad && !matched {
                out.push(tuple.pad_nulls(self.arity - 1));
                padded += 1;
            }
        }
        let rows = Relation::from_parts(probe.arity() + self.arity - 1, out);
        Ok((rows, padded))
    }
}

impl fmt::Debug for HashIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashIndex")
            .field("num_tuples", &self.tuples.len())
            .field("num_keys", &self.buckets.len())
            .field("arity", &self.arity)
            .finish()
    }
}

/// Hash join of two relations on one worker. For [`JoinType::Right`] the
/// operands are swapped and a left join is performed, so output rows start
/// with the `build` tuple.
pub fn local_outer_join(probe: &Relation, build: &Relation, join_type: JoinType) -> Result<Relation> {
    match join_type {
        JoinType::Right => HashIndex::build(probe).join(build, JoinType::Left),
        _ => HashIndex::build(build).join(probe, join_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn left() -> Relation {
        Relation::from_rows(2, [(1, ["a"]), (2, ["b"]), (3, ["c"]), (4, ["d"])]).unwrap()
    }

    fn right() -> Relation {
        Relation::from_rows(2, [(2, ["X"]), (2, ["Y"]), (5, ["Z"])]).unwrap()
    }

    fn strings(rel: &Relation) -> Vec<Vec<String>> {
        rel.iter().map(|t| t.to_strings()).collect()
    }

    #[test]
    fn probe_preserves_multiplicity_and_order() {
        let index = HashIndex::build(&right());
        assert_eq!(index.num_tuples(), 3);
        assert_eq!(index.num_keys(), 2);

        let probe = left().get(1).unwrap().clone();
        let rows = index.probe(&probe);
        assert_eq!(
            rows.iter().map(|t| t.to_strings()).collect::<Vec<_>>(),
            vec![vec!["2", "b", "X"], vec!["2", "b", "Y"]]
        );
    }

    #[test]
    fn probe_absent_key() {
        let index = HashIndex::build(&right());
        let probe = left().get(0).unwrap().clone();
        assert!(index.probe(&probe).is_empty());
        assert!(!index.probe_with(&probe, |_| panic!("no match expected")));
        assert_eq!(index.matches(1).count(), 0);
        assert_eq!(index.matches(2).count(), 2);
    }

    #[test]
    fn inner_join() {
        let out = local_outer_join(&left(), &right(), JoinType::Inner).unwrap();
        assert_eq!(out.arity(), 3);
        assert_eq!(strings(&out), vec![vec!["2", "b", "X"], vec!["2", "b", "Y"]]);
    }

    #[test]
    fn left_join_pads_once() {
        let out = local_outer_join(&left(), &right(), JoinType::Left).unwrap();
        assert_eq!(
            strings(&out),
            vec![
                vec!["1", "a", ""],
                vec!["2", "b", "X"],
                vec!["2", "b", "Y"],
                vec!["3", "c", ""],
                vec!["4", "d", ""],
            ]
        );
        assert!(out.get(0).unwrap().payload()[1].is_null());
    }

    #[test]
    fn right_join_swaps_operands() {
        let out = local_outer_join(&left(), &right(), JoinType::Right).unwrap();
        assert_eq!(
            strings(&out),
            vec![
                vec!["2", "X", "b"],
                vec!["2", "Y", "b"],
                vec!["5", "Z", ""],
            ]
        );
    }

    #[test]
    fn empty_build_side_pads_everything() {
        let build = Relation::empty(3).unwrap();
        let out = local_outer_join(&left(), &build, JoinType::Left).unwrap();
        assert_eq!(out.arity(), 4);
        assert_eq!(out.len(), 4);
        let (_, padded) = HashIndex::build(&build)
            .join_counted(&left(), JoinType::Left)
            .unwrap();
        assert_eq!(padded, 4);
        assert!(out.iter().all(|t| t.payload()[1].is_null() && t.payload()[2].is_null()));
    }

    #[test]
    fn positions_address_every_build_tuple() {
        // Enough tuples that positions exceed the range of a u16.
        let n = 70_000i64;
        let build = Relation::from_rows(2, (0..n).map(|k| (k % 1000, [format!("b{k}")]))).unwrap();
        let index = HashIndex::build(&build);
        assert_eq!(index.num_tuples(), n as usize);
        assert_eq!(index.num_keys(), 1000);
        for key in [0, 1, 499, 999] {
            let payloads: Vec<String> = index.matches(key).map(|t| t.payload()[0].to_string()).collect();
            let expected: Vec<String> = (0..n).filter(|k| k % 1000 == key).map(|k| format!("b{k}")).collect();
            assert_eq!(payloads, expected);
        }
    }

    #[test]
    fn prebuilt_index_rejects_right_join() {
        let index = HashIndex::build(&right());
        assert!(matches!(
            index.join(&left(), JoinType::Right),
            Err(JoinError::UnsupportedJoinType(_))
        ));
    }

    #[test]
    fn parse_join_type() {
        assert_eq!("LEFT".parse::<JoinType>().unwrap(), JoinType::Left);
        assert_eq!("inner".parse::<JoinType>().unwrap(), JoinType::Inner);
        assert!(matches!(
            "full".parse::<JoinType>(),
            Err(JoinError::UnsupportedJoinType(s)) if s == "full"
        ));
    }
}
