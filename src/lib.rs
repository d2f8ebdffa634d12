//! Distributed left outer equi-join of two relations on their first field.
//!
//! Two strategies are available through [`JoinEngine`]:
//!
//! - [`Strategy::Colocated`] hash partitions both relations so that shard `i`
//!   of each side holds the same keys, then joins every shard pair on its own.
//! - [`Strategy::Ring`] splits both sides round-robin, keeps one build shard
//!   per worker and circulates the probe shards around a ring of workers so
//!   each probe shard meets every build shard exactly once.
//!
//! Both produce the same multiset of rows: `probe ++ build[1..]` for every
//! matching pair, and `probe ++ NULL...` once for every probe tuple without a
//! match.
pub mod colocated;
pub mod csvio;
pub mod engine;
pub mod error;
pub mod index;
pub mod logging;
pub mod partition;
pub mod ring;
pub mod sink;
pub mod tuple;

pub use engine::{JoinConfig, JoinEngine, JoinSummary, Strategy};
pub use error::{JoinError, Result};
pub use index::{HashIndex, JoinType, local_outer_join};
pub use sink::{CollectSink, CountingSink, CsvSink, RowSink};
pub use tuple::{Field, Key, Relation, Tuple};
