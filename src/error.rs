//! Error taxonomy for the join engine.
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("worker count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),

    #[error("co-located join needs matching shard counts, left has {left} and right has {right}")]
    PartitionMismatch { left: usize, right: usize },

    #[error("relation arity must be at least 1 (the join key), got {0}")]
    InvalidArity(usize),

    #[error("row {row} has {found} fields, expected {expected}")]
    ArityMismatch {
        expected: usize,
        found: usize,
        row: usize,
    },

    #[error("malformed join key {value:?} on line {line}")]
    MalformedKey { line: u64, value: String },

    #[error("unsupported join type: {0}")]
    UnsupportedJoinType(String),

    #[error("unknown join strategy: {0}")]
    UnknownStrategy(String),

    /// A neighbour in the ring did not hand a token over (or take one) within
    /// the liveness timeout.
    #[error("worker {worker} unresponsive for {waited:?}")]
    WorkerUnresponsive { worker: usize, waited: Duration },

    #[error("worker {worker} panicked: {message}")]
    WorkerPanicked { worker: usize, message: String },

    #[error("ring protocol violated: {0}")]
    RingProtocol(String),

    /// Another worker failed first and the join was torn down.
    #[error("join aborted")]
    Aborted,

    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("failed to install log subscriber: {0}")]
    Logging(#[from] tracing::subscriber::SetGlobalDefaultError),
}

impl JoinError {
    /// Errors that are a consequence of some other failure rather than its
    /// cause.
    pub fn is_secondary(&self) -> bool {
        matches!(self, JoinError::Aborted)
    }
}

pub type Result<T, E = JoinError> = std::result::Result<T, E>;

/// Best effort extraction of a panic payload message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
