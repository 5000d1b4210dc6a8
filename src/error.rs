use thiserror::Error;

use crate::task::TaskName;

/// Errors raised by the partitioning, scheduling, and transport layers.
/// Configuration errors are not recoverable; callers are expected to report
/// them and abort.
///
#[derive(Debug, Error)]
pub enum Error {
    #[error("the number of workers must be positive")]
    NonPositiveWorkerCount,

    #[error("weight vector has {found} entries but the box array has {expected} boxes")]
    WeightLengthMismatch { expected: usize, found: usize },

    #[error("box {index} is assigned to rank {rank}, outside of [0, {nprocs})")]
    RankOutOfRange {
        index: usize,
        rank: usize,
        nprocs: usize,
    },

    #[error("{nboxes} boxes cannot fit on {nprocs} ranks holding at most {nmax} each")]
    BoxCapacity {
        nboxes: usize,
        nprocs: usize,
        nmax: usize,
    },

    #[error("layout has {boxes} boxes but {owners} owners")]
    LayoutMismatch { boxes: usize, owners: usize },

    #[error("task name of dimension {found} used where dimension {expected} is required")]
    TaskNameDimension { expected: usize, found: usize },

    #[error("task names have between 1 and 4 components, got {0}")]
    TaskNameArity(usize),

    #[error("box index {0} does not fit in a task name")]
    BoxIndexOverflow(usize),

    #[error("a task named {0} is already in the graph")]
    DuplicateTask(TaskName),

    #[error("the default distribution strategy was already initialized")]
    AlreadyInitialized,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("could not decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("buffer holds {found} bytes but the region needs {expected}")]
    BufferLength { expected: usize, found: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid distribution checkpoint: {0}")]
    Checkpoint(String),

    #[error("task {0} panicked while running")]
    TaskPanicked(TaskName),

    #[error("no result was produced for box {0}")]
    MissingResult(usize),

    #[error("rank {rank} stalled with {} pending tasks: {pending:?}", pending.len())]
    Stalled { rank: usize, pending: Vec<TaskName> },
}

pub type Result<T> = std::result::Result<T, Error>;
