use std::time::Duration;

use thiserror::Error;

use crate::grouped::GroupIndex;

/// Errors surfaced to callers of the epoch manager (spec.md §7, §4.1).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EpochError {
    #[error("rotation rate-limited, {remaining:?} remaining")]
    RateLimited { remaining: Duration },

    #[error("rotation requested without a validator-set change")]
    NoValidatorChange,

    #[error("invalid validator set: {0}")]
    InvalidValidatorSet(String),

    #[error("epoch {0} not found in history")]
    EpochNotFound(u64),

    #[error("keygen failed: {0}")]
    KeygenFailure(String),
}

/// Errors surfaced by the grouped threshold manager (spec.md §7, §4.2).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupedError {
    #[error(transparent)]
    Epoch(#[from] EpochError),

    #[error("validator has no group assignment")]
    InvalidGroupAssignment,

    #[error("insufficient groups signed: observed {observed}, required {required}")]
    InsufficientGroups { observed: usize, required: usize },

    #[error("operation cancelled")]
    Cancelled,
}

/// A single group's failure within a [`GroupedError::InsufficientGroups`]
/// batch, kept around for operator diagnostics even though the public API
/// collapses the outcome to a bool or a count (spec.md §4.2 failure
/// semantics: "a group that fails ... returns an error collected into a
/// batch").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFailure {
    pub group: GroupIndex,
    pub reason: String,
}

/// Errors surfaced by the bundle pipeline (spec.md §7, §4.4).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BundleError {
    #[error(transparent)]
    Epoch(#[from] EpochError),

    #[error(transparent)]
    Grouped(#[from] GroupedError),

    #[error("bundle is empty, nothing to sign")]
    EmptyBundle,
}

/// Errors surfaced by the consensus core and the engine façade (spec.md §7,
/// §4.5, §4.6).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine is not running")]
    NotRunning,

    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error("buffer full for chain: {0}")]
    BufferFull(String),

    #[error(transparent)]
    Epoch(#[from] EpochError),

    #[error(transparent)]
    Grouped(#[from] GroupedError),

    #[error(transparent)]
    Bundle(#[from] BundleError),
}
