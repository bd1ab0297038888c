use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors raised while partitioning items into batches.
///
/// Any of these aborts the whole run; no partial batch list is returned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BatchError {
    #[error("ERROR: {category} is not supported (item {id})")]
    UnrecognizedCategory { id: String, category: String },

    #[error("ERROR: Not all BAM files were added to tasks -> MISSING files: {missing:?}")]
    Reconciliation { missing: Vec<String> },

    #[error("ERROR: invalid batching policy: lower={lower}, upper={upper}")]
    InvalidPolicy { lower: f64, upper: f64 },

    #[error("ERROR: invalid size {size} for item {id}")]
    InvalidSize { id: String, size: f64 },
}

/// Errors raised while reading the config file or the input manifest.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ERROR: {path} file missing! ({source})")]
    Missing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ERROR: could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("ERROR: {key} not found in config!")]
    MissingKey { key: String },

    #[error("ERROR: malformed manifest line {line}: {reason}")]
    Manifest { line: usize, reason: String },

    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Errors raised by the draft task layer.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("ERROR: Unable to run! You already have {active} active tasks. Please try later!")]
    ActiveLimit { active: usize },

    #[error("ERROR: Task {name} was not started! Task state is DRAFT!")]
    NotStarted { name: String },

    #[error("ERROR: Task was not started! Error happened: {reason}")]
    Dispatch { reason: String },

    #[error("ERROR: could not access task ledger {path}: {source}")]
    Ledger {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ERROR: could not parse task ledger {path}: {source}")]
    LedgerParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("ERROR: task ledger {path} holds task id {id} more than once")]
    DuplicateId { path: PathBuf, id: String },

    #[error("ERROR: could not serialize task ledger: {0}")]
    LedgerWrite(#[from] toml::ser::Error),
}
