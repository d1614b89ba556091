//! Error types for keyloom.

use thiserror::Error;

/// Errors that can occur when building or running a keyloom supervisor.
///
/// Only configuration and validation problems are fatal. Engine failures and
/// progress store I/O errors are absorbed by the worker loop (see
/// [`crate::engine`] and [`crate::progress`]).
#[derive(Debug, Error)]
pub enum KeyloomError {
    /// A keyspace bound could not be parsed as hexadecimal.
    #[error("invalid hex bound '{0}'")]
    InvalidHex(String),

    /// Keyspace bounds or block width are inconsistent.
    #[error("invalid keyspace: {0}")]
    InvalidKeyspace(String),

    /// Scheduler knobs are inconsistent with each other or with the keyspace.
    #[error("invalid scheduler knobs: {0}")]
    InvalidKnobs(String),

    /// No worker devices were configured.
    #[error("no worker devices configured")]
    NoDevices,

    /// More workers than blocks; some workers would own nothing.
    #[error("{workers} workers requested but the keyspace only has {blocks} blocks")]
    TooManyWorkers { workers: usize, blocks: String },

    /// The target filter string is empty.
    #[error("target prefix must not be empty")]
    EmptyTarget,

    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// I/O error outside the degradable paths (e.g. installing signal handlers).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker task panicked or was aborted.
    #[error("worker {0} terminated abnormally")]
    WorkerPanicked(usize),
}

/// Result type alias for keyloom operations.
pub type Result<T> = std::result::Result<T, KeyloomError>;
