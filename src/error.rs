//! Error types for the zero-shot training program.
//!
//! Every error here is fatal: configuration and data problems abort before any
//! training resources are allocated, checkpoint problems abort the run.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown model variant '{0}', expected one of: iap, dap, ours, devise")]
    UnknownModelVariant(String),

    #[error("checkpoint file ({0}) doesn't exist")]
    MissingCheckpoint(PathBuf),

    #[error("cannot write to save directory {path}: {source}")]
    SaveDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: &'static str, message: String },
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{path}:{line}: {message}")]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("invalid attribute taxonomy: {0}")]
    Taxonomy(String),

    #[error("split '{0}' has no labels")]
    EmptySplit(String),

    #[error("image not found: {0}")]
    MissingImage(PathBuf),
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("checkpoint encoding: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checkpoint payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("recorder failed: {0}")]
    Recorder(String),
}

pub type Result<T> = std::result::Result<T, Error>;
