//! Error types for the backup engine.
//!
//! Only `ConnectError` on the initial connection and `EngineError` stop a run.
//! Everything below that level (`ScanError`, `ExploreError`, `DownloadError`)
//! is recovered where it happens and aggregated into the final report.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to open an authenticated session.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The server did not answer within the connect timeout
    #[error("connection to {host} timed out")]
    Timeout { host: String },

    /// The server rejected the login
    #[error("login rejected for user '{user}': {reason}")]
    AuthFailed { user: String, reason: String },

    /// Host could not be resolved or reached
    #[error("network unreachable for {host}: {reason}")]
    NetworkUnreachable { host: String, reason: String },

    /// The server replied with something unexpected during the handshake
    #[error("protocol error while connecting to {host}: {reason}")]
    Protocol { host: String, reason: String },
}

/// Failure of a single command on an open session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The server rejected the command or the data channel broke
    #[error("{0}")]
    Protocol(String),

    /// Writing the received data locally failed
    #[error("local I/O error: {0}")]
    Local(#[source] io::Error),
}

/// The top-level directory listing failed.
#[derive(Debug, Error)]
#[error("remote folder scan failed: {cause}")]
pub struct ScanError {
    pub cause: String,
}

/// One remote subtree could not be explored during discovery.
#[derive(Debug, Clone, Error)]
#[error("could not explore {path}: {cause}")]
pub struct ExploreError {
    pub path: String,
    pub cause: String,
}

/// One file could not be downloaded.
#[derive(Debug, Clone, Error)]
#[error("error downloading '{path}': {cause}")]
pub struct DownloadError {
    pub path: String,
    pub cause: String,
}

/// Credential store failures.
///
/// A wrong passphrase and a damaged vault both surface as the
/// same `DecryptFailed` condition.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("unable to decrypt credentials (wrong passphrase or corrupted vault)")]
    DecryptFailed,

    #[error("no stored credentials at {path}")]
    NotFound { path: PathBuf },

    #[error("credential store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("credential serialization failed: {0}")]
    Serialization(String),
}

/// Operator selection input that does not name available directories.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("empty selection")]
    Empty,

    #[error("'{0}' is not a number")]
    NotNumeric(String),

    #[error("{index} is out of range (1..={available})")]
    OutOfRange { index: usize, available: usize },
}

/// Configuration file problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Job-level errors that prevent a backup from being planned or run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The job was driven out of order (e.g. run before plan)
    #[error("invalid job state: expected {expected}, found {found}")]
    InvalidState { expected: String, found: String },

    /// Nothing was selected for backup
    #[error("no remote directories selected")]
    EmptySelection,

    /// The local backup root could not be created
    #[error("failed to create backup folder {path}: {source}")]
    BackupRootCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A download worker thread could not be started
    #[error("failed to start download worker: {0}")]
    WorkerSpawn(#[source] io::Error),
}
