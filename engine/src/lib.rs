//! # FTP Backup Engine - Remote Snapshot Library
//!
//! A headless engine that snapshots selected folders of an FTP server into a
//! timestamped local folder. Designed as the foundation for front-ends that
//! only render events and collect operator input.
//!
//! ## Overview
//!
//! The engine provides:
//! - Top-level folder listing and selection parsing
//! - Depth-first discovery of the selected trees into a flat manifest
//! - Parallel downloads over a pool of independent FTP sessions
//! - Per-file error isolation (a failed file never aborts the run)
//! - Progress reporting via an event channel (decoupled from UI technology)
//! - An encrypted credential vault
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{
//!     available_dirs, connect, create_job, plan_job, run_job, BackupConfig, Credentials,
//!     EventSink, FtpConnector, Selection,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::new("ftp.example.com", "backup", "secret");
//! let config = BackupConfig::default();
//! let events = EventSink::disabled();
//!
//! // List the folders on offer and pick some
//! let mut session = connect(&credentials)?;
//! let available = available_dirs(&mut session, &events);
//! let selection = Selection::parse("all", &available)?;
//!
//! // Create and plan the job (walk the remote tree)
//! let mut job = create_job(&config, &selection, &available, chrono::Local::now().naive_local())?;
//! plan_job(&mut job, &mut session, &events)?;
//! println!("Will download {} files", job.total_files);
//!
//! // Run the job (parallel download)
//! let report = run_job(&mut job, &FtpConnector::new(credentials), &events)?;
//! println!("{} done, {} failed", report.done_count(), report.failed_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (Credentials, TransferUnit, Manifest, states)
//! - **error**: Error types and handling
//! - **session** / **ftp**: Remote session abstraction and its FTP implementation
//! - **listing**: MLSD line parsing
//! - **discovery**: Folder listing and recursive tree walk
//! - **transfer**: Worker pool and per-file downloads
//! - **job**: Job orchestration (create, plan, run)
//! - **progress**: Event channel and byte counters
//! - **config**: Run settings
//! - **vault**: Credential storage

pub mod config;
pub mod discovery;
pub mod error;
pub mod ftp;
pub mod job;
pub mod listing;
pub mod model;
pub mod progress;
pub mod session;
pub mod transfer;
pub mod vault;

#[cfg(test)]
mod testing;

pub use config::{parse_worker_count, BackupConfig, WorkerCountWarning, DEFAULT_WORKERS};
pub use discovery::{available_dirs, discover, list_top_level_dirs};
pub use error::{
    ConfigError, ConnectError, DownloadError, EngineError, ExploreError, ScanError, SelectionError, SessionError,
    VaultError,
};
pub use ftp::{connect, FtpConnector, FtpSession};
pub use job::{backup_folder_name, create_job, plan_job, run_job, BackupJob, Selection};
pub use model::{Credentials, FileState, JobState, Manifest, RemoteEntry, TransferUnit, UnitOutcome};
pub use progress::{BackupEvent, EventSink, ProgressCounter, ProgressSink};
pub use session::{Connector, RemoteSession};
pub use transfer::{TransferCoordinator, TransferReport};
pub use vault::{CredentialVault, StorageMode};
