//! Progress reporting.
//!
//! The engine never writes to the console. Discovery and the download
//! workers emit `BackupEvent`s into a single-consumer channel; whoever holds
//! the receiving end (the CLI reporter thread, a test) renders them.
//!
//! Byte progress is additionally aggregated in a `ProgressCounter` that many
//! workers add to concurrently and a reporter can poll.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::TransferUnit;

/// Semantic events emitted by the engine.
#[derive(Debug, Clone)]
pub enum BackupEvent {
    /// Top-level folder scan started
    ScanStarted,
    /// A top-level folder is available for selection
    DirectoryFound { name: String },
    /// The top-level scan failed; no folders are available
    ScanFailed { cause: String },
    /// Recursive discovery of the selected roots started
    DiscoveryStarted { roots: Vec<String> },
    /// A file was added to the manifest
    FileDiscovered { unit: TransferUnit },
    /// A subtree was abandoned
    ExploreFailed { path: String, cause: String },
    /// Discovery finished
    DiscoveryCompleted { files: usize, total_bytes: u64 },
    /// The worker pool started
    TransferStarted { files: usize, total_bytes: u64, workers: usize },
    /// Bytes were written by some worker
    DownloadProgress { bytes: u64 },
    /// A unit was fully downloaded
    FileCompleted { path: String, bytes: u64 },
    /// A unit failed
    FileFailed { path: String, cause: String },
    /// A worker could not open its own connection
    WorkerConnectFailed { worker: usize, cause: String },
    /// Every unit has been accounted for
    RunCompleted { backup_root: PathBuf },
}

/// Sending half of the event channel.
///
/// Cloned into every worker. A sink without a receiver (or whose receiver
/// was dropped) silently discards events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<Sender<BackupEvent>>,
}

impl EventSink {
    /// Create a connected sink and the single receiver for it.
    pub fn channel() -> (EventSink, Receiver<BackupEvent>) {
        let (tx, rx) = unbounded();
        (EventSink { sender: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub fn disabled() -> EventSink {
        EventSink { sender: None }
    }

    pub fn emit(&self, event: BackupEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

/// Anything that can accumulate byte progress from many threads.
pub trait ProgressSink: Send + Sync {
    fn add(&self, bytes: u64);
}

/// Shared, monotonically increasing total of bytes written across workers.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    bytes: AtomicU64,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn total(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl ProgressSink for ProgressCounter {
    fn add(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }
}
