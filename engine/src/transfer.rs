//! Transfer phase: a fixed pool of download workers draining the manifest.
//!
//! Each worker owns its own session end to end. The only shared state is the
//! FIFO work queue, the outcome channel and the progress counter. `run`
//! returns only once every manifest unit has an outcome.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{DownloadError, EngineError};
use crate::model::{FileState, Manifest, TransferUnit, UnitOutcome};
use crate::progress::{BackupEvent, EventSink, ProgressCounter, ProgressSink};
use crate::session::{Connector, RemoteSession};

type WorkItem = (usize, TransferUnit);

/// Owns the open local destination of one unit and writes chunks into it.
///
/// Whatever was written stays on disk if the transfer fails.
pub struct ChunkSink {
    file: File,
    written: u64,
}

impl ChunkSink {
    /// Create (or truncate) `path`, creating its parent directory first.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(ChunkSink {
            file: File::create(path)?,
            written: 0,
        })
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk)?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

/// Result of the transfer phase.
#[derive(Debug, Clone, Default)]
pub struct TransferReport {
    /// One outcome per manifest unit, in manifest order
    pub outcomes: Vec<UnitOutcome>,
    /// Bytes actually written across all workers
    pub bytes_written: u64,
    /// Workers started
    pub workers: usize,
    /// Workers whose own connection attempt failed
    pub worker_connect_failures: usize,
    pub elapsed: Duration,
}

impl TransferReport {
    pub fn done_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.state == FileState::Done).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.state == FileState::Failed).count()
    }

    pub fn failures(&self) -> Vec<DownloadError> {
        self.outcomes
            .iter()
            .filter(|o| o.state == FileState::Failed)
            .map(|o| DownloadError {
                path: o.unit.remote_path.clone(),
                cause: o.error.clone().unwrap_or_else(|| "unknown error".to_string()),
            })
            .collect()
    }
}

/// Drives the worker pool over a finished manifest.
pub struct TransferCoordinator<'a> {
    connector: &'a dyn Connector,
    workers: usize,
    events: EventSink,
    progress: Arc<ProgressCounter>,
}

impl<'a> TransferCoordinator<'a> {
    /// `workers` is clamped to at least one.
    pub fn new(connector: &'a dyn Connector, workers: usize) -> Self {
        TransferCoordinator {
            connector,
            workers: workers.max(1),
            events: EventSink::disabled(),
            progress: Arc::new(ProgressCounter::new()),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Shared byte counter, readable while `run` is in progress.
    pub fn progress(&self) -> Arc<ProgressCounter> {
        Arc::clone(&self.progress)
    }

    /// Download every unit of `manifest`, blocking until each one is either
    /// done or failed.
    pub fn run(&self, manifest: Manifest) -> Result<TransferReport, EngineError> {
        let started = Instant::now();
        let total = manifest.len();
        let total_bytes = manifest.total_bytes();
        if total == 0 {
            return Ok(TransferReport::default());
        }

        let (work_tx, work_rx) = unbounded::<WorkItem>();
        for item in manifest.into_units().into_iter().enumerate() {
            // The receiver lives in this frame, so the queue cannot be disconnected.
            let _ = work_tx.send(item);
        }
        drop(work_tx);

        let pool = self.workers.min(total);
        let (outcome_tx, outcome_rx) = unbounded::<UnitOutcome>();
        let connect_failures = AtomicUsize::new(0);

        info!(files = total, bytes = total_bytes, workers = pool, "starting transfer");
        self.events.emit(BackupEvent::TransferStarted {
            files: total,
            total_bytes,
            workers: pool,
        });

        let started_workers = thread::scope(|scope| -> Result<usize, EngineError> {
            let mut spawned = 0;
            let mut last_error = None;
            for worker in 0..pool {
                let queue = work_rx.clone();
                let outcomes = outcome_tx.clone();
                let connect_failures = &connect_failures;
                let spawn = thread::Builder::new()
                    .name(format!("download-{}", worker))
                    .spawn_scoped(scope, move || {
                        if !self.run_worker(worker, queue, outcomes) {
                            connect_failures.fetch_add(1, Ordering::Relaxed);
                        }
                    });
                match spawn {
                    Ok(_) => spawned += 1,
                    Err(e) => {
                        warn!(worker, "failed to start download worker: {}", e);
                        last_error = Some(e);
                    }
                }
            }
            match (spawned, last_error) {
                (0, Some(e)) => Err(EngineError::WorkerSpawn(e)),
                _ => Ok(spawned),
            }
        })?;
        drop(outcome_tx);

        // Every worker has exited. Anything still queued had nobody to fetch it.
        let mut outcomes: Vec<UnitOutcome> = outcome_rx.try_iter().collect();
        while let Ok((index, unit)) = work_rx.try_recv() {
            outcomes.push(self.failed(index, unit, 0, "no download worker was available".to_string()));
        }
        outcomes.sort_by_key(|o| o.index);
        debug_assert_eq!(outcomes.len(), total);

        let report = TransferReport {
            outcomes,
            bytes_written: self.progress.total(),
            workers: started_workers,
            worker_connect_failures: connect_failures.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
        };
        info!(
            done = report.done_count(),
            failed = report.failed_count(),
            bytes = report.bytes_written,
            "transfer finished"
        );
        Ok(report)
    }

    /// Returns false if the worker never got a connection.
    fn run_worker(&self, worker: usize, queue: Receiver<WorkItem>, outcomes: Sender<UnitOutcome>) -> bool {
        let mut session = match self.connector.connect() {
            Ok(session) => session,
            Err(e) => {
                warn!(worker, "download worker could not connect: {}", e);
                self.events.emit(BackupEvent::WorkerConnectFailed {
                    worker,
                    cause: e.to_string(),
                });
                // The failed worker accounts for exactly one unit, recorded as failed.
                if let Ok((index, unit)) = queue.try_recv() {
                    let cause = format!("worker connection failed: {}", e);
                    let _ = outcomes.send(self.failed(index, unit, 0, cause));
                }
                return false;
            }
        };

        while let Ok((index, unit)) = queue.try_recv() {
            let outcome = self.download(session.as_mut(), self.progress.as_ref(), index, unit);
            let _ = outcomes.send(outcome);
        }
        session.close();
        true
    }

    fn download(
        &self,
        session: &mut dyn RemoteSession,
        progress: &dyn ProgressSink,
        index: usize,
        unit: TransferUnit,
    ) -> UnitOutcome {
        debug!(path = %unit.remote_path, "downloading");

        let mut sink = match ChunkSink::create(&unit.local_path) {
            Ok(sink) => sink,
            Err(e) => {
                let cause = format!("{}: {}", unit.local_path.display(), e);
                return self.failed(index, unit, 0, cause);
            }
        };

        let result = session.retrieve(&unit.remote_path, &mut |chunk: &[u8]| -> io::Result<()> {
            sink.write_chunk(chunk)?;
            let bytes = chunk.len() as u64;
            progress.add(bytes);
            self.events.emit(BackupEvent::DownloadProgress { bytes });
            Ok(())
        });
        let written = sink.written();
        drop(sink);

        match result {
            Ok(_) => {
                self.events.emit(BackupEvent::FileCompleted {
                    path: unit.remote_path.clone(),
                    bytes: written,
                });
                UnitOutcome {
                    index,
                    unit,
                    state: FileState::Done,
                    bytes_written: written,
                    error: None,
                }
            }
            Err(e) => self.failed(index, unit, written, e.to_string()),
        }
    }

    fn failed(&self, index: usize, unit: TransferUnit, bytes_written: u64, cause: String) -> UnitOutcome {
        warn!(path = %unit.remote_path, "download failed: {}", cause);
        self.events.emit(BackupEvent::FileFailed {
            path: unit.remote_path.clone(),
            cause: cause.clone(),
        });
        UnitOutcome {
            index,
            unit,
            state: FileState::Failed,
            bytes_written,
            error: Some(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::discover;
    use crate::testing::{MockConnector, MockTree};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn sample_tree() -> MockTree {
        MockTree::new()
            .file("/site/index.html", b"<html>hello world</html>")
            .file("/site/css/main.css", b"body { color: red; }")
            .file("/site/img/logo.png", &[7u8; 100])
            .file("/site/img/empty.gif", b"")
            .file("/site/js/app/bundle.js", &[42u8; 1000])
    }

    fn plan(connector: &MockConnector, local: &Path) -> Manifest {
        let mut session = connector.session();
        let mut manifest = Manifest::new();
        let errors = discover(&mut session, "/site", &local.join("site"), &mut manifest, &EventSink::disabled());
        assert!(errors.is_empty());
        manifest
    }

    fn read_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut out = BTreeMap::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir).expect("read_dir failed") {
                let path = entry.expect("bad entry").path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let rel = path.strip_prefix(root).expect("outside root").to_path_buf();
                    out.insert(rel, fs::read(&path).expect("read failed"));
                }
            }
        }
        out
    }

    #[test]
    fn test_bytes_written_match_listed_sizes() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let connector = MockConnector::new(sample_tree());
        let manifest = plan(&connector, temp_dir.path());
        let expected_total = manifest.total_bytes();

        let coordinator = TransferCoordinator::new(&connector, 4);
        let report = coordinator.run(manifest).expect("transfer should run");

        assert_eq!(report.failed_count(), 0);
        assert_eq!(report.done_count(), 5);
        assert_eq!(report.bytes_written, expected_total);
        assert_eq!(coordinator.progress().total(), expected_total);
        for outcome in &report.outcomes {
            assert_eq!(outcome.bytes_written, outcome.unit.size_bytes);
            let on_disk = fs::metadata(&outcome.unit.local_path).expect("missing file").len();
            assert_eq!(on_disk, outcome.unit.size_bytes);
        }
        let indices: Vec<_> = report.outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pool_size_does_not_change_result() {
        let serial_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let parallel_dir = tempfile::tempdir().expect("Failed to create temp dir");

        let serial = MockConnector::new(sample_tree());
        let manifest = plan(&serial, serial_dir.path());
        TransferCoordinator::new(&serial, 1).run(manifest).expect("serial run");

        let parallel = MockConnector::new(sample_tree());
        let manifest = plan(&parallel, parallel_dir.path());
        TransferCoordinator::new(&parallel, 15).run(manifest).expect("parallel run");

        let a = read_tree(serial_dir.path());
        let b = read_tree(parallel_dir.path());
        assert_eq!(a.len(), 5);
        assert_eq!(a, b);
    }

    #[test]
    fn test_pool_never_exceeds_manifest() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let connector = MockConnector::new(sample_tree());
        let manifest = plan(&connector, temp_dir.path());

        let report = TransferCoordinator::new(&connector, 15).run(manifest).expect("run");

        assert_eq!(report.workers, 5);
        // One discovery session plus one per worker, all released
        assert_eq!(connector.opened(), 6);
        assert_eq!(connector.closed(), 6);
    }

    #[test]
    fn test_failed_download_is_contained_and_partial_file_kept() {
        let tree = sample_tree().broken_file("/site/js/app/bundle.js");
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let connector = MockConnector::new(tree);
        let manifest = plan(&connector, temp_dir.path());
        let (events, rx) = EventSink::channel();

        let report = TransferCoordinator::new(&connector, 3)
            .with_events(events)
            .run(manifest)
            .expect("run");

        assert_eq!(report.done_count(), 4);
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, "/site/js/app/bundle.js");

        // First chunk was written before the connection broke
        let partial = temp_dir.path().join("site/js/app/bundle.js");
        assert!(partial.exists());
        assert!(fs::metadata(&partial).expect("metadata").len() < 1000);

        let failed_events = rx
            .try_iter()
            .filter(|e| matches!(e, BackupEvent::FileFailed { .. }))
            .count();
        assert_eq!(failed_events, 1);
    }

    #[test]
    fn test_worker_connect_failure_does_not_hang() {
        let mut tree = MockTree::new();
        for i in 0..40 {
            tree = tree.file(&format!("/bulk/file-{:02}.dat", i), format!("payload {}", i).as_bytes());
        }
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let connector = MockConnector::new(tree)
            .refusing_first(1)
            .with_connect_delay(Duration::from_millis(50));
        let mut session = connector.session();
        let mut manifest = Manifest::new();
        discover(&mut session, "/bulk", &temp_dir.path().join("bulk"), &mut manifest, &EventSink::disabled());
        drop(session);
        assert_eq!(manifest.len(), 40);

        let report = TransferCoordinator::new(&connector, 2).run(manifest).expect("run");

        assert_eq!(report.outcomes.len(), 40);
        assert_eq!(report.worker_connect_failures, 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.done_count(), 39);
        let failure = &report.failures()[0];
        assert!(failure.cause.contains("worker connection failed"));
        // The failed unit was never written
        let failed = report.outcomes.iter().find(|o| o.state == FileState::Failed).expect("failed unit");
        assert!(!failed.unit.local_path.exists());
    }

    #[test]
    fn test_all_workers_refused_marks_every_unit_failed() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let connector = MockConnector::new(sample_tree());
        let manifest = plan(&connector, temp_dir.path());

        let connector = MockConnector::new(sample_tree()).refusing_first(usize::MAX);
        let report = TransferCoordinator::new(&connector, 2).run(manifest).expect("run");

        assert_eq!(report.outcomes.len(), 5);
        assert_eq!(report.failed_count(), 5);
        assert_eq!(report.worker_connect_failures, 2);
        assert_eq!(report.bytes_written, 0);
    }

    #[test]
    fn test_local_write_error_is_reported() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        // A regular file where the parent directory should be
        let blocker = temp_dir.path().join("blocked");
        fs::write(&blocker, b"x").expect("write blocker");
        let manifest = Manifest::from(vec![TransferUnit::new("/site/index.html", blocker.join("index.html"), 24)]);
        let connector = MockConnector::new(sample_tree());

        let report = TransferCoordinator::new(&connector, 1).run(manifest).expect("run");

        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.bytes_written, 0);
    }

    #[test]
    fn test_empty_manifest_starts_no_workers() {
        let connector = MockConnector::new(MockTree::new());
        let report = TransferCoordinator::new(&connector, 15).run(Manifest::new()).expect("run");
        assert!(report.outcomes.is_empty());
        assert_eq!(connector.opened(), 0);
    }

    #[test]
    fn test_progress_events_sum_to_bytes_written() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let connector = MockConnector::new(sample_tree());
        let manifest = plan(&connector, temp_dir.path());
        let (events, rx) = EventSink::channel();

        let report = TransferCoordinator::new(&connector, 4)
            .with_events(events)
            .run(manifest)
            .expect("run");

        let streamed: u64 = rx
            .try_iter()
            .filter_map(|e| match e {
                BackupEvent::DownloadProgress { bytes } => Some(bytes),
                _ => None,
            })
            .sum();
        assert_eq!(streamed, report.bytes_written);
    }
}
