//! Job orchestration module.
//!
//! This module provides the backup lifecycle functions:
//! - Creating a job from the operator's folder selection
//! - Planning a job (discovering the remote tree into a manifest)
//! - Running a job (downloading the manifest with the worker pool)

use chrono::NaiveDateTime;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::info;
use uuid::Uuid;

use crate::config::BackupConfig;
use crate::discovery;
use crate::error::{EngineError, ExploreError, SelectionError};
use crate::model::{JobState, Manifest};
use crate::progress::{BackupEvent, EventSink};
use crate::session::{Connector, RemoteSession};
use crate::transfer::{TransferCoordinator, TransferReport};

/// Keyword selecting every available folder.
pub const ALL_KEYWORD: &str = "all";

const FULL_BACKUP_LABEL: &str = "full-backup";
const MULTIPLE_DIRS_LABEL: &str = "multiple-dirs";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Which top-level folders the operator chose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The operator asked for everything
    All,
    /// Folders picked by index, in the order given
    Dirs(Vec<String>),
}

impl Selection {
    /// Parse `all` or a comma-separated list of 1-based indices into `available`.
    pub fn parse(input: &str, available: &[String]) -> Result<Selection, SelectionError> {
        let input = input.trim();
        if input.eq_ignore_ascii_case(ALL_KEYWORD) {
            return Ok(Selection::All);
        }
        if input.is_empty() {
            return Err(SelectionError::Empty);
        }

        let mut dirs = Vec::new();
        for part in input.split(',') {
            let part = part.trim();
            let index: usize = part
                .parse()
                .map_err(|_| SelectionError::NotNumeric(part.to_string()))?;
            if index == 0 || index > available.len() {
                return Err(SelectionError::OutOfRange {
                    index,
                    available: available.len(),
                });
            }
            dirs.push(available[index - 1].clone());
        }
        Ok(Selection::Dirs(dirs))
    }

    /// The folder names this selection covers.
    pub fn resolve(&self, available: &[String]) -> Vec<String> {
        match self {
            Selection::All => available.to_vec(),
            Selection::Dirs(dirs) => dirs.clone(),
        }
    }

    /// Middle part of the backup folder name.
    pub fn scope_label(&self) -> String {
        match self {
            Selection::All => FULL_BACKUP_LABEL.to_string(),
            Selection::Dirs(dirs) if dirs.len() == 1 => dirs[0].clone(),
            Selection::Dirs(_) => MULTIPLE_DIRS_LABEL.to_string(),
        }
    }
}

/// `<prefix>_<scope-label>_<YYYY-MM-DD_HH-MM-SS>`
pub fn backup_folder_name(prefix: &str, selection: &Selection, timestamp: &NaiveDateTime) -> String {
    format!(
        "{}_{}_{}",
        prefix,
        selection.scope_label(),
        timestamp.format(TIMESTAMP_FORMAT)
    )
}

/// A single backup run: selected roots, where they go, and what was found.
#[derive(Debug)]
pub struct BackupJob {
    /// Unique identifier for this job
    pub id: Uuid,

    /// Selected top-level folder names (remote paths are `/<name>`)
    pub remote_roots: Vec<String>,

    /// Timestamped local folder receiving the snapshot
    pub backup_root: PathBuf,

    /// Download worker pool size
    pub workers: usize,

    pub state: JobState,

    /// Files to download; handed to the coordinator by `run_job`
    pub manifest: Manifest,

    /// Number of files found during planning
    pub total_files: usize,

    /// Sum of listed sizes found during planning
    pub total_bytes: u64,

    /// Subtrees abandoned during planning
    pub explore_errors: Vec<ExploreError>,

    pub created_at: SystemTime,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
}

/// Create a new backup job.
///
/// Resolves the selection against the available folders and names the
/// backup folder. Nothing is created on disk yet.
///
/// # Errors
/// Returns `EngineError::EmptySelection` if the selection covers no folder.
pub fn create_job(
    config: &BackupConfig,
    selection: &Selection,
    available: &[String],
    timestamp: NaiveDateTime,
) -> Result<BackupJob, EngineError> {
    let remote_roots = selection.resolve(available);
    if remote_roots.is_empty() {
        return Err(EngineError::EmptySelection);
    }

    let folder = backup_folder_name(&config.prefix, selection, &timestamp);

    Ok(BackupJob {
        id: Uuid::new_v4(),
        remote_roots,
        backup_root: config.output_dir.join(folder),
        workers: config.workers.max(1),
        state: JobState::Pending,
        manifest: Manifest::new(),
        total_files: 0,
        total_bytes: 0,
        explore_errors: Vec::new(),
        created_at: SystemTime::now(),
        start_time: None,
        end_time: None,
    })
}

/// Plan a job by discovering every selected root on `session`.
///
/// Creates the backup folder and the mirrored directory structure, fills
/// `job.manifest`, and records abandoned subtrees in `job.explore_errors`.
///
/// # Errors
/// Returns `EngineError` if the job is not Pending or the backup folder
/// cannot be created. Per-directory failures are not errors.
pub fn plan_job(job: &mut BackupJob, session: &mut dyn RemoteSession, events: &EventSink) -> Result<(), EngineError> {
    expect_state(job, JobState::Pending)?;

    fs::create_dir_all(&job.backup_root).map_err(|e| EngineError::BackupRootCreation {
        path: job.backup_root.clone(),
        source: e,
    })?;

    info!(roots = ?job.remote_roots, root = %job.backup_root.display(), "discovering remote tree");
    events.emit(BackupEvent::DiscoveryStarted {
        roots: job.remote_roots.clone(),
    });

    let mut manifest = Manifest::new();
    let mut errors = Vec::new();
    for name in &job.remote_roots {
        let remote = format!("/{}", name);
        let local = job.backup_root.join(name);
        errors.extend(discovery::discover(session, &remote, &local, &mut manifest, events));
    }

    job.total_files = manifest.len();
    job.total_bytes = manifest.total_bytes();
    job.manifest = manifest;
    job.explore_errors = errors;
    job.state = JobState::Planned;

    info!(files = job.total_files, bytes = job.total_bytes, "discovery complete");
    events.emit(BackupEvent::DiscoveryCompleted {
        files: job.total_files,
        total_bytes: job.total_bytes,
    });
    Ok(())
}

/// Run a planned job, downloading its manifest.
///
/// Transitions the job from Planned to Running to Completed. Per-file
/// failures are recorded in the returned report and never stop the job.
///
/// # Errors
/// Returns `EngineError` only for job-level issues (wrong state, no worker
/// thread could be started).
pub fn run_job(job: &mut BackupJob, connector: &dyn Connector, events: &EventSink) -> Result<TransferReport, EngineError> {
    expect_state(job, JobState::Planned)?;

    job.state = JobState::Running;
    job.start_time = Some(SystemTime::now());

    let manifest = std::mem::take(&mut job.manifest);
    let coordinator = TransferCoordinator::new(connector, job.workers).with_events(events.clone());
    let report = coordinator.run(manifest)?;

    job.state = JobState::Completed;
    job.end_time = Some(SystemTime::now());
    events.emit(BackupEvent::RunCompleted {
        backup_root: job.backup_root.clone(),
    });
    Ok(report)
}

fn expect_state(job: &BackupJob, expected: JobState) -> Result<(), EngineError> {
    if job.state != expected {
        return Err(EngineError::InvalidState {
            expected: expected.to_string(),
            found: job.state.to_string(),
        });
    }
    Ok(())
}
