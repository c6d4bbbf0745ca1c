//! Remote tree discovery.
//!
//! This module provides the two read-only passes over the remote server:
//! - Enumerating the top-level folders offered for selection
//! - Walking the selected roots depth-first into a flat manifest
//!
//! Both run on a single session; the control connection cannot serve
//! concurrent commands.

use std::fs;
use std::path::{Component, Path};
use tracing::{debug, warn};

use crate::error::{ExploreError, ScanError};
use crate::model::{EntryKind, Manifest, TransferUnit};
use crate::progress::{BackupEvent, EventSink};
use crate::session::RemoteSession;

/// List the directories of the login directory, in listing order.
///
/// Self/parent pseudo-entries and non-directories are skipped.
pub fn list_top_level_dirs(session: &mut dyn RemoteSession) -> Result<Vec<String>, ScanError> {
    let entries = session
        .list_entries()
        .map_err(|e| ScanError { cause: e.to_string() })?;

    Ok(entries
        .into_iter()
        .filter(|e| e.kind == EntryKind::Directory && !e.is_pseudo() && is_plain_name(&e.name))
        .map(|e| e.name)
        .collect())
}

/// Like `list_top_level_dirs`, but a failed scan yields an empty list.
///
/// An empty result means "nothing available"; the failure is logged and
/// emitted as `ScanFailed`.
pub fn available_dirs(session: &mut dyn RemoteSession, events: &EventSink) -> Vec<String> {
    events.emit(BackupEvent::ScanStarted);
    match list_top_level_dirs(session) {
        Ok(dirs) => {
            for name in &dirs {
                events.emit(BackupEvent::DirectoryFound { name: name.clone() });
            }
            dirs
        }
        Err(e) => {
            warn!("{}", e);
            events.emit(BackupEvent::ScanFailed { cause: e.cause });
            Vec::new()
        }
    }
}

/// Walk `remote_root` depth-first, appending every file to `manifest` and
/// creating the matching local directories as it goes.
///
/// A directory that cannot be entered, listed or created locally is
/// abandoned (with its subtree); the walk continues with its siblings.
/// Returns the abandoned subtrees.
pub fn discover(
    session: &mut dyn RemoteSession,
    remote_root: &str,
    local_root: &Path,
    manifest: &mut Manifest,
    events: &EventSink,
) -> Vec<ExploreError> {
    let mut errors = Vec::new();
    walk(session, remote_root, local_root, manifest, events, &mut errors);
    errors
}

fn walk(
    session: &mut dyn RemoteSession,
    remote_dir: &str,
    local_dir: &Path,
    manifest: &mut Manifest,
    events: &EventSink,
    errors: &mut Vec<ExploreError>,
) {
    let entries = match enter(session, remote_dir, local_dir) {
        Ok(entries) => entries,
        Err(cause) => {
            abandon(events, errors, remote_dir, cause);
            return;
        }
    };

    for entry in entries {
        if entry.is_pseudo() {
            continue;
        }
        let remote_path = join_remote(remote_dir, &entry.name);
        if !is_plain_name(&entry.name) {
            abandon(events, errors, &remote_path, format!("unsafe entry name '{}'", entry.name));
            continue;
        }
        let local_path = local_dir.join(&entry.name);
        match entry.kind {
            EntryKind::Directory => walk(session, &remote_path, &local_path, manifest, events, errors),
            EntryKind::File => {
                let unit = TransferUnit::new(remote_path, local_path, entry.size);
                events.emit(BackupEvent::FileDiscovered { unit: unit.clone() });
                manifest.push(unit);
            }
            EntryKind::Pseudo | EntryKind::Other => {
                debug!(path = %remote_path, "skipping entry of unsupported type");
            }
        }
    }
}

fn abandon(events: &EventSink, errors: &mut Vec<ExploreError>, path: &str, cause: String) {
    warn!(path, "could not explore: {}", cause);
    events.emit(BackupEvent::ExploreFailed {
        path: path.to_string(),
        cause: cause.clone(),
    });
    errors.push(ExploreError {
        path: path.to_string(),
        cause,
    });
}

/// True if `name` is exactly one normal path component, so joining it
/// can never leave the parent directory.
fn is_plain_name(name: &str) -> bool {
    if name.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!((components.next(), components.next()), (Some(Component::Normal(_)), None))
}

/// Enter one remote directory and mirror it locally, returning its listing.
fn enter(
    session: &mut dyn RemoteSession,
    remote_dir: &str,
    local_dir: &Path,
) -> Result<Vec<crate::model::RemoteEntry>, String> {
    session.change_dir(remote_dir).map_err(|e| e.to_string())?;
    fs::create_dir_all(local_dir).map_err(|e| format!("{}: {}", local_dir.display(), e))?;
    session.list_entries().map_err(|e| e.to_string())
}

fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}
