//! Core data model for backup jobs.
//!
//! This module defines the main data structures for representing a backup:
//! - Credentials: the login triple used by every connection
//! - TransferUnit / Manifest: the flat list of files discovered remotely
//! - RemoteEntry: one parsed line of a machine-readable listing
//! - FileState, JobState: enums tracking progress
//! - UnitOutcome: what happened to one unit during the transfer phase

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Default FTP control port, used when `host` carries no `:port` suffix.
pub const DEFAULT_FTP_PORT: u16 = 21;

/// Login triple for the remote server.
///
/// Held in memory for the lifetime of the process and wiped on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    /// Host name or address, optionally with `:port`
    pub host: String,
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(host: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            host: host.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// Split `host` into name and port, defaulting to port 21.
    ///
    /// IPv6 literals must be bracketed (`[::1]:2121`) to carry a port.
    pub fn host_and_port(&self) -> (String, u16) {
        let host = self.host.trim();
        if let Some(rest) = host.strip_prefix('[') {
            if let Some((addr, tail)) = rest.split_once(']') {
                let port = tail
                    .strip_prefix(':')
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(DEFAULT_FTP_PORT);
                return (addr.to_string(), port);
            }
        }
        match host.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') => match port.parse() {
                Ok(port) => (name.to_string(), port),
                Err(_) => (host.to_string(), DEFAULT_FTP_PORT),
            },
            _ => (host.to_string(), DEFAULT_FTP_PORT),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One file to fetch: where it lives remotely, where it goes locally, and
/// its size at listing time.
///
/// The size is a snapshot and is never re-validated before download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferUnit {
    pub remote_path: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
}

impl TransferUnit {
    pub fn new(remote_path: impl Into<String>, local_path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        TransferUnit {
            remote_path: remote_path.into(),
            local_path: local_path.into(),
            size_bytes,
        }
    }
}

/// Ordered list of transfer units, in depth-first discovery order.
///
/// No deduplication is performed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    units: Vec<TransferUnit>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, unit: TransferUnit) {
        self.units.push(unit);
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Sum of the listing-time sizes of every unit.
    pub fn total_bytes(&self) -> u64 {
        self.units.iter().map(|u| u.size_bytes).sum()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TransferUnit> {
        self.units.iter()
    }

    pub fn units(&self) -> &[TransferUnit] {
        &self.units
    }

    pub fn into_units(self) -> Vec<TransferUnit> {
        self.units
    }
}

impl From<Vec<TransferUnit>> for Manifest {
    fn from(units: Vec<TransferUnit>) -> Self {
        Manifest { units }
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a TransferUnit;
    type IntoIter = std::slice::Iter<'a, TransferUnit>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.iter()
    }
}

/// Kind of a remote listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    /// The `.`/`..` self and parent entries
    Pseudo,
    /// Symlinks, devices and anything else we do not traverse
    Other,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    /// Size in bytes (0 when the server omits the fact)
    pub size: u64,
}

impl RemoteEntry {
    pub fn directory(name: impl Into<String>) -> Self {
        RemoteEntry {
            name: name.into(),
            kind: EntryKind::Directory,
            size: 0,
        }
    }

    pub fn file(name: impl Into<String>, size: u64) -> Self {
        RemoteEntry {
            name: name.into(),
            kind: EntryKind::File,
            size,
        }
    }

    /// True for the self/parent pseudo-entries, whatever their reported type.
    pub fn is_pseudo(&self) -> bool {
        self.kind == EntryKind::Pseudo || self.name == "." || self.name == ".."
    }
}

/// The state of an individual unit during the transfer phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Not yet claimed by a worker
    Pending,
    /// Claimed, streaming
    Downloading,
    /// Fully received and written
    Done,
    /// Error occurred; partial output may remain on disk
    Failed,
}

impl FileState {
    /// Returns true if this state is terminal (no further changes expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileState::Done | FileState::Failed)
    }
}

/// The state of an entire backup job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Created, nothing discovered yet
    Pending,
    /// Discovery finished, manifest ready
    Planned,
    /// Transfer phase in progress
    Running,
    /// Every unit accounted for (some may have failed)
    Completed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "Pending"),
            JobState::Planned => write!(f, "Planned"),
            JobState::Running => write!(f, "Running"),
            JobState::Completed => write!(f, "Completed"),
        }
    }
}

/// What happened to one manifest unit.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    /// Position of the unit in the manifest
    pub index: usize,
    pub unit: TransferUnit,
    pub state: FileState,
    /// Bytes actually written to the local destination
    pub bytes_written: u64,
    pub error: Option<String>,
}
