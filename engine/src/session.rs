//! Remote session abstraction.
//!
//! A `RemoteSession` is one stateful, authenticated control connection. It is
//! `Send` so it can be moved into a worker thread, but never shared: every
//! component that talks to the server asks the `Connector` for its own.

use std::io;

use crate::error::{ConnectError, SessionError};
use crate::model::RemoteEntry;

/// Receives retrieved data one chunk at a time.
pub type ChunkCallback<'a> = dyn FnMut(&[u8]) -> io::Result<()> + 'a;

pub trait RemoteSession: Send {
    /// Change the working directory.
    fn change_dir(&mut self, path: &str) -> Result<(), SessionError>;

    /// Machine-readable listing of the working directory.
    fn list_entries(&mut self) -> Result<Vec<RemoteEntry>, SessionError>;

    /// Stream a remote file in binary mode, handing each chunk to `on_chunk`.
    ///
    /// Returns the number of bytes delivered. An error from `on_chunk`
    /// aborts the transfer and is reported as `SessionError::Local`.
    fn retrieve(&mut self, path: &str, on_chunk: &mut ChunkCallback<'_>) -> Result<u64, SessionError>;

    /// Politely end the session. Implementations also do this on drop.
    fn close(&mut self);
}

/// Opens independent sessions.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn RemoteSession>, ConnectError>;
}
