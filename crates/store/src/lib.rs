//! Remote object store boundary.
//!
//! The upload pipeline needs exactly four capabilities: ask whether an
//! object exists, open a writer, write bytes, and close (which is the only
//! point where a write counts as durable). [`ObjectStore`] and
//! [`ObjectWriter`] capture that; [`StoreConnector`] builds a store from the
//! credentials resolved for one attempt.
//!
//! Backends:
//! - [`GcsStore`]: Google Cloud Storage JSON API over `reqwest`.
//! - [`LocalDirStore`]: a directory tree standing in for the bucket.

mod gcs;
mod local;

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use bucketdrop_auth::{AuthContext, AuthError};

pub use gcs::{GCS_BASE_URL, GcsConnector, GcsStore};
pub use local::{LocalConnector, LocalDirStore};

/// Future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors produced by object-store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("store returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid object name: {0:?}")]
    InvalidName(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("upload ended before the writer was closed")]
    Interrupted,

    #[error("upload task failed: {0}")]
    Task(String),
}

/// Remote object identity: bucket plus flat object name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }

    /// Derives the object for a local file: its base name, no directory prefix.
    ///
    /// Returns `None` for paths without a UTF-8 file name.
    pub fn for_file(bucket: &str, path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        Some(Self::new(bucket, name))
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.name)
    }
}

/// Key-addressed blob storage.
pub trait ObjectStore: Send + Sync {
    /// `Ok(false)` only for a definite "not found".
    fn exists<'a>(&'a self, object: &'a ObjectRef) -> StoreFuture<'a, bool>;

    /// Opens a streaming writer for `object`.
    fn open_writer<'a>(&'a self, object: &'a ObjectRef) -> StoreFuture<'a, Box<dyn ObjectWriter>>;
}

/// An in-progress object write.
///
/// Nothing is durable until `close` succeeds. A failed `close` means the
/// object must be treated as not written.
pub trait ObjectWriter: Send {
    fn write<'a>(&'a mut self, chunk: &'a [u8]) -> StoreFuture<'a, ()>;

    /// Finalizes the object.
    fn close(self: Box<Self>) -> StoreFuture<'static, ()>;

    /// Abandons the write and releases resources. Best effort.
    fn abort(self: Box<Self>) -> StoreFuture<'static, ()>;
}

/// Builds a store handle for one attempt's credentials.
pub trait StoreConnector: Send + Sync {
    fn connect<'a>(&'a self, auth: &'a AuthContext) -> StoreFuture<'a, Arc<dyn ObjectStore>>;
}
