//! Storage Backend Abstraction
//!
//! A backup run talks to object storage through two seams:
//!
//! - `StorageConnector`: authenticates once and yields a `StorageHandle`
//! - `StorageBackend`: bucket creation and streaming object writers
//!
//! Implementations:
//! - `InMemoryStorage`: for unit tests, with fault injection
//! - `LocalFsStorage`: buckets as directories, for development
//! - `GcsStorage`: Google Cloud Storage (feature-gated)
//!
//! ## Object writes
//!
//! ```text
//! open_writer → write* → commit   (object becomes visible)
//!                      ↘ abort    (nothing is stored)
//! ```

pub mod local_fs;
pub mod memory;
#[cfg(feature = "gcs")]
pub mod gcs;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

pub use local_fs::LocalFsStorage;
pub use memory::{InMemoryStorage, MemoryFaults, MemoryStorageStats, StoredBucket};
#[cfg(feature = "gcs")]
pub use gcs::{GcsConnector, GcsStorage};

/// Action taken by a lifecycle rule once its condition matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleAction {
    Delete,
}

/// Backend-enforced rule: act on objects older than `age_days`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleRule {
    pub action: LifecycleAction,
    pub age_days: u32,
}

impl LifecycleRule {
    pub fn delete_after_days(age_days: u32) -> Self {
        LifecycleRule {
            action: LifecycleAction::Delete,
            age_days,
        }
    }
}

/// Policy a bucket is created with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketPolicy {
    /// Storage tier, e.g. `COLDLINE`
    pub storage_class: String,
    /// Region the bucket lives in
    pub location: String,
    pub lifecycle: Vec<LifecycleRule>,
}

impl BucketPolicy {
    /// Single-rule policy: delete objects once they are `age_days` old
    pub fn with_expiry(storage_class: &str, location: &str, age_days: u32) -> Self {
        BucketPolicy {
            storage_class: storage_class.to_string(),
            location: location.to_string(),
            lifecycle: vec![LifecycleRule::delete_after_days(age_days)],
        }
    }
}

/// Metadata of a committed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub bucket: String,
    pub name: String,
    /// Stored (compressed) size in bytes
    pub size_bytes: u64,
}

/// Error type for session and bucket operations
#[derive(Debug)]
pub enum StorageError {
    /// Credentials unreadable, malformed, or rejected
    Auth(String),
    /// Bucket already exists
    AlreadyExists(String),
    /// Bucket not found
    NotFound(String),
    /// Permission denied
    PermissionDenied(String),
    /// I/O error
    Io(IoError),
    /// Backend rejected the request
    Backend(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Auth(msg) => write!(f, "Authentication failed: {}", msg),
            StorageError::AlreadyExists(name) => write!(f, "Bucket already exists: {}", name),
            StorageError::NotFound(name) => write!(f, "Bucket not found: {}", name),
            StorageError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            StorageError::Io(e) => write!(f, "I/O error: {}", e),
            StorageError::Backend(msg) => write!(f, "Storage backend error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for StorageError {
    fn from(e: IoError) -> Self {
        match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(e.to_string()),
            ErrorKind::PermissionDenied => StorageError::PermissionDenied(e.to_string()),
            ErrorKind::AlreadyExists => StorageError::AlreadyExists(e.to_string()),
            _ => StorageError::Io(e),
        }
    }
}

/// Streaming writer for a single object
///
/// Nothing is visible in the bucket until `commit` succeeds. Exactly one of
/// `commit` or `abort` must end the writer's life.
pub trait ObjectWriter: Send {
    /// Append bytes to the object
    fn write<'a>(
        &'a mut self,
        chunk: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>>;

    /// Persist the object
    fn commit(self: Box<Self>) -> Pin<Box<dyn Future<Output = IoResult<ObjectMeta>> + Send>>;

    /// Discard everything written so far
    fn abort(self: Box<Self>) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send>>;
}

/// Authenticated storage backend
pub trait StorageBackend: Send + Sync + 'static {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Create a bucket. Fails if it already exists.
    fn create_bucket<'a>(
        &'a self,
        bucket: &'a str,
        project_id: &'a str,
        policy: &'a BucketPolicy,
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>>;

    /// Start a new object in an existing bucket
    fn open_writer<'a>(
        &'a self,
        bucket: &'a str,
        object: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Box<dyn ObjectWriter>>> + Send + 'a>>;

    /// Called once when the owning `StorageHandle` is dropped
    fn release(&self) {}
}

/// Establishes authenticated sessions
pub trait StorageConnector: Send + Sync {
    fn connect<'a>(
        &'a self,
        credentials: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<StorageHandle, StorageError>> + Send + 'a>>;
}

/// Authenticated session, released exactly once when dropped
pub struct StorageHandle {
    backend: Arc<dyn StorageBackend>,
}

impl StorageHandle {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        debug!(backend = backend.name(), "Storage session opened");
        StorageHandle { backend }
    }

    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }
}

impl Drop for StorageHandle {
    fn drop(&mut self) {
        self.backend.release();
        debug!(backend = self.backend.name(), "Storage session released");
    }
}

impl std::fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandle")
            .field("backend", &self.backend.name())
            .finish()
    }
}
