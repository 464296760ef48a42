//! In-memory storage backend for tests
//!
//! Clones share state, so a test can keep one clone for inspection while the
//! run owns another through its `StorageHandle`. Faults are injected
//! deterministically per bucket/object name rather than by probability.

use crate::storage::{
    BucketPolicy, ObjectMeta, ObjectWriter, StorageBackend, StorageConnector, StorageError,
    StorageHandle,
};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

/// Faults to inject
#[derive(Debug, Clone, Default)]
pub struct MemoryFaults {
    /// Every `connect` fails with an auth error
    pub reject_credentials: bool,
    /// Every `create_bucket` is rejected by the "backend"
    pub reject_bucket_creation: bool,
    /// `open_writer` fails for these object names
    pub fail_open_for: HashSet<String>,
    /// `write` fails for these object names
    pub fail_writes_for: HashSet<String>,
}

/// Operation counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStorageStats {
    pub sessions_opened: u64,
    pub sessions_released: u64,
    pub buckets_created: u64,
    pub writers_opened: u64,
    pub objects_committed: u64,
    pub objects_aborted: u64,
}

/// A bucket and its committed objects
#[derive(Debug, Clone)]
pub struct StoredBucket {
    pub project_id: String,
    pub policy: BucketPolicy,
    pub objects: BTreeMap<String, Bytes>,
}

#[derive(Debug, Default)]
struct MemoryState {
    buckets: HashMap<String, StoredBucket>,
    faults: MemoryFaults,
    stats: MemoryStorageStats,
}

/// In-memory storage backend and connector
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: MemoryFaults) -> Self {
        let storage = Self::new();
        storage.state.write().faults = faults;
        storage
    }

    /// Pre-create a bucket, e.g. to simulate a same-day rerun
    pub fn insert_bucket(&self, name: &str, project_id: &str, policy: BucketPolicy) {
        self.state.write().buckets.insert(
            name.to_string(),
            StoredBucket {
                project_id: project_id.to_string(),
                policy,
                objects: BTreeMap::new(),
            },
        );
    }

    pub fn bucket(&self, name: &str) -> Option<StoredBucket> {
        self.state.read().buckets.get(name).cloned()
    }

    pub fn object(&self, bucket: &str, name: &str) -> Option<Bytes> {
        self.state
            .read()
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(name).cloned())
    }

    pub fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().buckets.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> MemoryStorageStats {
        self.state.read().stats.clone()
    }
}

impl StorageConnector for InMemoryStorage {
    fn connect<'a>(
        &'a self,
        credentials: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<StorageHandle, StorageError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.write();
            if state.faults.reject_credentials {
                return Err(StorageError::Auth(format!(
                    "credentials rejected: {}",
                    credentials.display()
                )));
            }
            state.stats.sessions_opened += 1;
            drop(state);
            Ok(StorageHandle::new(Arc::new(self.clone())))
        })
    }
}

impl StorageBackend for InMemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create_bucket<'a>(
        &'a self,
        bucket: &'a str,
        project_id: &'a str,
        policy: &'a BucketPolicy,
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.write();
            if state.faults.reject_bucket_creation {
                return Err(StorageError::Backend(format!(
                    "bucket creation rejected for project {}",
                    project_id
                )));
            }
            if state.buckets.contains_key(bucket) {
                return Err(StorageError::AlreadyExists(bucket.to_string()));
            }
            state.buckets.insert(
                bucket.to_string(),
                StoredBucket {
                    project_id: project_id.to_string(),
                    policy: policy.clone(),
                    objects: BTreeMap::new(),
                },
            );
            state.stats.buckets_created += 1;
            Ok(())
        })
    }

    fn open_writer<'a>(
        &'a self,
        bucket: &'a str,
        object: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Box<dyn ObjectWriter>>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.write();
            if !state.buckets.contains_key(bucket) {
                return Err(IoError::new(
                    ErrorKind::NotFound,
                    format!("Bucket not found: {}", bucket),
                ));
            }
            if state.faults.fail_open_for.contains(object) {
                return Err(IoError::new(
                    ErrorKind::Other,
                    format!("injected open failure: {}", object),
                ));
            }
            state.stats.writers_opened += 1;
            let fail_writes = state.faults.fail_writes_for.contains(object);
            drop(state);

            let writer: Box<dyn ObjectWriter> = Box::new(MemoryObjectWriter {
                state: Arc::clone(&self.state),
                bucket: bucket.to_string(),
                name: object.to_string(),
                buffer: Vec::new(),
                fail_writes,
            });
            Ok(writer)
        })
    }

    fn release(&self) {
        self.state.write().stats.sessions_released += 1;
    }
}

struct MemoryObjectWriter {
    state: Arc<RwLock<MemoryState>>,
    bucket: String,
    name: String,
    buffer: Vec<u8>,
    fail_writes: bool,
}

impl ObjectWriter for MemoryObjectWriter {
    fn write<'a>(
        &'a mut self,
        chunk: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail_writes {
                return Err(IoError::new(
                    ErrorKind::Other,
                    format!("injected write failure: {}", self.name),
                ));
            }
            self.buffer.extend_from_slice(chunk);
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> Pin<Box<dyn Future<Output = IoResult<ObjectMeta>> + Send>> {
        Box::pin(async move {
            let this = *self;
            let size_bytes = this.buffer.len() as u64;
            let mut state = this.state.write();
            let bucket = state.buckets.get_mut(&this.bucket).ok_or_else(|| {
                IoError::new(
                    ErrorKind::NotFound,
                    format!("Bucket not found: {}", this.bucket),
                )
            })?;
            bucket
                .objects
                .insert(this.name.clone(), Bytes::from(this.buffer));
            state.stats.objects_committed += 1;

            Ok(ObjectMeta {
                bucket: this.bucket,
                name: this.name,
                size_bytes,
            })
        })
    }

    fn abort(self: Box<Self>) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send>> {
        Box::pin(async move {
            self.state.write().stats.objects_aborted += 1;
            Ok(())
        })
    }
}
