//! Directory copier
//!
//! Copies the top-level entries of a local directory into a bucket, one
//! object per entry, each compressed in transit. The walk is flat: a
//! subdirectory is an entry like any other and fails as a file copy.
//!
//! A failure on one entry is recorded and the batch moves on; only a
//! directory that cannot be listed at all fails the whole copy.

use crate::bucket::BucketDescriptor;
use crate::compression::{CompressedObject, CompressingSink, DEFAULT_COMPRESSION_LEVEL};
use crate::storage::StorageBackend;
use std::ffi::OsString;
use std::io::{Error as IoError, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Read buffer size per file
pub const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Tuning for a directory copy
#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub compression_level: i32,
    pub chunk_size: usize,
}

impl Default for CopyOptions {
    fn default() -> Self {
        CopyOptions {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            chunk_size: COPY_CHUNK_SIZE,
        }
    }
}

/// Where in the per-file pipeline a copy failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStage {
    /// Opening the local entry
    Open,
    /// Creating the remote object
    CreateObject,
    /// Reading, compressing, or uploading
    Stream,
    /// Finishing compression and committing the object
    Finalize,
}

impl std::fmt::Display for CopyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match self {
            CopyStage::Open => "open",
            CopyStage::CreateObject => "create object",
            CopyStage::Stream => "stream",
            CopyStage::Finalize => "finalize",
        };
        f.write_str(stage)
    }
}

/// A single entry that could not be copied
#[derive(Debug)]
pub struct CopyFailure {
    /// Base name of the local entry
    pub name: String,
    pub stage: CopyStage,
    pub cause: IoError,
}

impl CopyFailure {
    fn new(name: &str, stage: CopyStage, cause: IoError) -> Self {
        CopyFailure {
            name: name.to_string(),
            stage,
            cause,
        }
    }
}

impl std::fmt::Display for CopyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} failed: {}", self.name, self.stage, self.cause)
    }
}

impl std::error::Error for CopyFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// The source directory could not be enumerated
#[derive(Debug)]
pub struct DirectoryListError {
    pub path: PathBuf,
    pub source: IoError,
}

impl std::fmt::Display for DirectoryListError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Failed to list directory {}: {}",
            self.path.display(),
            self.source
        )
    }
}

impl std::error::Error for DirectoryListError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Outcome of copying one directory
///
/// Invariant: `attempted >= failures.len()`; every listed entry counts
/// as exactly one attempt.
#[derive(Debug, Default)]
pub struct CopyResult {
    pub attempted: usize,
    /// In listing order
    pub failures: Vec<CopyFailure>,
    /// Uncompressed bytes of successfully copied entries
    pub bytes_read: u64,
    /// Compressed bytes stored for successfully copied entries
    pub bytes_stored: u64,
}

impl CopyResult {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failures.len()
    }

    pub fn error_count(&self) -> usize {
        self.failures.len()
    }

    fn record_success(&mut self, object: &CompressedObject) {
        self.attempted += 1;
        self.bytes_read += object.bytes_in;
        self.bytes_stored += object.bytes_out;
    }

    fn record_failure(&mut self, failure: CopyFailure) {
        self.attempted += 1;
        self.failures.push(failure);
    }

    fn verify_invariants(&self) {
        debug_assert!(
            self.attempted >= self.failures.len(),
            "Invariant: attempted {} < failures {}",
            self.attempted,
            self.failures.len()
        );
    }
}

/// A listed directory entry
#[derive(Debug)]
struct SourceEntry {
    file_name: OsString,
    path: PathBuf,
}

impl SourceEntry {
    /// Object name: the entry's base name, flat namespace
    ///
    /// Names that are not valid UTF-8 are rejected; a lossy conversion could
    /// map two entries onto the same object.
    fn object_name(&self) -> Result<String, IoError> {
        self.file_name.to_str().map(str::to_string).ok_or_else(|| {
            IoError::new(ErrorKind::InvalidData, "file name is not valid UTF-8")
        })
    }

    /// Name for logs and failure records
    fn display_name(&self) -> String {
        self.file_name.to_string_lossy().into_owned()
    }
}

/// List immediate entries, sorted by name for a stable order
async fn list_entries(local_path: &Path) -> Result<Vec<SourceEntry>, DirectoryListError> {
    let list_error = |source| DirectoryListError {
        path: local_path.to_path_buf(),
        source,
    };

    let mut reader = tokio::fs::read_dir(local_path).await.map_err(list_error)?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await.map_err(list_error)? {
        entries.push(SourceEntry {
            file_name: entry.file_name(),
            path: entry.path(),
        });
    }
    entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(entries)
}

/// Copy every top-level entry of `local_path` into `bucket`
pub async fn copy_directory(
    backend: &dyn StorageBackend,
    bucket: &BucketDescriptor,
    local_path: &Path,
    options: &CopyOptions,
) -> Result<CopyResult, DirectoryListError> {
    let entries = list_entries(local_path).await?;
    info!(
        source = %local_path.display(),
        bucket = %bucket.name,
        entries = entries.len(),
        "Copying directory"
    );

    let mut result = CopyResult::default();
    for entry in &entries {
        let name = entry.display_name();
        let outcome = match entry.object_name() {
            Ok(object_name) => {
                copy_entry(backend, &bucket.name, entry, &object_name, options).await
            }
            Err(e) => Err(CopyFailure::new(&name, CopyStage::Open, e)),
        };
        match outcome {
            Ok(object) => {
                info!(
                    object = %name,
                    bytes_in = object.bytes_in,
                    bytes_out = object.bytes_out,
                    "Copied {}",
                    name
                );
                result.record_success(&object);
            }
            Err(failure) => {
                debug!(object = %name, stage = %failure.stage, error = %failure.cause, "Copy failed");
                result.record_failure(failure);
            }
        }
    }

    result.verify_invariants();
    Ok(result)
}

async fn copy_entry(
    backend: &dyn StorageBackend,
    bucket: &str,
    entry: &SourceEntry,
    name: &str,
    options: &CopyOptions,
) -> Result<CompressedObject, CopyFailure> {
    // Follows symlinks. Only regular files are opened: a FIFO blocks on open
    // and a device can stream forever.
    let metadata = tokio::fs::metadata(&entry.path)
        .await
        .map_err(|e| CopyFailure::new(name, CopyStage::Open, e))?;
    if !metadata.is_file() {
        return Err(CopyFailure::new(
            name,
            CopyStage::Open,
            IoError::new(ErrorKind::InvalidInput, "not a regular file"),
        ));
    }

    let mut file = tokio::fs::File::open(&entry.path)
        .await
        .map_err(|e| CopyFailure::new(name, CopyStage::Open, e))?;

    let sink = backend
        .open_writer(bucket, name)
        .await
        .map_err(|e| CopyFailure::new(name, CopyStage::CreateObject, e))?;
    let mut compressing = CompressingSink::wrap(sink, options.compression_level)
        .await
        .map_err(|e| CopyFailure::new(name, CopyStage::CreateObject, e))?;

    let mut buf = vec![0u8; options.chunk_size.max(1)];
    loop {
        let n = match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                compressing.abandon().await;
                return Err(CopyFailure::new(name, CopyStage::Stream, e));
            }
        };
        if let Err(e) = compressing.write_all(&buf[..n]).await {
            compressing.abandon().await;
            return Err(CopyFailure::new(name, CopyStage::Stream, e));
        }
    }

    compressing
        .close()
        .await
        .map_err(|e| CopyFailure::new(name, CopyStage::Finalize, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BucketPolicy, InMemoryStorage, MemoryFaults};

    async fn bucket_in(storage: &InMemoryStorage) -> BucketDescriptor {
        let policy = BucketPolicy::with_expiry("COLDLINE", "asia-northeast1", 90);
        crate::bucket::provision_bucket(storage, "bk-2024-3-5".to_string(), "proj", policy)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_copies_every_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bravo").unwrap();
        let storage = InMemoryStorage::new();
        let bucket = bucket_in(&storage).await;

        let result = copy_directory(&storage, &bucket, dir.path(), &CopyOptions::default())
            .await
            .unwrap();

        assert_eq!(result.attempted, 2);
        assert!(result.failures.is_empty());
        assert_eq!(result.succeeded(), 2);
        assert_eq!(result.bytes_read, 10);
        let stored = storage.object(&bucket.name, "a.txt").unwrap();
        assert_eq!(zstd::decode_all(stored.as_ref()).unwrap(), b"alpha");
    }

    #[tokio::test]
    async fn test_subdirectory_is_a_per_file_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/inner.txt"), b"skipped").unwrap();
        let storage = InMemoryStorage::new();
        let bucket = bucket_in(&storage).await;

        let result = copy_directory(&storage, &bucket, dir.path(), &CopyOptions::default())
            .await
            .unwrap();

        assert_eq!(result.attempted, 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].name, "nested");
        assert_eq!(result.failures[0].stage, CopyStage::Open);
        assert!(storage.object(&bucket.name, "nested").is_none());
        assert!(storage.object(&bucket.name, "inner.txt").is_none());
        assert_eq!(storage.stats().writers_opened, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dangling_symlink_is_a_per_file_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("b.txt")).unwrap();
        let storage = InMemoryStorage::new();
        let bucket = bucket_in(&storage).await;

        let result = copy_directory(&storage, &bucket, dir.path(), &CopyOptions::default())
            .await
            .unwrap();

        assert_eq!(result.attempted, 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].name, "b.txt");
        assert_eq!(result.failures[0].cause.kind(), ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fifo_is_a_per_file_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        let status = std::process::Command::new("mkfifo")
            .arg(dir.path().join("b.pipe"))
            .status()
            .unwrap();
        assert!(status.success());
        let storage = InMemoryStorage::new();
        let bucket = bucket_in(&storage).await;

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            copy_directory(&storage, &bucket, dir.path(), &CopyOptions::default()),
        )
        .await
        .expect("copy must not block on a FIFO")
        .unwrap();

        assert_eq!(result.attempted, 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].name, "b.pipe");
        assert_eq!(result.failures[0].stage, CopyStage::Open);
        assert_eq!(result.failures[0].cause.kind(), ErrorKind::InvalidInput);
        assert!(storage.object(&bucket.name, "a.txt").is_some());
        assert_eq!(storage.stats().writers_opened, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_to_device_is_a_per_file_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("/dev/zero", dir.path().join("zero")).unwrap();
        let storage = InMemoryStorage::new();
        let bucket = bucket_in(&storage).await;

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            copy_directory(&storage, &bucket, dir.path(), &CopyOptions::default()),
        )
        .await
        .expect("copy must not stream a device")
        .unwrap();

        assert_eq!(result.attempted, 1);
        assert_eq!(result.failures[0].name, "zero");
        assert_eq!(storage.stats().writers_opened, 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_non_utf8_name_is_a_per_file_failure() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(OsStr::from_bytes(b"bad\xff.txt")), b"one").unwrap();
        std::fs::write(dir.path().join(OsStr::from_bytes(b"bad\xfe.txt")), b"two").unwrap();
        std::fs::write(dir.path().join("good.txt"), b"three").unwrap();
        let storage = InMemoryStorage::new();
        let bucket = bucket_in(&storage).await;

        let result = copy_directory(&storage, &bucket, dir.path(), &CopyOptions::default())
            .await
            .unwrap();

        assert_eq!(result.attempted, 3);
        assert_eq!(result.failures.len(), 2);
        for failure in &result.failures {
            assert_eq!(failure.stage, CopyStage::Open);
            assert_eq!(failure.cause.kind(), ErrorKind::InvalidData);
        }
        assert_eq!(storage.stats().writers_opened, 1);
        assert_eq!(
            storage.bucket(&bucket.name).unwrap().objects.keys().collect::<Vec<_>>(),
            vec!["good.txt"]
        );
    }

    #[tokio::test]
    async fn test_upload_failure_does_not_stop_batch() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.bin", "b.bin", "c.bin"] {
            std::fs::write(dir.path().join(name), vec![1u8; 300_000]).unwrap();
        }
        let mut faults = MemoryFaults::default();
        faults.fail_writes_for.insert("b.bin".to_string());
        faults.fail_open_for.insert("c.bin".to_string());
        let storage = InMemoryStorage::with_faults(faults);
        let bucket = bucket_in(&storage).await;

        let result = copy_directory(&storage, &bucket, dir.path(), &CopyOptions::default())
            .await
            .unwrap();

        assert_eq!(result.attempted, 3);
        let failed: Vec<_> = result.failures.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failed, vec!["b.bin", "c.bin"]);
        assert_eq!(result.failures[1].stage, CopyStage::CreateObject);
        assert!(storage.object(&bucket.name, "a.bin").is_some());
        assert!(storage.object(&bucket.name, "b.bin").is_none());

        let stats = storage.stats();
        assert_eq!(stats.objects_committed, 1);
        assert_eq!(stats.objects_aborted, 1);
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = InMemoryStorage::new();
        let bucket = bucket_in(&storage).await;

        let result = copy_directory(&storage, &bucket, dir.path(), &CopyOptions::default())
            .await
            .unwrap();

        assert_eq!(result.attempted, 0);
        assert!(result.failures.is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = InMemoryStorage::new();
        let bucket = bucket_in(&storage).await;
        let missing = dir.path().join("nope");

        let err = copy_directory(&storage, &bucket, &missing, &CopyOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.path, missing);
        assert_eq!(err.source.kind(), ErrorKind::NotFound);
        assert_eq!(storage.stats().writers_opened, 0);
    }

    #[tokio::test]
    async fn test_listing_order_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zeta", "alpha", "mike"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }

        let entries = list_entries(dir.path()).await.unwrap();
        let names: Vec<String> = entries.iter().map(|e| e.object_name()).collect::<Result<_, _>>().unwrap();
        assert_eq!(names, vec!["alpha", "mike", "zeta"]);
    }

    #[tokio::test]
    async fn test_small_chunks_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 256) as u8).collect();
        std::fs::write(dir.path().join("data"), &payload).unwrap();
        let storage = InMemoryStorage::new();
        let bucket = bucket_in(&storage).await;
        let options = CopyOptions {
            chunk_size: 17,
            ..CopyOptions::default()
        };

        copy_directory(&storage, &bucket, dir.path(), &options).await.unwrap();

        let stored = storage.object(&bucket.name, "data").unwrap();
        assert_eq!(zstd::decode_all(stored.as_ref()).unwrap(), payload);
    }
}
