//! Local filesystem storage backend
//!
//! Each bucket is a directory under `root`; its policy is written next to it
//! as `<bucket>.bucket.json`. Objects are written to a hidden `.partial` file
//! and renamed into place on commit, so an aborted write leaves nothing
//! behind under the object's name.

use crate::storage::{
    BucketPolicy, ObjectMeta, ObjectWriter, StorageBackend, StorageConnector, StorageError,
    StorageHandle,
};
use serde::Serialize;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const PARTIAL_SUFFIX: &str = ".partial";
const POLICY_SUFFIX: &str = ".bucket.json";

/// Policy file contents
#[derive(Debug, Serialize)]
struct BucketRecord<'a> {
    name: &'a str,
    project_id: &'a str,
    policy: &'a BucketPolicy,
}

/// Local filesystem storage backend and connector
#[derive(Debug, Clone)]
pub struct LocalFsStorage {
    root: PathBuf,
}

impl LocalFsStorage {
    pub fn new(root: PathBuf) -> Self {
        LocalFsStorage { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn policy_path(&self, bucket: &str) -> PathBuf {
        self.root.join(format!("{}{}", bucket, POLICY_SUFFIX))
    }

    /// Reject names that would escape the bucket directory
    fn validate_name(name: &str) -> IoResult<()> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(IoError::new(
                ErrorKind::InvalidInput,
                format!("Invalid name: {:?}", name),
            ));
        }
        Ok(())
    }
}

impl StorageConnector for LocalFsStorage {
    fn connect<'a>(
        &'a self,
        credentials: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<StorageHandle, StorageError>> + Send + 'a>> {
        Box::pin(async move {
            debug!(
                credentials = %credentials.display(),
                "Local filesystem backend does not authenticate"
            );
            tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
                StorageError::Auth(format!(
                    "cannot open storage root {}: {}",
                    self.root.display(),
                    e
                ))
            })?;
            Ok(StorageHandle::new(Arc::new(self.clone())))
        })
    }
}

impl StorageBackend for LocalFsStorage {
    fn name(&self) -> &'static str {
        "localfs"
    }

    fn create_bucket<'a>(
        &'a self,
        bucket: &'a str,
        project_id: &'a str,
        policy: &'a BucketPolicy,
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>> {
        Box::pin(async move {
            Self::validate_name(bucket)?;
            // create_dir (not create_dir_all) so an existing bucket is an error
            tokio::fs::create_dir(self.bucket_path(bucket)).await?;

            let record = BucketRecord {
                name: bucket,
                project_id,
                policy,
            };
            let json = serde_json::to_vec_pretty(&record)
                .map_err(|e| StorageError::Backend(format!("policy encoding failed: {}", e)))?;
            tokio::fs::write(self.policy_path(bucket), json).await?;
            Ok(())
        })
    }

    fn open_writer<'a>(
        &'a self,
        bucket: &'a str,
        object: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Box<dyn ObjectWriter>>> + Send + 'a>> {
        Box::pin(async move {
            Self::validate_name(object)?;
            let bucket_dir = self.bucket_path(bucket);
            if !tokio::fs::metadata(&bucket_dir).await?.is_dir() {
                return Err(IoError::new(
                    ErrorKind::NotFound,
                    format!("Bucket not found: {}", bucket),
                ));
            }

            let final_path = bucket_dir.join(object);
            let partial_path = bucket_dir.join(format!(".{}{}", object, PARTIAL_SUFFIX));
            let file = tokio::fs::File::create(&partial_path).await?;

            let writer: Box<dyn ObjectWriter> = Box::new(LocalFsObjectWriter {
                file,
                partial_path,
                final_path,
                bucket: bucket.to_string(),
                name: object.to_string(),
                size_bytes: 0,
            });
            Ok(writer)
        })
    }
}

struct LocalFsObjectWriter {
    file: tokio::fs::File,
    partial_path: PathBuf,
    final_path: PathBuf,
    bucket: String,
    name: String,
    size_bytes: u64,
}

impl ObjectWriter for LocalFsObjectWriter {
    fn write<'a>(
        &'a mut self,
        chunk: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.file.write_all(chunk).await?;
            self.size_bytes += chunk.len() as u64;
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> Pin<Box<dyn Future<Output = IoResult<ObjectMeta>> + Send>> {
        Box::pin(async move {
            let LocalFsObjectWriter {
                mut file,
                partial_path,
                final_path,
                bucket,
                name,
                size_bytes,
            } = *self;

            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&partial_path, &final_path).await?;

            Ok(ObjectMeta {
                bucket,
                name,
                size_bytes,
            })
        })
    }

    fn abort(self: Box<Self>) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send>> {
        Box::pin(async move {
            let LocalFsObjectWriter {
                file, partial_path, ..
            } = *self;
            drop(file);
            match tokio::fs::remove_file(&partial_path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BucketPolicy {
        BucketPolicy::with_expiry("COLDLINE", "asia-northeast1", 30)
    }

    #[tokio::test]
    async fn test_create_bucket_writes_policy() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path().to_path_buf());

        storage.create_bucket("bk-2024-3-5", "proj", &policy()).await.unwrap();

        assert!(storage.bucket_path("bk-2024-3-5").is_dir());
        let raw = std::fs::read_to_string(dir.path().join("bk-2024-3-5.bucket.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["policy"]["storage_class"], "COLDLINE");
        assert_eq!(json["policy"]["lifecycle"][0]["age_days"], 30);
    }

    #[tokio::test]
    async fn test_existing_bucket_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path().to_path_buf());

        storage.create_bucket("b", "proj", &policy()).await.unwrap();
        let err = storage.create_bucket("b", "proj", &policy()).await.unwrap_err();

        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_commit_renames_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path().to_path_buf());
        storage.create_bucket("b", "proj", &policy()).await.unwrap();

        let mut writer = storage.open_writer("b", "a.txt").await.unwrap();
        writer.write(b"payload").await.unwrap();
        assert!(!dir.path().join("b/a.txt").exists());

        let meta = writer.commit().await.unwrap();
        assert_eq!(meta.size_bytes, 7);
        assert_eq!(std::fs::read(dir.path().join("b/a.txt")).unwrap(), b"payload");
        assert!(!dir.path().join("b/.a.txt.partial").exists());
    }

    #[tokio::test]
    async fn test_abort_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path().to_path_buf());
        storage.create_bucket("b", "proj", &policy()).await.unwrap();

        let mut writer = storage.open_writer("b", "a.txt").await.unwrap();
        writer.write(b"half").await.unwrap();
        writer.abort().await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("b")).unwrap().collect();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path().to_path_buf());
        storage.create_bucket("b", "proj", &policy()).await.unwrap();

        let err = storage.open_writer("b", "../escape").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_connect_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("buckets");
        let storage = LocalFsStorage::new(root.clone());

        let handle = storage.connect(Path::new("unused.json")).await.unwrap();
        assert_eq!(handle.backend().name(), "localfs");
        assert!(root.is_dir());
    }
}
