//! Google Cloud Storage backend
//!
//! Object uploads go through the `object_store` crate (multipart uploads,
//! service-account auth, retries). Bucket creation is not part of the
//! `object_store` API, so it is a direct call to the JSON API's
//! `buckets.insert`, authorised with the same service-account token.
//!
//! Credentials come from a service-account key file
//! (`GOOGLE_APPLICATION_CREDENTIALS`).

use crate::config::DEFAULT_GCS_API_ORIGIN;
use crate::storage::{
    BucketPolicy, LifecycleAction, ObjectMeta, ObjectWriter, StorageBackend, StorageConnector,
    StorageError, StorageHandle,
};
use object_store::gcp::{GoogleCloudStorage, GoogleCloudStorageBuilder};
use object_store::path::Path as ObjectPath;
use object_store::{CredentialProvider, ObjectStore as ObjectStoreTrait, WriteMultipart};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};

/// Bucket used only to build the credential provider; never accessed
const CREDENTIAL_PROBE_BUCKET: &str = "credential-probe";

/// Parts uploaded concurrently by one object writer
const MAX_IN_FLIGHT_PARTS: usize = 4;

/// Fields of a service-account key that must be present
#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    #[serde(rename = "type")]
    key_type: String,
    client_email: String,
    private_key: String,
}

/// `buckets.insert` request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BucketInsertRequest<'a> {
    name: &'a str,
    storage_class: &'a str,
    location: &'a str,
    lifecycle: LifecycleJson,
}

#[derive(Debug, Serialize)]
struct LifecycleJson {
    rule: Vec<LifecycleRuleJson>,
}

#[derive(Debug, Serialize)]
struct LifecycleRuleJson {
    action: LifecycleActionJson,
    condition: LifecycleConditionJson,
}

#[derive(Debug, Serialize)]
struct LifecycleActionJson {
    #[serde(rename = "type")]
    action_type: &'static str,
}

#[derive(Debug, Serialize)]
struct LifecycleConditionJson {
    age: u32,
}

impl<'a> BucketInsertRequest<'a> {
    fn new(name: &'a str, policy: &'a BucketPolicy) -> Self {
        let rule = policy
            .lifecycle
            .iter()
            .map(|r| LifecycleRuleJson {
                action: LifecycleActionJson {
                    action_type: match r.action {
                        LifecycleAction::Delete => "Delete",
                    },
                },
                condition: LifecycleConditionJson { age: r.age_days },
            })
            .collect();

        BucketInsertRequest {
            name,
            storage_class: &policy.storage_class,
            location: &policy.location,
            lifecycle: LifecycleJson { rule },
        }
    }
}

/// Connector that authenticates with a service-account key file
#[derive(Debug, Clone)]
pub struct GcsConnector {
    api_origin: String,
    http: reqwest::Client,
}

impl GcsConnector {
    pub fn new(api_origin: impl Into<String>) -> Self {
        GcsConnector {
            api_origin: api_origin.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Parse the key file so a malformed credential fails before any network call
    async fn read_key(credentials: &Path) -> Result<ServiceAccountKey, StorageError> {
        let raw = tokio::fs::read_to_string(credentials).await.map_err(|e| {
            StorageError::Auth(format!(
                "cannot read credential file {}: {}",
                credentials.display(),
                e
            ))
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&raw).map_err(|e| {
            StorageError::Auth(format!(
                "malformed credential file {}: {}",
                credentials.display(),
                e
            ))
        })?;
        if key.key_type != "service_account" || key.private_key.is_empty() {
            return Err(StorageError::Auth(format!(
                "{} is not a service-account key",
                credentials.display()
            )));
        }
        Ok(key)
    }
}

impl Default for GcsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_GCS_API_ORIGIN)
    }
}

impl StorageConnector for GcsConnector {
    fn connect<'a>(
        &'a self,
        credentials: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<StorageHandle, StorageError>> + Send + 'a>> {
        Box::pin(async move {
            let key = Self::read_key(credentials).await?;

            let probe = build_store(credentials, CREDENTIAL_PROBE_BUCKET)
                .map_err(|e| StorageError::Auth(e.to_string()))?;
            // Exchanging the key for a token is where the backend rejects bad credentials
            probe
                .credentials()
                .get_credential()
                .await
                .map_err(|e| StorageError::Auth(e.to_string()))?;

            info!(account = %key.client_email, "Authenticated with Google Cloud Storage");

            let storage = GcsStorage {
                credentials: credentials.to_path_buf(),
                api_origin: self.api_origin.clone(),
                http: self.http.clone(),
                probe,
                stores: Mutex::new(HashMap::new()),
            };
            Ok(StorageHandle::new(Arc::new(storage)))
        })
    }
}

fn build_store(credentials: &Path, bucket: &str) -> object_store::Result<GoogleCloudStorage> {
    GoogleCloudStorageBuilder::new()
        .with_service_account_path(credentials.to_string_lossy())
        .with_bucket_name(bucket)
        .build()
}

/// Convert object_store errors to IoError
fn map_error(err: object_store::Error) -> IoError {
    match &err {
        object_store::Error::NotFound { .. } => IoError::new(ErrorKind::NotFound, err.to_string()),
        object_store::Error::AlreadyExists { .. } => {
            IoError::new(ErrorKind::AlreadyExists, err.to_string())
        }
        _ => IoError::new(ErrorKind::Other, err.to_string()),
    }
}

/// Authenticated GCS session
pub struct GcsStorage {
    credentials: PathBuf,
    api_origin: String,
    http: reqwest::Client,
    probe: GoogleCloudStorage,
    /// One object_store client per bucket written to
    stores: Mutex<HashMap<String, Arc<GoogleCloudStorage>>>,
}

impl GcsStorage {
    fn store_for(&self, bucket: &str) -> IoResult<Arc<GoogleCloudStorage>> {
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(bucket) {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(build_store(&self.credentials, bucket).map_err(map_error)?);
        stores.insert(bucket.to_string(), Arc::clone(&store));
        Ok(store)
    }
}

impl std::fmt::Debug for GcsStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsStorage")
            .field("api_origin", &self.api_origin)
            .finish()
    }
}

impl StorageBackend for GcsStorage {
    fn name(&self) -> &'static str {
        "gcs"
    }

    fn create_bucket<'a>(
        &'a self,
        bucket: &'a str,
        project_id: &'a str,
        policy: &'a BucketPolicy,
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>> {
        Box::pin(async move {
            let token = self
                .probe
                .credentials()
                .get_credential()
                .await
                .map_err(|e| StorageError::Auth(e.to_string()))?;

            let url = format!("{}/storage/v1/b", self.api_origin);
            let response = self
                .http
                .post(url)
                .query(&[("project", project_id)])
                .bearer_auth(&token.bearer)
                .json(&BucketInsertRequest::new(bucket, policy))
                .send()
                .await
                .map_err(|e| StorageError::Backend(format!("bucket insert request failed: {}", e)))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            let body = response.text().await.unwrap_or_default();
            match status {
                reqwest::StatusCode::CONFLICT => Err(StorageError::AlreadyExists(bucket.to_string())),
                reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                    Err(StorageError::PermissionDenied(body))
                }
                _ => Err(StorageError::Backend(format!("{}: {}", status, body))),
            }
        })
    }

    fn open_writer<'a>(
        &'a self,
        bucket: &'a str,
        object: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Box<dyn ObjectWriter>>> + Send + 'a>> {
        Box::pin(async move {
            let store = self.store_for(bucket)?;
            let upload = store
                .put_multipart(&ObjectPath::from(object))
                .await
                .map_err(map_error)?;

            let writer: Box<dyn ObjectWriter> = Box::new(GcsObjectWriter {
                upload: WriteMultipart::new(upload),
                bucket: bucket.to_string(),
                name: object.to_string(),
                size_bytes: 0,
            });
            Ok(writer)
        })
    }

    fn release(&self) {
        let count = self.stores.lock().drain().count();
        debug!(buckets = count, "Dropped GCS bucket clients");
    }
}

struct GcsObjectWriter {
    upload: WriteMultipart,
    bucket: String,
    name: String,
    size_bytes: u64,
}

impl ObjectWriter for GcsObjectWriter {
    fn write<'a>(
        &'a mut self,
        chunk: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.upload
                .wait_for_capacity(MAX_IN_FLIGHT_PARTS)
                .await
                .map_err(map_error)?;
            self.upload.write(chunk);
            self.size_bytes += chunk.len() as u64;
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> Pin<Box<dyn Future<Output = IoResult<ObjectMeta>> + Send>> {
        Box::pin(async move {
            let GcsObjectWriter {
                upload,
                bucket,
                name,
                size_bytes,
            } = *self;
            upload.finish().await.map_err(map_error)?;
            Ok(ObjectMeta {
                bucket,
                name,
                size_bytes,
            })
        })
    }

    fn abort(self: Box<Self>) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send>> {
        Box::pin(async move { self.upload.abort().await.map_err(map_error) })
    }
}
