//! Bucket naming and provisioning
//!
//! Every run writes into a fresh bucket named after the calendar date the
//! run started: `<prefix>-<year>-<month>-<day>`, month and day unpadded.
//! A second run on the same day collides with the first and fails at
//! creation time; nothing is ever written into an existing bucket.

use crate::storage::{BucketPolicy, StorageBackend, StorageError};
use time::OffsetDateTime;
use tracing::info;

/// Region buckets are created in unless configured otherwise
pub const DEFAULT_BUCKET_LOCATION: &str = "asia-northeast1";

/// A bucket created for this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketDescriptor {
    pub name: String,
    pub project_id: String,
    pub policy: BucketPolicy,
}

/// `<prefix>-<year>-<month>-<day>` for the date of `as_of`
pub fn derive_bucket_name(prefix: &str, as_of: OffsetDateTime) -> String {
    format!(
        "{}-{}-{}-{}",
        prefix,
        as_of.year(),
        u8::from(as_of.month()),
        as_of.day()
    )
}

/// Create the run's bucket. Any failure is fatal for the run.
pub async fn provision_bucket(
    backend: &dyn StorageBackend,
    name: String,
    project_id: &str,
    policy: BucketPolicy,
) -> Result<BucketDescriptor, StorageError> {
    backend.create_bucket(&name, project_id, &policy).await?;

    info!(
        bucket = %name,
        storage_class = %policy.storage_class,
        location = %policy.location,
        "Bucket \"{}\" successfully created",
        name
    );

    Ok(BucketDescriptor {
        name,
        project_id: project_id.to_string(),
        policy,
    })
}
