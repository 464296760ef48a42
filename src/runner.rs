//! Run orchestration
//!
//! One run: open a storage session, create the dated bucket, copy the
//! directory, release the session, then deliver the summary. Fatal errors
//! return immediately and nothing is sent; per-file failures only show up
//! in the counts.

use crate::bucket::{derive_bucket_name, provision_bucket, BucketDescriptor};
use crate::clock::BackupClock;
use crate::config::RunConfig;
use crate::copier::{copy_directory, CopyResult};
use crate::error::BackupError;
use crate::report::{format_summary, RunSummary};
use crate::storage::StorageConnector;
use crate::webhook::Notifier;
use tracing::{error, info};

/// What a completed run produced
#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub bucket: BucketDescriptor,
    pub copy: CopyResult,
    /// Text that was delivered
    pub message: String,
}

/// Drives a single backup run against injected collaborators
pub struct BackupRunner<'a, C: BackupClock> {
    config: &'a RunConfig,
    connector: &'a dyn StorageConnector,
    notifier: &'a dyn Notifier,
    clock: C,
}

impl<'a, C: BackupClock> BackupRunner<'a, C> {
    pub fn new(
        config: &'a RunConfig,
        connector: &'a dyn StorageConnector,
        notifier: &'a dyn Notifier,
        clock: C,
    ) -> Self {
        BackupRunner {
            config,
            connector,
            notifier,
            clock,
        }
    }

    pub async fn run(&self) -> Result<RunReport, BackupError> {
        let config = self.config;
        info!(
            source = %config.local_path.display(),
            project = %config.project_id,
            "Backing up files from {} to {}",
            config.local_path.display(),
            config.project_id
        );
        let started_at = self.clock.now();

        let (bucket, copy) = {
            let handle = self
                .connector
                .connect(&config.credentials_path)
                .await
                .map_err(BackupError::Auth)?;
            let backend = handle.backend();

            let name = derive_bucket_name(
                &config.bucket_prefix,
                started_at.to_offset_datetime(config.utc_offset),
            );
            let bucket = provision_bucket(
                backend,
                name.clone(),
                &config.project_id,
                config.bucket_policy(),
            )
            .await
            .map_err(|source| BackupError::BucketCreate {
                bucket: name,
                source,
            })?;

            let copy = copy_directory(
                backend,
                &bucket,
                &config.local_path,
                &config.copy_options(),
            )
            .await?;
            // Session is released when `handle` goes out of scope
            (bucket, copy)
        };

        info!(
            succeeded = copy.succeeded(),
            failed = copy.error_count(),
            bytes_read = copy.bytes_read,
            bytes_stored = copy.bytes_stored,
            "{} file(s) successfully copied, {} error(s) occurred",
            copy.succeeded(),
            copy.error_count()
        );
        for (i, failure) in copy.failures.iter().enumerate() {
            error!("Error {}: {}", i, failure);
        }

        let summary = RunSummary {
            source_path: config.local_path.clone(),
            bucket_name: bucket.name.clone(),
            started_at,
            finished_at: self.clock.now(),
            object_count: copy.attempted,
            error_count: copy.error_count(),
        };
        let message = format_summary(&summary, config.utc_offset);

        self.notifier.send(&message).await?;
        info!(bucket = %bucket.name, "Backup summary sent");

        Ok(RunReport {
            summary,
            bucket,
            copy,
            message,
        })
    }
}
