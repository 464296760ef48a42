//! Local File Backup
//!
//! Copies the top-level files of a local directory into a new dated bucket,
//! compressing each one, and posts a summary to a traQ webhook.
//!
//! See `localfile_backup::config` for the environment variables.

use localfile_backup::observability::{init_tracing, LogConfig};
use localfile_backup::{
    BackupError, BackupRunner, LocalFsStorage, ProductionClock, RunConfig, StorageConnector,
    StoreConfig, TraqWebhook,
};
use std::process::ExitCode;
use tracing::error;

fn main() -> ExitCode {
    if let Err(e) = init_tracing(&LogConfig::from_env()) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    // Loaded before the runtime starts so the host UTC offset can be read
    let config = match RunConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", BackupError::Config(e));
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(&config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Backup failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &RunConfig) -> Result<(), BackupError> {
    let connector = connector_for(&config.store)?;
    let notifier = TraqWebhook::new(&config.webhook);

    let report = BackupRunner::new(config, connector.as_ref(), &notifier, ProductionClock::new())
        .run()
        .await?;

    println!("Backup complete");
    println!("  Bucket: {}", report.bucket.name);
    println!("  Objects: {}", report.summary.object_count);
    println!("  Errors: {}", report.summary.error_count);
    Ok(())
}

fn connector_for(store: &StoreConfig) -> Result<Box<dyn StorageConnector>, BackupError> {
    match store {
        #[cfg(feature = "gcs")]
        StoreConfig::Gcs { api_origin } => Ok(Box::new(
            localfile_backup::storage::GcsConnector::new(api_origin.clone()),
        )),
        #[cfg(not(feature = "gcs"))]
        StoreConfig::Gcs { .. } => Err(BackupError::Config(
            localfile_backup::ConfigError::Invalid {
                key: "BACKUP_STORE_TYPE",
                value: "gcs".to_string(),
                reason: "GCS support not compiled. Rebuild with --features gcs".to_string(),
            },
        )),
        StoreConfig::LocalFs { root } => Ok(Box::new(LocalFsStorage::new(root.clone()))),
    }
}
