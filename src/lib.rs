pub mod bucket;
pub mod clock;
pub mod compression;
pub mod config;
pub mod copier;
pub mod error;
pub mod observability;
pub mod report;
pub mod runner;
pub mod storage;
pub mod webhook;

pub use bucket::{derive_bucket_name, provision_bucket, BucketDescriptor};
pub use clock::{BackupClock, BackupTimestamp, ProductionClock, SimulatedClock};
pub use compression::{CompressedObject, CompressingSink};
pub use config::{ConfigError, RunConfig, StoreConfig, WebhookConfig};
pub use copier::{copy_directory, CopyFailure, CopyOptions, CopyResult, CopyStage};
pub use error::BackupError;
pub use report::{format_summary, RunSummary};
pub use runner::{BackupRunner, RunReport};
pub use storage::{
    BucketPolicy, InMemoryStorage, LocalFsStorage, StorageBackend, StorageConnector, StorageError,
    StorageHandle,
};
pub use webhook::{Notifier, NotifyError, RecordingNotifier, TraqWebhook};
