//! Run configuration
//!
//! All settings are loaded from environment variables once, before any
//! component runs, and passed down as a `RunConfig` value.
//!
//! ## Required
//!
//! | Variable | Description |
//! |----------|-------------|
//! | LOCAL_PATH | Directory to back up |
//! | GOOGLE_APPLICATION_CREDENTIALS | Service-account key file |
//! | PROJECT_ID | Project that owns the bucket |
//! | BUCKET_NAME | Bucket-name prefix |
//! | STORAGECLASS | Storage class, e.g. COLDLINE |
//! | DURATION | Delete objects after this many days |
//! | TRAQ_WEBHOOK_ID | Webhook id |
//! | TRAQ_WEBHOOK_SECRET | Webhook signing secret |
//!
//! ## Optional
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | BUCKET_LOCATION | asia-northeast1 | Bucket region |
//! | BACKUP_STORE_TYPE | gcs | gcs or localfs |
//! | BACKUP_LOCALFS_ROOT | - | Bucket root for localfs |
//! | GCS_API_ORIGIN | https://storage.googleapis.com | JSON API origin |
//! | TRAQ_ORIGIN | https://q.trap.jp | traQ origin |
//! | BACKUP_UTC_OFFSET | host offset | Offset for bucket date and report, e.g. +09:00 |
//! | BACKUP_COMPRESSION_LEVEL | 3 | zstd level |

use crate::bucket::DEFAULT_BUCKET_LOCATION;
use crate::compression::DEFAULT_COMPRESSION_LEVEL;
use crate::copier::CopyOptions;
use crate::storage::BucketPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::macros::format_description;
use time::UtcOffset;

pub const DEFAULT_TRAQ_ORIGIN: &str = "https://q.trap.jp";
/// Public JSON API endpoint
pub const DEFAULT_GCS_API_ORIGIN: &str = "https://storage.googleapis.com";

const COMPRESSION_LEVEL_MIN: i32 = 1;
const COMPRESSION_LEVEL_MAX: i32 = 22;

/// Error type for configuration loading
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required variables that are unset or empty
    Missing(Vec<&'static str>),
    /// A variable is set but unusable
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(keys) => {
                write!(f, "Missing required environment variables: {}", keys.join(", "))
            }
            ConfigError::Invalid { key, value, reason } => {
                write!(f, "Invalid value {:?} for {}: {}", value, key, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Which storage backend a run uses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreConfig {
    /// Google Cloud Storage
    Gcs { api_origin: String },
    /// Buckets as directories under `root`
    LocalFs { root: PathBuf },
}

/// Webhook destination
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub origin: String,
    pub webhook_id: String,
    pub secret: String,
}

impl WebhookConfig {
    pub fn endpoint(&self) -> String {
        format!(
            "{}/api/v3/webhooks/{}",
            self.origin.trim_end_matches('/'),
            self.webhook_id
        )
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("origin", &self.origin)
            .field("webhook_id", &self.webhook_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Immutable input to one backup run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub local_path: PathBuf,
    pub credentials_path: PathBuf,
    pub project_id: String,
    pub bucket_prefix: String,
    pub storage_class: String,
    pub lifecycle_days: u32,
    pub bucket_location: String,
    pub store: StoreConfig,
    /// Offset used for the bucket date and the reported start time
    pub utc_offset: UtcOffset,
    pub compression_level: i32,
    pub webhook: WebhookConfig,
}

impl RunConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values count as unset
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut missing = Vec::new();
        let mut required = |key: &'static str| {
            let value = get(key);
            if value.is_none() {
                missing.push(key);
            }
            value.unwrap_or_default()
        };

        let local_path = required("LOCAL_PATH");
        let credentials_path = required("GOOGLE_APPLICATION_CREDENTIALS");
        let project_id = required("PROJECT_ID");
        let bucket_prefix = required("BUCKET_NAME");
        let storage_class = required("STORAGECLASS");
        let duration = required("DURATION");
        let webhook_id = required("TRAQ_WEBHOOK_ID");
        let webhook_secret = required("TRAQ_WEBHOOK_SECRET");

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let lifecycle_days = parse_lifecycle_days(&duration)?;

        let store = match get("BACKUP_STORE_TYPE")
            .unwrap_or_else(|| "gcs".to_string())
            .to_lowercase()
            .as_str()
        {
            "gcs" => StoreConfig::Gcs {
                api_origin: get("GCS_API_ORIGIN")
                    .unwrap_or_else(|| DEFAULT_GCS_API_ORIGIN.to_string()),
            },
            "localfs" => {
                let root = get("BACKUP_LOCALFS_ROOT")
                    .ok_or(ConfigError::Missing(vec!["BACKUP_LOCALFS_ROOT"]))?;
                StoreConfig::LocalFs {
                    root: PathBuf::from(root),
                }
            }
            other => {
                return Err(ConfigError::Invalid {
                    key: "BACKUP_STORE_TYPE",
                    value: other.to_string(),
                    reason: "use 'gcs' or 'localfs'".to_string(),
                })
            }
        };

        let utc_offset = match get("BACKUP_UTC_OFFSET") {
            Some(raw) => parse_utc_offset(&raw)?,
            None => UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        };

        let compression_level = match get("BACKUP_COMPRESSION_LEVEL") {
            Some(raw) => parse_compression_level(&raw)?,
            None => DEFAULT_COMPRESSION_LEVEL,
        };

        let config = RunConfig {
            local_path: PathBuf::from(local_path),
            credentials_path: PathBuf::from(credentials_path),
            project_id,
            bucket_prefix,
            storage_class: storage_class.to_uppercase(),
            lifecycle_days,
            bucket_location: get("BUCKET_LOCATION")
                .unwrap_or_else(|| DEFAULT_BUCKET_LOCATION.to_string()),
            store,
            utc_offset,
            compression_level,
            webhook: WebhookConfig {
                origin: get("TRAQ_ORIGIN").unwrap_or_else(|| DEFAULT_TRAQ_ORIGIN.to_string()),
                webhook_id,
                secret: webhook_secret,
            },
        };

        config.verify_invariants();
        Ok(config)
    }

    pub fn bucket_policy(&self) -> BucketPolicy {
        BucketPolicy::with_expiry(
            &self.storage_class,
            &self.bucket_location,
            self.lifecycle_days,
        )
    }

    pub fn copy_options(&self) -> CopyOptions {
        CopyOptions {
            compression_level: self.compression_level,
            ..CopyOptions::default()
        }
    }

    #[inline]
    fn verify_invariants(&self) {
        debug_assert!(self.lifecycle_days > 0, "Invariant: lifecycle_days must be positive");
        debug_assert!(
            (COMPRESSION_LEVEL_MIN..=COMPRESSION_LEVEL_MAX).contains(&self.compression_level),
            "Invariant: compression_level {} out of range",
            self.compression_level
        );
    }
}

fn parse_lifecycle_days(raw: &str) -> Result<u32, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key: "DURATION",
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let days: u32 = raw
        .trim()
        .parse()
        .map_err(|_| invalid("expected a whole number of days"))?;
    if days == 0 {
        return Err(invalid("must be at least 1 day"));
    }
    Ok(days)
}

fn parse_utc_offset(raw: &str) -> Result<UtcOffset, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("utc") || trimmed == "Z" {
        return Ok(UtcOffset::UTC);
    }
    UtcOffset::parse(
        trimmed,
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
    )
    .map_err(|e| ConfigError::Invalid {
        key: "BACKUP_UTC_OFFSET",
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_compression_level(raw: &str) -> Result<i32, ConfigError> {
    match raw.trim().parse::<i32>() {
        Ok(level) if (COMPRESSION_LEVEL_MIN..=COMPRESSION_LEVEL_MAX).contains(&level) => Ok(level),
        _ => Err(ConfigError::Invalid {
            key: "BACKUP_COMPRESSION_LEVEL",
            value: raw.to_string(),
            reason: format!(
                "expected an integer in {}..={}",
                COMPRESSION_LEVEL_MIN, COMPRESSION_LEVEL_MAX
            ),
        }),
    }
}
