//! Service configuration
//!
//! Everything is read from the environment (Cloud Run injects it). The
//! service-account key is mounted as a file and referenced by path.

use ::config::{Environment, Settings};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::sync::ReconcileOptions;

/// Mounted Cloud Run secret
const DEFAULT_KEY_FILE: &str = "/etc/secrets/key.json";
const DEFAULT_TOPIC: &str = "gmail-watch";
const DEFAULT_LABEL: &str = "INBOX";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_PARALLELISM: usize = 4;
const DEFAULT_PASS_DEADLINE_SECS: u64 = 240;
/// Cloud Run's longest request timeout
const MAX_PASS_DEADLINE_SECS: u64 = 3600;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const STATE_DB_FILE: &str = "state.sqlite";

/// Where attachment payloads go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobBackend {
    /// Cloud Storage (production)
    Gcs,
    /// Local directory tree, optionally zstd-compressed
    File {
        root: PathBuf,
        compression_level: Option<i32>,
    },
}

/// Runtime configuration for the sync service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Mailbox being monitored
    pub identity: String,
    pub project: String,
    pub bucket: String,
    pub key_file: PathBuf,
    /// Short topic name, qualified with the project when watching
    pub topic: String,
    pub label: String,
    pub port: u16,
    pub state_db: PathBuf,
    pub blob_backend: BlobBackend,
    pub parallelism: usize,
    /// Zero disables the deadline
    pub pass_deadline: Option<Duration>,
    pub http_timeout: Duration,
}

impl ServiceConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> SyncResult<Self> {
        Self::from_settings(&Environment)
    }

    /// Load configuration from any settings source
    pub fn from_settings(settings: &impl Settings) -> SyncResult<Self> {
        let required = |name: &str| settings.required(name).map_err(configuration);

        let identity = required("MONITORED_EMAIL_ADDRESS")?;
        let project = required("GOOGLE_CLOUD_PROJECT")?;
        let bucket = required("GCS_BUCKET")?;

        let state_db = match settings.lookup("STATE_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => ::config::data_path(STATE_DB_FILE).ok_or_else(|| {
                SyncError::Configuration(
                    "STATE_DB_PATH not set and no data directory available".to_string(),
                )
            })?,
        };

        let backend = settings.or("BLOB_BACKEND", "gcs").to_ascii_lowercase();
        let blob_backend = match backend.as_str() {
            "gcs" => BlobBackend::Gcs,
            "file" => BlobBackend::File {
                root: PathBuf::from(required("BLOB_ROOT")?),
                compression_level: compression_level(settings)?,
            },
            other => {
                return Err(SyncError::Configuration(format!(
                    "Unknown BLOB_BACKEND {:?} (expected gcs or file)",
                    other
                )));
            }
        };

        let parallelism: usize = parse(settings, "SYNC_PARALLELISM", DEFAULT_PARALLELISM)?;
        if parallelism == 0 {
            return Err(SyncError::Configuration(
                "SYNC_PARALLELISM must be at least 1".to_string(),
            ));
        }

        let deadline_secs: u64 =
            parse(settings, "SYNC_PASS_DEADLINE_SECS", DEFAULT_PASS_DEADLINE_SECS)?;
        if deadline_secs > MAX_PASS_DEADLINE_SECS {
            return Err(SyncError::Configuration(format!(
                "SYNC_PASS_DEADLINE_SECS must be at most {}",
                MAX_PASS_DEADLINE_SECS
            )));
        }
        let timeout_secs: u64 = parse(settings, "HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?;

        Ok(Self {
            identity,
            project,
            bucket,
            key_file: PathBuf::from(settings.or("GMAIL_KEY_FILE", DEFAULT_KEY_FILE)),
            topic: settings.or("GMAIL_PUSH_TOPIC", DEFAULT_TOPIC),
            label: settings.or("GMAIL_WATCH_LABEL", DEFAULT_LABEL),
            port: parse(settings, "PORT", DEFAULT_PORT)?,
            state_db,
            blob_backend,
            parallelism,
            pass_deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
            http_timeout: Duration::from_secs(timeout_secs.max(1)),
        })
    }

    /// Options for the reconciler built from this configuration
    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            label: self.label.clone(),
            bucket: self.bucket.clone(),
            parallelism: self.parallelism,
            pass_deadline: self.pass_deadline,
        }
    }
}

/// `BLOB_COMPRESSION_LEVEL`: unset or 0 stores files as-is, 1-22 selects a zstd level
fn compression_level(settings: &impl Settings) -> SyncResult<Option<i32>> {
    let level: i32 = parse(settings, "BLOB_COMPRESSION_LEVEL", 0)?;
    match level {
        0 => Ok(None),
        1..=22 => Ok(Some(level)),
        _ => Err(SyncError::Configuration(format!(
            "BLOB_COMPRESSION_LEVEL must be between 0 and 22, got {}",
            level
        ))),
    }
}

fn parse<T>(settings: &impl Settings, name: &str, default: T) -> SyncResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    settings.parse_or(name, default).map_err(configuration)
}

fn configuration(e: anyhow::Error) -> SyncError {
    SyncError::Configuration(format!("{:#}", e))
}
