//! Object storage boundary
//!
//! The job reads the reference recording from, and writes the result to,
//! an [`ObjectStore`]. Locations are either Cloud Storage objects
//! (`gs://bucket/object`) or local paths; [`StorageRouter`] sends each to the
//! matching backend.

pub mod gcs;
pub mod local;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};

use crate::config::{RetryConfig, StorageConfig};
use crate::error::StorageError;

pub use gcs::GcsStore;
pub use local::LocalStore;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Where an object lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    Gcs { bucket: String, object: String },
    Local(PathBuf),
}

impl StorageLocation {
    /// Parse a location string
    ///
    /// - `gs://bucket/object` is a Cloud Storage object
    /// - `file://path`, absolute paths and paths starting with `.` are local
    /// - anything else is an object key in `default_bucket` when one is
    ///   configured, and a local path otherwise
    pub fn parse(raw: &str, default_bucket: Option<&str>) -> StorageResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(StorageError::InvalidLocation("empty location".to_string()));
        }

        if let Some(rest) = raw.strip_prefix("gs://") {
            let (bucket, object) = rest.split_once('/').ok_or_else(|| {
                StorageError::InvalidLocation(format!("{} has no object name", raw))
            })?;
            return Self::gcs(bucket, object);
        }

        if let Some(path) = raw.strip_prefix("file://") {
            if path.is_empty() {
                return Err(StorageError::InvalidLocation(format!("{} has no path", raw)));
            }
            return Ok(Self::Local(PathBuf::from(path)));
        }

        if raw.contains("://") {
            return Err(StorageError::InvalidLocation(format!(
                "unsupported scheme in {}",
                raw
            )));
        }

        let path = Path::new(raw);
        if path.is_absolute() || raw.starts_with('.') {
            return Ok(Self::Local(path.to_path_buf()));
        }

        match default_bucket.filter(|b| !b.trim().is_empty()) {
            Some(bucket) => Self::gcs(bucket, raw),
            None => Ok(Self::Local(path.to_path_buf())),
        }
    }

    fn gcs(bucket: &str, object: &str) -> StorageResult<Self> {
        let object = object.trim_start_matches('/');
        if bucket.is_empty() || object.is_empty() {
            return Err(StorageError::InvalidLocation(format!(
                "gs://{}/{} needs both a bucket and an object name",
                bucket, object
            )));
        }
        Ok(Self::Gcs {
            bucket: bucket.to_string(),
            object: object.to_string(),
        })
    }

    /// Lowercase file extension of the object or path
    pub fn extension(&self) -> Option<String> {
        let name = match self {
            Self::Gcs { object, .. } => Path::new(object.as_str()),
            Self::Local(path) => path.as_path(),
        };
        name.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gcs { bucket, object } => write!(f, "gs://{}/{}", bucket, object),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Bytes read from a store
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    /// Content type recorded by the store, if any
    pub content_type: Option<String>,
}

/// Read/write access to objects
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the object; [`StorageError::NotFound`] when it does not exist
    async fn fetch(&self, location: &StorageLocation) -> StorageResult<StoredObject>;

    /// Write the object and return the confirmed location
    async fn store(
        &self,
        location: &StorageLocation,
        bytes: &[u8],
        content_type: &str,
    ) -> StorageResult<StorageLocation>;
}

/// Dispatches locations to the Cloud Storage or local backend
pub struct StorageRouter {
    default_bucket: Option<String>,
    gcs: GcsStore,
    local: LocalStore,
}

impl StorageRouter {
    pub fn new(config: &StorageConfig) -> StorageResult<Self> {
        Ok(Self {
            default_bucket: config.default_bucket.clone(),
            gcs: GcsStore::new(config)?,
            local: LocalStore::new(),
        })
    }

    /// Parse `raw` against the configured default bucket
    pub fn resolve(&self, raw: &str) -> StorageResult<StorageLocation> {
        StorageLocation::parse(raw, self.default_bucket.as_deref())
    }
}

#[async_trait]
impl ObjectStore for StorageRouter {
    async fn fetch(&self, location: &StorageLocation) -> StorageResult<StoredObject> {
        match location {
            StorageLocation::Gcs { .. } => self.gcs.fetch(location).await,
            StorageLocation::Local(_) => self.local.fetch(location).await,
        }
    }

    async fn store(
        &self,
        location: &StorageLocation,
        bytes: &[u8],
        content_type: &str,
    ) -> StorageResult<StorageLocation> {
        match location {
            StorageLocation::Gcs { .. } => self.gcs.store(location, bytes, content_type).await,
            StorageLocation::Local(_) => self.local.store(location, bytes, content_type).await,
        }
    }
}

/// [`ObjectStore::store`] with bounded exponential backoff on transient failures
pub async fn store_with_retry(
    store: &dyn ObjectStore,
    location: &StorageLocation,
    bytes: &[u8],
    content_type: &str,
    policy: &RetryConfig,
) -> StorageResult<StorageLocation> {
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = Duration::from_millis(policy.initial_backoff_ms);
    let mut attempt = 1;

    loop {
        match store.store(location, bytes, content_type).await {
            Ok(confirmed) => {
                if attempt > 1 {
                    info!("Upload to {} succeeded on attempt {}", location, attempt);
                }
                return Ok(confirmed);
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(
                    "Upload to {} failed (attempt {}/{}): {}; retrying in {} ms",
                    location,
                    attempt,
                    max_attempts,
                    err,
                    backoff.as_millis()
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.mul_f64(policy.backoff_multiplier.max(1.0));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
