//! Google Cloud Storage over the JSON API
//!
//! Downloads use `GET /storage/v1/b/{bucket}/o/{object}?alt=media`, uploads
//! the simple media upload `POST /upload/storage/v1/b/{bucket}/o`.
//! Credentials come from a static bearer token or from the metadata server
//! of the machine the job runs on.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{ObjectStore, StorageLocation, StorageResult, StoredObject};
use crate::config::StorageConfig;
use crate::error::StorageError;

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh cached tokens this long before they expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug)]
enum TokenSource {
    Static(String),
    Metadata(Mutex<Option<CachedToken>>),
    /// No credentials; used against emulators
    Anonymous,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

/// Cloud Storage backend
#[derive(Debug)]
pub struct GcsStore {
    client: Client,
    endpoint: Url,
    tokens: TokenSource,
    metadata_url: String,
}

impl GcsStore {
    pub fn new(config: &StorageConfig) -> StorageResult<Self> {
        let endpoint_str = config.gcs_endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let endpoint = Url::parse(endpoint_str).map_err(|e| {
            StorageError::InvalidLocation(format!("invalid GCS endpoint {}: {}", endpoint_str, e))
        })?;

        let tokens = match (&config.access_token, &config.gcs_endpoint) {
            (Some(token), _) => TokenSource::Static(token.clone()),
            (None, Some(_)) => TokenSource::Anonymous,
            (None, None) => TokenSource::Metadata(Mutex::new(None)),
        };

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            tokens,
            metadata_url: METADATA_TOKEN_URL.to_string(),
        })
    }

    fn object_url(&self, bucket: &str, object: &str) -> StorageResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidLocation(format!("{} cannot be a base URL", self.endpoint)))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", bucket, "o", object]);
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }

    fn upload_url(&self, bucket: &str, object: &str) -> StorageResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidLocation(format!("{} cannot be a base URL", self.endpoint)))?
            .pop_if_empty()
            .extend(["upload", "storage", "v1", "b", bucket, "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", object);
        Ok(url)
    }

    async fn authorize(&self, request: RequestBuilder) -> StorageResult<RequestBuilder> {
        let token = match &self.tokens {
            TokenSource::Static(token) => token.clone(),
            TokenSource::Anonymous => return Ok(request),
            TokenSource::Metadata(cache) => {
                let mut cache = cache.lock().await;
                match cache.as_ref() {
                    Some(cached) if cached.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN => {
                        cached.token.clone()
                    }
                    _ => {
                        let fresh = self.fetch_metadata_token().await?;
                        let token = fresh.token.clone();
                        *cache = Some(fresh);
                        token
                    }
                }
            }
        };
        Ok(request.header(AUTHORIZATION, format!("Bearer {}", token)))
    }

    async fn fetch_metadata_token(&self) -> StorageResult<CachedToken> {
        debug!("Requesting access token from the metadata server");
        let response = self
            .client
            .get(&self.metadata_url)
            .header("Metadata-Flavor", "Google")
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| StorageError::Http(format!("metadata server unreachable: {}", e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(StorageError::Http(format!("metadata server returned {}", status)));
        }
        if !status.is_success() {
            return Err(StorageError::Auth(format!("metadata server returned {}", status)));
        }

        let token: MetadataToken = response
            .json()
            .await
            .map_err(|e| StorageError::Auth(format!("invalid metadata token response: {}", e)))?;

        Ok(CachedToken {
            token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }

    fn split<'a>(&self, location: &'a StorageLocation) -> StorageResult<(&'a str, &'a str)> {
        match location {
            StorageLocation::Gcs { bucket, object } => Ok((bucket, object)),
            other => Err(StorageError::InvalidLocation(format!(
                "{} is not a Cloud Storage location",
                other
            ))),
        }
    }
}

/// Map a non-success response onto the storage taxonomy
fn status_error(status: StatusCode, location: &StorageLocation, body: &str) -> StorageError {
    match status {
        StatusCode::NOT_FOUND => StorageError::NotFound(location.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            StorageError::Auth(format!("{} for {}: {}", status, location, body.trim()))
        }
        _ => StorageError::Http(format!("{} for {}: {}", status, location, body.trim())),
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn fetch(&self, location: &StorageLocation) -> StorageResult<StoredObject> {
        let (bucket, object) = self.split(location)?;
        let url = self.object_url(bucket, object)?;

        let response = self.authorize(self.client.get(url)).await?.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, location, &body));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        info!("Downloaded {} ({} bytes)", location, bytes.len());

        Ok(StoredObject {
            bytes: bytes.to_vec(),
            content_type,
        })
    }

    async fn store(
        &self,
        location: &StorageLocation,
        bytes: &[u8],
        content_type: &str,
    ) -> StorageResult<StorageLocation> {
        let (bucket, object) = self.split(location)?;
        let url = self.upload_url(bucket, object)?;

        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes.to_vec());
        let response = self.authorize(request).await?.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, location, &body));
        }

        info!("Uploaded {} ({} bytes)", location, bytes.len());
        Ok(location.clone())
    }
}
