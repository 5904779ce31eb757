//! Filesystem-backed store

use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use log::debug;

use super::{ObjectStore, StorageLocation, StorageResult, StoredObject};
use crate::error::StorageError;

/// Stores objects as plain files
#[derive(Debug, Clone, Default)]
pub struct LocalStore;

impl LocalStore {
    pub fn new() -> Self {
        Self
    }

    fn path<'a>(&self, location: &'a StorageLocation) -> StorageResult<&'a Path> {
        match location {
            StorageLocation::Local(path) => Ok(path),
            other => Err(StorageError::InvalidLocation(format!(
                "{} is not a local path",
                other
            ))),
        }
    }
}

fn content_type_for(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let mime = match ext.as_str() {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "m4a" | "mp4" => "audio/mp4",
        "aac" => "audio/aac",
        _ => return None,
    };
    Some(mime.to_string())
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn fetch(&self, location: &StorageLocation) -> StorageResult<StoredObject> {
        let path = self.path(location)?;
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(path.display().to_string()),
            _ => StorageError::Io(e),
        })?;
        debug!("Read {} bytes from {}", bytes.len(), path.display());
        Ok(StoredObject {
            bytes,
            content_type: content_type_for(path),
        })
    }

    async fn store(
        &self,
        location: &StorageLocation,
        bytes: &[u8],
        _content_type: &str,
    ) -> StorageResult<StorageLocation> {
        let path = self.path(location)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(location.clone())
    }
}
