use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

/// "Store bytes, hand back the handle" collaborator. The core only ever
/// sees opaque handles; serving and persistence details live behind this.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn save(&self, handle: &str, mime: &str, bytes: &[u8]) -> Result<(), FileStoreError>;
    async fn load(&self, handle: &str) -> Result<(Vec<u8>, String), FileStoreError>;
    async fn delete(&self, handle: &str) -> Result<(), FileStoreError>;
}

/// Filesystem-backed store; files are content-addressed so a duplicate
/// upload is detected by handle collision.
pub struct FsFileStore {
    root: PathBuf,
}

impl FsFileStore {
    pub fn new() -> Self {
        let root = std::env::var("GALLERIA_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"))
            .join("files");
        Self { root }
    }

    fn path_for(&self, handle: &str) -> PathBuf {
        self.root.join(handle)
    }
}

impl Default for FsFileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileStore for FsFileStore {
    async fn save(&self, handle: &str, _mime: &str, bytes: &[u8]) -> Result<(), FileStoreError> {
        let path = self.path_for(handle);
        if path.exists() {
            return Err(FileStoreError::Duplicate);
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| FileStoreError::Other(e.to_string()))?;
        }
        std::fs::write(&path, bytes).map_err(|e| FileStoreError::Other(e.to_string()))?;
        Ok(())
    }

    async fn load(&self, handle: &str) -> Result<(Vec<u8>, String), FileStoreError> {
        let bytes =
            std::fs::read(self.path_for(handle)).map_err(|_| FileStoreError::NotFound)?;
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        Ok((bytes, mime))
    }

    async fn delete(&self, handle: &str) -> Result<(), FileStoreError> {
        // treat missing as already deleted
        let _ = std::fs::remove_file(self.path_for(handle));
        Ok(())
    }
}

pub fn build_file_store() -> Arc<dyn FileStore> {
    let store = FsFileStore::new();
    info!(root = %store.root.display(), "using filesystem file store");
    Arc::new(store)
}
