use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::azure::MicrosoftAzureBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Blob storage over a pluggable `object_store` backend. Holds the original
/// uploaded bytes; chunk text and vectors live elsewhere. `local_base` is
/// `Some` only for the local-filesystem backend.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    local_base: Option<PathBuf>,
}

impl StorageManager {
    /// Builds the backend selected by config. Missing Azure credentials fail
    /// here, at construction, rather than on the first write.
    pub async fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        match cfg.storage {
            StorageKind::Local => {
                let base = resolve_base_dir(cfg);
                tokio::fs::create_dir_all(&base).await?;
                let store =
                    LocalFileSystem::new_with_prefix(&base).map_err(AppError::ObjectStore)?;
                Ok(Self {
                    store: Arc::new(store),
                    local_base: Some(base),
                })
            }
            StorageKind::Memory => Ok(Self {
                store: Arc::new(InMemory::new()),
                local_base: None,
            }),
            StorageKind::Azure => {
                if cfg.azure_storage_account.is_empty() || cfg.azure_storage_access_key.is_empty()
                {
                    return Err(AppError::BackendUnavailable(
                        "azure storage selected but account or access key is not configured"
                            .to_string(),
                    ));
                }
                let store = MicrosoftAzureBuilder::new()
                    .with_account(&cfg.azure_storage_account)
                    .with_access_key(&cfg.azure_storage_access_key)
                    .with_container_name(&cfg.azure_storage_container)
                    .build()
                    .map_err(AppError::ObjectStore)?;
                Ok(Self {
                    store: Arc::new(store),
                    local_base: None,
                })
            }
        }
    }

    /// Resolved base directory when using the local backend.
    pub fn local_base_path(&self) -> Option<&Path> {
        self.local_base.as_deref()
    }

    /// Object location of a document blob: `documents/{document_id}/{filename}`.
    pub fn document_location(document_id: &str, filename: &str) -> String {
        format!("documents/{document_id}/{filename}")
    }

    /// Prefix under which all blobs of one document live.
    pub fn document_prefix(document_id: &str) -> String {
        format!("documents/{document_id}")
    }

    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        self.store
            .put(
                &ObjPath::from(location),
                object_store::PutPayload::from_bytes(data),
            )
            .await
            .map(|_| ())
    }

    /// Fetches an object fully buffered.
    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        self.store.get(&ObjPath::from(location)).await?.bytes().await
    }

    /// Removes every object below `prefix`. On the local backend the emptied
    /// blob directory is removed as well, best effort.
    pub async fn delete_prefix(&self, prefix: &str) -> object_store::Result<()> {
        let scope = ObjPath::from(prefix);
        let matches = self
            .store
            .list(Some(&scope))
            .map_ok(|meta| meta.location)
            .boxed();
        let deleted = self
            .store
            .delete_stream(matches)
            .try_collect::<Vec<_>>()
            .await?;
        debug!(prefix = %prefix, count = deleted.len(), "deleted blobs under prefix");

        self.remove_local_dir(prefix).await;
        Ok(())
    }

    pub async fn list(
        &self,
        prefix: Option<&str>,
    ) -> object_store::Result<Vec<object_store::ObjectMeta>> {
        let scope = prefix.map(ObjPath::from);
        self.store.list(scope.as_ref()).try_collect().await
    }

    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        match self.store.head(&ObjPath::from(location)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Document prefixes are a single directory level under the base; only
    /// that directory is removed, and only once it is empty.
    async fn remove_local_dir(&self, prefix: &str) {
        let Some(base) = &self.local_base else {
            return;
        };

        let relative = Path::new(prefix);
        let suspicious = relative.is_absolute()
            || relative
                .components()
                .any(|part| matches!(part, Component::ParentDir | Component::Prefix(_)));
        if suspicious {
            warn!(prefix = %prefix, "refusing directory cleanup outside the storage base");
            return;
        }

        match tokio::fs::remove_dir(base.join(relative)).await {
            Ok(()) => {}
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::DirectoryNotEmpty) => {
            }
            Err(err) => {
                debug!(error = %err, prefix = %prefix, "could not remove emptied blob directory");
            }
        }
    }
}

/// Absolute base directory for local blobs; a relative `data_dir` is anchored
/// at the current working directory.
fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    let dir = Path::new(&cfg.data_dir);
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(dir)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl StorageManager {
    /// In-memory storage for tests.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            local_base: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_round_trip_and_delete() {
        let storage = StorageManager::memory();
        assert!(storage.local_base_path().is_none());

        let location = StorageManager::document_location("doc-a", "notes.txt");
        storage
            .put(&location, Bytes::from_static(b"original upload bytes"))
            .await
            .expect("put");

        let fetched = storage.get(&location).await.expect("get");
        assert_eq!(fetched.as_ref(), b"original upload bytes");
        assert!(storage.exists(&location).await.expect("exists"));

        storage
            .delete_prefix(&StorageManager::document_prefix("doc-a"))
            .await
            .expect("delete");
        assert!(!storage.exists(&location).await.expect("exists after delete"));
    }

    #[tokio::test]
    async fn local_backend_persists_and_cleans_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = AppConfig {
            data_dir: dir.path().to_string_lossy().into_owned(),
            storage: StorageKind::Local,
            ..Default::default()
        };
        let storage = StorageManager::new(&cfg).await.expect("create storage");
        let base = storage
            .local_base_path()
            .expect("local base dir")
            .to_path_buf();
        assert_eq!(base, dir.path());

        let location = StorageManager::document_location("doc-b", "report.pdf");
        storage
            .put(&location, Bytes::from_static(b"%PDF-1.4 fake"))
            .await
            .expect("put");

        let blob_dir = base.join("documents/doc-b");
        tokio::fs::metadata(&blob_dir)
            .await
            .expect("blob directory exists after write");

        storage
            .delete_prefix(&StorageManager::document_prefix("doc-b"))
            .await
            .expect("delete");
        assert!(!storage.exists(&location).await.expect("exists after delete"));
        assert!(
            tokio::fs::metadata(&blob_dir).await.is_err(),
            "emptied blob directory should be removed"
        );
        tokio::fs::metadata(&base)
            .await
            .expect("base directory remains intact");
    }

    #[tokio::test]
    async fn list_scopes_to_document_prefix() {
        let storage = StorageManager::memory();
        for (doc, name) in [
            ("doc-1", "a.txt"),
            ("doc-1", "a.extracted.txt"),
            ("doc-2", "b.md"),
        ] {
            storage
                .put(
                    &StorageManager::document_location(doc, name),
                    Bytes::from_static(b"x"),
                )
                .await
                .expect("put");
        }

        let everything = storage.list(None).await.expect("list all");
        assert_eq!(everything.len(), 3);

        let doc_1 = storage
            .list(Some("documents/doc-1/"))
            .await
            .expect("list doc-1");
        assert_eq!(doc_1.len(), 2);

        let missing = storage
            .list(Some("documents/ghost/"))
            .await
            .expect("list missing");
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn azure_without_credentials_fails_at_construction() {
        let cfg = AppConfig {
            storage: StorageKind::Azure,
            ..Default::default()
        };
        let result = StorageManager::new(&cfg).await;
        assert!(matches!(result, Err(AppError::BackendUnavailable(_))));
    }

    #[test]
    fn document_locations_are_stable() {
        assert_eq!(
            StorageManager::document_location("abc123", "notes.txt"),
            "documents/abc123/notes.txt"
        );
        assert_eq!(
            StorageManager::document_prefix("abc123"),
            "documents/abc123"
        );
    }
}
