use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectMeta, ObjectStore};
use tracing::debug;

use crate::error::{AppError, BackendError};
use crate::utils::config::{AppConfig, StorageKind};
use crate::utils::retry::{retry_transient, RetryPolicy};

use super::document_uri::DocumentUri;

pub type DynStore = Arc<dyn ObjectStore>;

/// Attempts at finding a free `{date}_{stem}(n).pdf` name before falling back to a timestamp.
const MAX_NAME_CANDIDATES: usize = 1000;

/// Existence and metadata of a stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMetadata {
    pub uri: DocumentUri,
    pub size_bytes: u64,
    pub content_type: String,
}

/// Storage manager over the document bucket.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    bucket: String,
}

impl StorageManager {
    /// Create a new StorageManager for the configured backend and bucket.
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let store = create_storage_backend(cfg).await?;

        Ok(Self {
            store,
            bucket: cfg.gcs_bucket_name.clone(),
        })
    }

    /// Create a StorageManager with a custom storage backend.
    pub fn with_backend(store: DynStore, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Logical bucket name every document reference must point into.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Store bytes at the specified location.
    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    /// Retrieve bytes from the specified location, buffered in memory.
    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    pub async fn head(&self, location: &str) -> object_store::Result<ObjectMeta> {
        let path = ObjPath::from(location);
        self.store.head(&path).await
    }

    /// List all objects below the specified prefix.
    pub async fn list(&self, prefix: Option<&str>) -> object_store::Result<Vec<ObjectMeta>> {
        let prefix_path = prefix.map(ObjPath::from);
        self.store.list(prefix_path.as_ref()).try_collect().await
    }

    /// Check if an object exists at the specified location.
    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    /// Resolve a document reference to its metadata.
    ///
    /// Transient store failures are retried per `policy`; a missing object maps to
    /// `AppError::NotFound`.
    pub async fn resolve_document(
        &self,
        uri: &DocumentUri,
        policy: &RetryPolicy,
        timeout: Duration,
    ) -> Result<DocumentMetadata, AppError> {
        self.ensure_bucket(uri)?;
        let meta = retry_transient(policy, "storage_head", move || async move {
            tokio::time::timeout(timeout, self.head(uri.object()))
                .await
                .map_err(|_| BackendError::Transient("object store head timed out".into()))?
                .map_err(classify_store_error)
        })
        .await
        .map_err(|err| storage_error(uri, err, policy))?;

        debug!(uri = %uri, size = meta.size, "Resolved document");

        Ok(DocumentMetadata {
            uri: uri.clone(),
            size_bytes: u64::try_from(meta.size).unwrap_or(u64::MAX),
            content_type: guess_mime_type(uri.object()),
        })
    }

    /// Download the full document bytes with the same retry semantics as
    /// [`StorageManager::resolve_document`].
    pub async fn fetch_document(
        &self,
        uri: &DocumentUri,
        policy: &RetryPolicy,
        timeout: Duration,
    ) -> Result<Bytes, AppError> {
        self.ensure_bucket(uri)?;
        retry_transient(policy, "storage_get", move || async move {
            tokio::time::timeout(timeout, self.get(uri.object()))
                .await
                .map_err(|_| BackendError::Transient("object store read timed out".into()))?
                .map_err(classify_store_error)
        })
        .await
        .map_err(|err| storage_error(uri, err, policy))
    }

    /// First free object name of the form `{date}_{stem}.pdf`, then `{date}_{stem}(n).pdf`.
    pub async fn unique_upload_name(&self, stem: &str, date: &str) -> object_store::Result<String> {
        let base = format!("{date}_{stem}");
        let first = format!("{base}.pdf");
        if !self.exists(&first).await? {
            return Ok(first);
        }

        for counter in 1..MAX_NAME_CANDIDATES {
            let candidate = format!("{base}({counter}).pdf");
            if !self.exists(&candidate).await? {
                return Ok(candidate);
            }
        }

        Ok(format!("{base}_{}.pdf", Utc::now().format("%H%M%S%3f")))
    }

    fn ensure_bucket(&self, uri: &DocumentUri) -> Result<(), AppError> {
        if uri.bucket() == self.bucket {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "Bucket '{}' is not served by this deployment",
                uri.bucket()
            )))
        }
    }
}

/// Classify an object store failure for the retry wrapper.
pub fn classify_store_error(err: object_store::Error) -> BackendError {
    match err {
        object_store::Error::NotFound { path, .. } => BackendError::NotFound(path),
        object_store::Error::InvalidPath { source } => BackendError::Permanent(source.to_string()),
        object_store::Error::PermissionDenied { path, source } => {
            BackendError::Permanent(format!("permission denied for {path}: {source}"))
        }
        object_store::Error::Unauthenticated { path, source } => {
            BackendError::Permanent(format!("unauthenticated for {path}: {source}"))
        }
        object_store::Error::NotSupported { source } => BackendError::Permanent(source.to_string()),
        other => BackendError::Transient(other.to_string()),
    }
}

fn storage_error(uri: &DocumentUri, err: BackendError, policy: &RetryPolicy) -> AppError {
    match err {
        BackendError::NotFound(_) => AppError::NotFound(format!("Document {uri} does not exist")),
        BackendError::Transient(message) => AppError::TransientStorage {
            message,
            retry_after: policy.retry_after,
        },
        BackendError::Permanent(message) => AppError::Backend(message),
    }
}

/// Guess the MIME type from a file name.
pub fn guess_mime_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or(mime::APPLICATION_OCTET_STREAM)
        .to_string()
}

/// Create a storage backend based on configuration.
async fn create_storage_backend(cfg: &AppConfig) -> object_store::Result<DynStore> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_base_dir(cfg);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| {
                    object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    }
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base)?;
            Ok(Arc::new(store))
        }
        StorageKind::Memory => {
            Ok(Arc::new(InMemory::new()))
        }
        StorageKind::Gcs => {
            let store = GoogleCloudStorageBuilder::from_env()
                .with_bucket_name(&cfg.gcs_bucket_name)
                .build()?;
            Ok(Arc::new(store))
        }
    }
}

/// Resolve the base directory used for local storage.
///
/// If `data_dir` is relative, it is resolved against the current working directory.
fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    if cfg.data_dir.starts_with('/') {
        PathBuf::from(&cfg.data_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(&cfg.data_dir)
    }
}
