//! Attachment storage. Files land on disk under a generated name and a row in
//! `attachment` records who uploaded what, so requests can reference the
//! upload by id only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use campusflow_core::config::AttachmentConfig;
use campusflow_core::domain::request::AttachmentRef;
use campusflow_core::errors::{ApplicationError, ValidationError};

use crate::repositories::RepositoryError;
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredAttachment {
    pub reference: AttachmentRef,
    pub original_name: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("file extension `{0}` is not accepted")]
    UnsupportedExtension(String),
    #[error("file is {size} bytes, limit is {max}")]
    TooLarge { size: u64, max: u64 },
    #[error("file is empty")]
    Empty,
    #[error("attachment io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<AttachmentError> for ApplicationError {
    fn from(value: AttachmentError) -> Self {
        match value {
            AttachmentError::UnsupportedExtension(_)
            | AttachmentError::TooLarge { .. }
            | AttachmentError::Empty => ValidationError::single("file", value.to_string()).into(),
            AttachmentError::Io(error) => ApplicationError::Transient(error.to_string()),
            AttachmentError::Repository(error) => error.into(),
        }
    }
}

/// Size and type limits applied before anything is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentPolicy {
    pub max_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

impl AttachmentPolicy {
    pub fn from_config(config: &AttachmentConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|extension| extension.trim().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Returns the normalized extension of an acceptable upload.
    pub fn check(&self, original_name: &str, size: u64) -> Result<String, AttachmentError> {
        if size == 0 {
            return Err(AttachmentError::Empty);
        }
        if size > self.max_bytes {
            return Err(AttachmentError::TooLarge { size, max: self.max_bytes });
        }
        let extension = Path::new(original_name)
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !self.allowed_extensions.iter().any(|allowed| *allowed == extension) {
            return Err(AttachmentError::UnsupportedExtension(extension));
        }
        Ok(extension)
    }
}

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn put(
        &self,
        original_name: &str,
        bytes: &[u8],
        uploaded_by: &str,
    ) -> Result<StoredAttachment, AttachmentError>;

    /// Actor who uploaded the attachment, `None` when no such upload exists.
    async fn uploader(&self, reference: &AttachmentRef) -> Result<Option<String>, AttachmentError>;
}

fn stored_attachment(
    policy: &AttachmentPolicy,
    original_name: &str,
    bytes: &[u8],
) -> Result<StoredAttachment, AttachmentError> {
    let size_bytes = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    let extension = policy.check(original_name, size_bytes)?;
    Ok(StoredAttachment {
        reference: AttachmentRef(format!("ATT-{}.{extension}", Uuid::new_v4().simple())),
        original_name: original_name.to_owned(),
        size_bytes,
        sha256: format!("{:x}", Sha256::digest(bytes)),
    })
}

pub struct FsAttachmentStore {
    pool: DbPool,
    directory: PathBuf,
    policy: AttachmentPolicy,
}

impl FsAttachmentStore {
    pub fn new(pool: DbPool, directory: impl Into<PathBuf>, policy: AttachmentPolicy) -> Self {
        Self { pool, directory: directory.into(), policy }
    }

    pub fn path_for(&self, reference: &AttachmentRef) -> PathBuf {
        self.directory.join(&reference.0)
    }
}

#[async_trait]
impl AttachmentStore for FsAttachmentStore {
    async fn put(
        &self,
        original_name: &str,
        bytes: &[u8],
        uploaded_by: &str,
    ) -> Result<StoredAttachment, AttachmentError> {
        let stored = stored_attachment(&self.policy, original_name, bytes)?;
        let path = self.path_for(&stored.reference);

        tokio::fs::create_dir_all(&self.directory).await?;
        tokio::fs::write(&path, bytes).await?;

        let inserted = sqlx::query(
            "INSERT INTO attachment (id, original_name, stored_path, size_bytes, sha256,
                                     uploaded_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&stored.reference.0)
        .bind(&stored.original_name)
        .bind(path.to_string_lossy().into_owned())
        .bind(i64::try_from(stored.size_bytes).unwrap_or(i64::MAX))
        .bind(&stored.sha256)
        .bind(uploaded_by)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        if let Err(error) = inserted {
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                tracing::warn!(
                    event_name = "attachments.cleanup.failed",
                    path = %path.display(),
                    error = %cleanup,
                    "could not remove orphaned attachment file"
                );
            }
            return Err(RepositoryError::from(error).into());
        }

        tracing::info!(
            event_name = "attachments.stored",
            attachment_id = %stored.reference.0,
            size_bytes = stored.size_bytes,
            uploaded_by,
            "attachment stored"
        );
        Ok(stored)
    }

    async fn uploader(&self, reference: &AttachmentRef) -> Result<Option<String>, AttachmentError> {
        let uploaded_by: Option<String> =
            sqlx::query_scalar("SELECT uploaded_by FROM attachment WHERE id = ?")
                .bind(&reference.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(RepositoryError::from)?;
        Ok(uploaded_by)
    }
}

pub struct InMemoryAttachmentStore {
    policy: AttachmentPolicy,
    files: RwLock<HashMap<String, (StoredAttachment, String)>>,
}

impl InMemoryAttachmentStore {
    pub fn new(policy: AttachmentPolicy) -> Self {
        Self { policy, files: RwLock::new(HashMap::new()) }
    }
}

impl Default for InMemoryAttachmentStore {
    fn default() -> Self {
        Self::new(AttachmentPolicy::from_config(&campusflow_core::config::AppConfig::default().attachments))
    }
}

#[async_trait]
impl AttachmentStore for InMemoryAttachmentStore {
    async fn put(
        &self,
        original_name: &str,
        bytes: &[u8],
        uploaded_by: &str,
    ) -> Result<StoredAttachment, AttachmentError> {
        let stored = stored_attachment(&self.policy, original_name, bytes)?;
        self.files
            .write()
            .await
            .insert(stored.reference.0.clone(), (stored.clone(), uploaded_by.to_owned()));
        Ok(stored)
    }

    async fn uploader(&self, reference: &AttachmentRef) -> Result<Option<String>, AttachmentError> {
        Ok(self.files.read().await.get(&reference.0).map(|(_, uploaded_by)| uploaded_by.clone()))
    }
}
