//! Filesystem storage for source documents and rendered artifacts.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use slug::slugify;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("refusing to store an empty payload")]
    EmptyPayload,
    #[error("stored file size exceeds supported range")]
    SizeOverflow,
}

/// Result of storing a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub stored_path: String,
    pub checksum: String,
    pub size_bytes: i64,
}

#[derive(Debug)]
pub struct DocumentStorage {
    root: PathBuf,
}

impl DocumentStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Write `data` under a dated, collision-free path derived from `original_name`.
    pub async fn store(&self, original_name: &str, data: Bytes) -> Result<StoredArtifact, StorageError> {
        if data.is_empty() {
            return Err(StorageError::EmptyPayload);
        }

        let stored_path = build_stored_path(original_name);
        let absolute = self.resolve(&stored_path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&absolute).await?;
        if let Err(err) = file.write_all(&data).await {
            drop(file);
            let _ = fs::remove_file(&absolute).await;
            return Err(StorageError::Io(err));
        }
        file.flush().await?;

        let checksum = hex::encode(Sha256::digest(&data));
        let size_bytes = i64::try_from(data.len()).map_err(|_| StorageError::SizeOverflow)?;

        Ok(StoredArtifact {
            stored_path,
            checksum,
            size_bytes,
        })
    }

    pub async fn read(&self, stored_path: &str) -> Result<Bytes, StorageError> {
        let absolute = self.resolve(stored_path)?;
        let data = fs::read(absolute).await?;
        Ok(Bytes::from(data))
    }

    /// Remove the stored payload. Missing files are treated as success.
    pub async fn delete(&self, stored_path: &str) -> Result<(), StorageError> {
        let absolute = self.resolve(stored_path)?;
        match fs::remove_file(&absolute).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    fn resolve(&self, stored_path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(stored_path);
        if stored_path.is_empty()
            || relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(StorageError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }
}

fn build_stored_path(original_name: &str) -> String {
    let (year, month, day) = time::OffsetDateTime::now_utc().to_calendar_date();
    let directory = format!("{year}/{:02}/{:02}", month as u8, day);
    let identifier = Uuid::new_v4();
    let filename = sanitize_filename(original_name);
    format!("{directory}/{identifier}-{filename}")
}

pub(crate) fn sanitize_filename(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("document");
    let mut base = slugify(stem);
    if base.is_empty() {
        base = "document".to_string();
    }

    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.trim_matches('.').to_ascii_lowercase())
        .filter(|value| !value.is_empty());

    match extension {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}

/// File name for an artifact rendered from `document_name` in format `ext`.
pub fn artifact_name(document_name: &str, ext: &str) -> String {
    let stem = Path::new(document_name)
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("document");
    format!("{stem}.{ext}")
}
