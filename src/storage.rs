//! Blob store for update attachments.
//!
//! Files live flat under the uploads directory with generated names; the
//! database keeps the original name and a `/uploads/<stored_name>` path
//! reference for clients. Only image and PDF attachments are accepted.

use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

use crate::reconciler::NewFile;

/// Maximum attachment size, 5 MiB.
pub const MAX_FILE_BYTES: usize = 5 * 1024 * 1024;

const ALLOWED_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("application/pdf", "pdf"),
];

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("File exceeds the {MAX_FILE_BYTES} byte limit")]
    TooLarge,

    #[error("Invalid file name")]
    InvalidName,

    #[error("File not found")]
    NotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn extension_for(mime_type: &str) -> Option<&'static str> {
    ALLOWED_TYPES
        .iter()
        .find(|(mime, _)| *mime == mime_type)
        .map(|(_, ext)| *ext)
}

/// Persist an uploaded attachment and return the metadata row to record.
pub fn store_attachment(
    uploads_dir: &Path,
    original_name: &str,
    mime_type: &str,
    bytes: &[u8],
) -> Result<NewFile, StorageError> {
    let ext = extension_for(mime_type)
        .ok_or_else(|| StorageError::UnsupportedType(mime_type.to_string()))?;
    if bytes.len() > MAX_FILE_BYTES {
        return Err(StorageError::TooLarge);
    }

    let stored_name = format!("{}.{ext}", Uuid::new_v4());
    std::fs::create_dir_all(uploads_dir)?;
    std::fs::write(uploads_dir.join(&stored_name), bytes)?;

    Ok(NewFile {
        original_name: original_name.to_string(),
        stored_name: stored_name.clone(),
        path: format!("/uploads/{stored_name}"),
        mime_type: mime_type.to_string(),
    })
}

/// Resolve a stored name to its on-disk path for serving. Rejects anything
/// that is not a bare file name.
pub fn resolve_attachment(uploads_dir: &Path, stored_name: &str) -> Result<PathBuf, StorageError> {
    if stored_name.is_empty()
        || stored_name.contains('/')
        || stored_name.contains('\\')
        || stored_name.contains("..")
    {
        return Err(StorageError::InvalidName);
    }
    let path = uploads_dir.join(stored_name);
    if !path.is_file() {
        return Err(StorageError::NotFound);
    }
    Ok(path)
}

/// Guess the content type for a stored file from its extension.
pub fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string()
}

/// Remove a stored attachment; missing files are not an error.
pub fn remove_attachment(uploads_dir: &Path, stored_name: &str) -> Result<(), StorageError> {
    let path = match resolve_attachment(uploads_dir, stored_name) {
        Ok(path) => path,
        Err(StorageError::NotFound) => return Ok(()),
        Err(e) => return Err(e),
    };
    std::fs::remove_file(path)?;
    Ok(())
}
