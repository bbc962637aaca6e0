//! File descriptors handed to processors.
//!
//! The orchestrator never reads file contents itself: it validates the
//! descriptor, classifies it as an image or a document, and passes it on.
//! Engines open the file when (and if) they need the bytes.

use crate::capability::InputKind;
use crate::error::DocflowError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A file submitted for processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub path: PathBuf,
    /// Display name, usually the file name.
    pub name: String,
    pub mime_type: String,
    /// Size in bytes, if known.
    #[serde(default)]
    pub size: Option<u64>,
}

impl FileDescriptor {
    pub fn new(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        let path = path.into();
        let name = file_name(&path);
        Self {
            path,
            name,
            mime_type: mime_type.into(),
            size: None,
        }
    }

    /// Build a descriptor for a local file, guessing the MIME type from the
    /// extension and reading the size from metadata.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, DocflowError> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await.map_err(|e| {
            DocflowError::Validation(format!("cannot read '{}': {e}", path.display()))
        })?;
        if !meta.is_file() {
            return Err(DocflowError::Validation(format!(
                "'{}' is not a regular file",
                path.display()
            )));
        }

        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        debug!("Resolved {} as {}", path.display(), mime_type);

        Ok(Self {
            path: path.to_path_buf(),
            name: file_name(path),
            mime_type,
            size: Some(meta.len()),
        })
    }

    /// `image/*` files are images; everything else is treated as a document.
    pub fn input_kind(&self) -> InputKind {
        if self.mime_type.starts_with("image/") {
            InputKind::Image
        } else {
            InputKind::Document
        }
    }

    /// Reject descriptors with blank required fields.
    pub fn validate(&self) -> Result<(), DocflowError> {
        if self.path.as_os_str().is_empty() {
            return Err(DocflowError::Validation("file path is required".into()));
        }
        if self.name.trim().is_empty() {
            return Err(DocflowError::Validation("file name is required".into()));
        }
        if self.mime_type.trim().is_empty() {
            return Err(DocflowError::Validation("file MIME type is required".into()));
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
