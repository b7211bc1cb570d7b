//! Upload intake: accept only image content and derive its preview reference.

use crate::resizer::DecodeError;
use image::ImageFormat;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An uploaded file, as selected by the user. Never mutated.
#[derive(Debug, Clone)]
pub struct RawImage {
    name: String,
    path: Option<PathBuf>,
    bytes: Arc<[u8]>,
    format: ImageFormat,
}

/// Displayable reference to the original (unresized) upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub name: String,
    pub uri: String,
    pub mime: &'static str,
}

impl RawImage {
    /// Read an upload from disk. Rejects files whose content is not an image.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let io_err = |source| DecodeError::Io {
            path: path.display().to_string(),
            source,
        };

        let bytes = tokio::fs::read(path).await.map_err(io_err)?;
        let absolute = tokio::fs::canonicalize(path).await.map_err(io_err)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mut raw = Self::from_bytes(name, bytes)?;
        raw.path = Some(absolute);
        Ok(raw)
    }

    /// Wrap in-memory upload bytes. Rejects content that is not an image.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, DecodeError> {
        let name = name.into();
        let format = image::guess_format(&bytes)
            .map_err(|_| DecodeError::UnsupportedType(name.clone()))?;

        tracing::debug!(
            name = %name,
            size = bytes.len(),
            mime = format.to_mime_type(),
            "upload accepted"
        );

        Ok(Self {
            name,
            path: None,
            bytes: bytes.into(),
            format,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn mime(&self) -> &'static str {
        self.format.to_mime_type()
    }

    /// `file://` URI for uploads read from disk, `blob:` for in-memory ones.
    pub fn preview(&self) -> Preview {
        let uri = match &self.path {
            Some(path) => format!("file://{}", path.display()),
            None => format!("blob:{}", self.name),
        };
        Preview {
            name: self.name.clone(),
            uri,
            mime: self.mime(),
        }
    }
}
