//! Upload validation and per-request staging

use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

/// Accepted upload extensions (compared case-insensitively)
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// Extension of `filename` if it is one of [`ALLOWED_EXTENSIONS`], lowercased
pub fn allowed_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// An upload written to disk under a request-unique name.
///
/// The file is removed when the value is dropped, on success and on error.
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
}

impl StagedUpload {
    pub async fn write(dir: &Path, extension: &str, bytes: &[u8]) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let path = dir.join(format!("{}.{}", Uuid::new_v4(), extension));
        let staged = Self { path };
        tokio::fs::write(&staged.path, bytes).await?;
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove staged upload {:?}: {}", self.path, e);
            }
        }
    }
}
