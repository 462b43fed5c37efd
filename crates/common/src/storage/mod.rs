//! Session-scoped media storage
//!
//! Files live under a fixed media root, namespaced by session id:
//! `<root>/<session_id>/<millis>-<sanitized name>`. The relative path
//! is the opaque identifier recorded on the asset row; it is written
//! once at creation and never points at mutated content.

use crate::errors::{AppError, Result};
use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// Filesystem-backed media store
#[derive(Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    /// Create a store rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Persist bytes for a session, returning the relative path
    pub async fn save(&self, session_id: Uuid, bytes: &[u8], filename: &str) -> Result<String> {
        let session_dir = self.root.join(session_id.to_string());
        tokio::fs::create_dir_all(&session_dir).await?;

        let final_name = format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            sanitize_filename(filename)
        );

        let full_path = session_dir.join(&final_name);
        tokio::fs::write(&full_path, bytes).await?;
        crate::metrics::record_media_written(bytes.len() as u64);

        Ok(format!("{}/{}", session_id, final_name))
    }

    /// Persist a generated video, naming it by timestamp
    pub async fn save_video(&self, session_id: Uuid, bytes: &[u8]) -> Result<String> {
        let filename = format!("video_{}.mp4", Utc::now().timestamp_millis());
        self.save(session_id, bytes, &filename).await
    }

    /// Read a file by its relative path
    pub async fn read(&self, relative_path: &str) -> Result<Vec<u8>> {
        let full_path = self.resolve(relative_path)?;
        tokio::fs::read(&full_path).await.map_err(Into::into)
    }

    /// Delete a file by its relative path
    pub async fn delete(&self, relative_path: &str) -> Result<()> {
        let full_path = self.resolve(relative_path)?;
        tokio::fs::remove_file(&full_path).await.map_err(Into::into)
    }

    /// Resolve a relative path under the media root, rejecting absolute
    /// paths and parent-directory components. Paths are never supplied
    /// directly by clients, but the guard holds regardless.
    pub fn resolve(&self, relative_path: &str) -> Result<PathBuf> {
        let candidate = Path::new(relative_path);

        let traversal = candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));

        if traversal || relative_path.is_empty() {
            return Err(AppError::Storage {
                message: format!("Invalid media path: {}", relative_path),
            });
        }

        Ok(self.root.join(candidate))
    }
}

/// Probe pixel dimensions of an encoded image. Returns None for
/// videos and undecodable payloads.
pub fn probe_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::load_from_memory(bytes)
        .ok()
        .map(|img| (img.width(), img.height()))
}

/// Replace anything outside [a-zA-Z0-9.-] with underscores
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("my photo (1).png"), "my_photo__1_.png");
        assert_eq!(sanitize_filename("simple.mp4"), "simple.mp4");
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let store = MediaStore::new("/var/visualneurons/media");
        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("a/../../b").is_err());
        assert!(store.resolve("/etc/passwd").is_err());
        assert!(store.resolve("").is_err());
        assert!(store.resolve("session/file.png").is_ok());
    }

    #[tokio::test]
    async fn test_save_read_delete_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = MediaStore::new(dir.path());
        let session = Uuid::new_v4();

        let path = store.save(session, b"png bytes", "gen.png").await.unwrap();
        assert!(path.starts_with(&session.to_string()));

        let bytes = store.read(&path).await.unwrap();
        assert_eq!(bytes, b"png bytes");

        store.delete(&path).await.unwrap();
        assert!(store.read(&path).await.is_err());
    }
}
