//! Filesystem blob store for release artifacts
//!
//! Artifacts live in a flat `<product>/<version>/<filename>` namespace under
//! a configured base path. Writes are staged into a hidden temp directory and
//! published with a rename, so a reader never observes a partially written
//! artifact. Overwrites are last-writer-wins; the catalog row decides which
//! checksum is canonical.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::fs::{self, File};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Local filesystem artifact storage
#[derive(Clone)]
pub struct ArtifactStore {
    base_path: PathBuf,
}

/// An artifact being written, not yet visible to readers
pub struct StagedArtifact {
    pub file: File,
    temp_path: PathBuf,
}

impl ArtifactStore {
    /// Create the store, ensuring the base and staging directories exist
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(base_path.join(".staging"))
            .await
            .context("Failed to create storage directory")?;

        info!("Artifact store at {}", base_path.display());
        Ok(Self { base_path })
    }

    /// Open a staging file for a new artifact
    pub async fn stage(&self) -> Result<StagedArtifact> {
        let temp_path = self.base_path.join(".staging").join(Uuid::new_v4().to_string());
        let file = File::create(&temp_path)
            .await
            .context("Failed to create staging file")?;

        Ok(StagedArtifact { file, temp_path })
    }

    /// Publish a staged artifact at its final path. The rename makes the
    /// artifact visible in one step.
    pub async fn commit(
        &self,
        staged: StagedArtifact,
        product: &str,
        version: &str,
        filename: &str,
    ) -> Result<String> {
        let path = self.artifact_path(product, version, filename)?;

        drop(staged.file);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create artifact directory")?;
        }

        fs::rename(&staged.temp_path, &path)
            .await
            .context("Failed to publish artifact")?;

        debug!("Stored artifact {}", path.display());
        Ok(path.display().to_string())
    }

    /// Discard a staged artifact
    pub async fn discard(&self, staged: StagedArtifact) {
        drop(staged.file);
        if let Err(err) = fs::remove_file(&staged.temp_path).await {
            warn!("Failed to remove staging file: {}", err);
        }
    }

    /// Open an artifact for streaming reads
    pub async fn get(&self, product: &str, version: &str, filename: &str) -> Result<File> {
        let path = self.artifact_path(product, version, filename)?;
        File::open(&path)
            .await
            .with_context(|| format!("Failed to open artifact {}", path.display()))
    }

    pub async fn exists(&self, product: &str, version: &str, filename: &str) -> bool {
        match self.artifact_path(product, version, filename) {
            Ok(path) => fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn delete(&self, product: &str, version: &str, filename: &str) -> Result<()> {
        let path = self.artifact_path(product, version, filename)?;
        fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to delete artifact {}", path.display()))
    }

    /// Full path of an artifact; rejects path-traversing components
    pub fn artifact_path(&self, product: &str, version: &str, filename: &str) -> Result<PathBuf> {
        for part in [product, version, filename] {
            validate_component(part)?;
        }
        Ok(self.base_path.join(product).join(version).join(filename))
    }
}

fn validate_component(part: &str) -> Result<()> {
    if part.is_empty() || part == "." || part == ".." {
        bail!("invalid path component: {:?}", part);
    }
    if part.contains('/') || part.contains('\\') || part.contains('\0') {
        bail!("invalid path component: {:?}", part);
    }
    Ok(())
}

/// Just the filename portion of a stored artifact path
pub fn artifact_filename(artifact_path: &str) -> String {
    Path::new(artifact_path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_stage_commit_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).await.unwrap();

        let mut staged = store.stage().await.unwrap();
        staged.file.write_all(b"binary contents").await.unwrap();
        staged.file.flush().await.unwrap();

        let path = store
            .commit(staged, "siemcore-api", "v1.0.0", "siemcore-linux-amd64")
            .await
            .unwrap();
        assert!(path.ends_with("siemcore-api/v1.0.0/siemcore-linux-amd64"));
        assert!(store.exists("siemcore-api", "v1.0.0", "siemcore-linux-amd64").await);

        let mut file = store
            .get("siemcore-api", "v1.0.0", "siemcore-linux-amd64")
            .await
            .unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"binary contents");
    }

    #[tokio::test]
    async fn test_discarded_artifact_never_visible() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).await.unwrap();

        let mut staged = store.stage().await.unwrap();
        staged.file.write_all(b"half written").await.unwrap();
        store.discard(staged).await;

        assert!(!store.exists("p", "v", "f").await);
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).await.unwrap();

        assert!(store.artifact_path("..", "v1", "f").is_err());
        assert!(store.artifact_path("p", "v1", "../../etc/passwd").is_err());
        assert!(store.artifact_path("p", "", "f").is_err());
    }

    #[test]
    fn test_artifact_filename() {
        assert_eq!(artifact_filename("/data/p/v/file.bin"), "file.bin");
        assert_eq!(artifact_filename("file.bin"), "file.bin");
    }
}
