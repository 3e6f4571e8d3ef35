//! On-host directory layout
//!
//! ```text
//! <base>/                      /opt/siemcore or /opt/mysoc
//!   bin/<product>              executable
//!   etc/<product>.yaml         product config
//!   updater/
//!     config.yaml              agent config
//!     .instance                INSTANCE_ID / API_KEY, mode 0600
//!     deployments.jsonl        append-only deployment history
//!     versions/<product>.version
//!     backups/<product>.<ver>.bak
//!     temp/<product>-<ver>     in-flight download
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Paths under one install base
#[derive(Debug, Clone)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Layout { base: base.into() }
    }

    /// Standard install base for an instance type
    pub fn for_instance_type(instance_type: &str) -> Self {
        match instance_type {
            "mysoc" | "mysoc-cloud" => Layout::new("/opt/mysoc"),
            _ => Layout::new("/opt/siemcore"),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.base.join("bin")
    }

    pub fn binary(&self, product: &str) -> PathBuf {
        self.bin_dir().join(product)
    }

    pub fn etc_dir(&self) -> PathBuf {
        self.base.join("etc")
    }

    pub fn product_config(&self, product: &str) -> PathBuf {
        self.etc_dir().join(format!("{}.yaml", product))
    }

    pub fn updater_dir(&self) -> PathBuf {
        self.base.join("updater")
    }

    pub fn config_file(&self) -> PathBuf {
        self.updater_dir().join("config.yaml")
    }

    pub fn instance_file(&self) -> PathBuf {
        self.updater_dir().join(".instance")
    }

    pub fn deployments_log(&self) -> PathBuf {
        self.updater_dir().join("deployments.jsonl")
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.updater_dir().join("versions")
    }

    pub fn version_file(&self, product: &str) -> PathBuf {
        self.versions_dir().join(format!("{}.version", product))
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.updater_dir().join("backups")
    }

    pub fn backup_file(&self, product: &str, version: &str) -> PathBuf {
        self.backups_dir().join(format!("{}.{}.bak", product, version))
    }

    /// Safety copy of the running binary taken just before a rollback
    pub fn current_backup_file(&self, product: &str, version: &str) -> PathBuf {
        self.backups_dir().join(format!("{}.{}.current.bak", product, version))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.updater_dir().join("temp")
    }

    pub fn temp_download(&self, product: &str, version: &str) -> PathBuf {
        self.temp_dir().join(format!("{}-{}", product, version))
    }

    /// Create the whole directory tree
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.bin_dir(),
            self.etc_dir(),
            self.base.join("data"),
            self.base.join("logs"),
            self.updater_dir(),
            self.versions_dir(),
            self.backups_dir(),
            self.temp_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Installed version of a product, if any
    pub fn current_version(&self, product: &str) -> Option<String> {
        let data = std::fs::read_to_string(self.version_file(product)).ok()?;
        let version = data.trim().to_string();
        if version.is_empty() {
            None
        } else {
            Some(version)
        }
    }

    /// Commit the installed version of a product
    pub fn write_version(&self, product: &str, version: &str) -> Result<()> {
        std::fs::create_dir_all(self.versions_dir()).context("failed to create versions dir")?;
        std::fs::write(self.version_file(product), version)
            .with_context(|| format!("failed to write version file for {}", product))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_for_type() {
        assert_eq!(Layout::for_instance_type("mysoc-cloud").base(), Path::new("/opt/mysoc"));
        assert_eq!(Layout::for_instance_type("siemcore").base(), Path::new("/opt/siemcore"));
        assert_eq!(Layout::for_instance_type("siemcore-lite").base(), Path::new("/opt/siemcore"));
    }

    #[test]
    fn test_version_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure().unwrap();

        assert_eq!(layout.current_version("siemcore-api"), None);
        layout.write_version("siemcore-api", "v1.5.0").unwrap();
        assert_eq!(layout.current_version("siemcore-api").as_deref(), Some("v1.5.0"));
    }
}
