use anyhow::{Context, Result};
use bonbast_deploy_core::{ENTRY_POINT, REQUIREMENTS_FILE};
use std::fs;
use std::path::{Path, PathBuf};

use crate::receipts::current_unix_timestamp;

pub const DEFAULT_INSTALL_DIR: &str = "/opt/bonbast-bot";

/// Names inside the app directory that belong to the installer, never to fetched code.
pub const PRESERVED_APP_ENTRIES: [&str; 2] = [".env", "venv"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app_dir(&self) -> PathBuf {
        self.root.join("app")
    }

    pub fn env_file(&self) -> PathBuf {
        self.app_dir().join(".env")
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.app_dir().join("venv")
    }

    pub fn venv_python(&self) -> PathBuf {
        self.venv_dir().join("bin").join("python")
    }

    pub fn entry_point(&self) -> PathBuf {
        self.app_dir().join(ENTRY_POINT)
    }

    pub fn requirements_path(&self) -> PathBuf {
        self.app_dir().join(REQUIREMENTS_FILE)
    }

    pub fn default_db_path(&self) -> PathBuf {
        self.root.join("bot.db")
    }

    pub fn receipt_path(&self) -> PathBuf {
        self.root.join(".bonbast-deploy.receipt")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".bonbast-deploy.lock")
    }

    pub fn staging_root(&self) -> PathBuf {
        self.root.join(".staging")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.app_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub(crate) fn make_staging_dir(&self, prefix: &str) -> Result<PathBuf> {
        let mut dir = self.staging_root();
        dir.push(format!(
            "{}-{}-{}",
            prefix,
            std::process::id(),
            current_unix_timestamp()?
        ));
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("failed to clear stale staging dir: {}", dir.display()))?;
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed creating staging dir: {}", dir.display()))?;
        Ok(dir)
    }

    /// Best effort; failures are only logged.
    pub(crate) fn remove_staging_dir(&self, dir: &Path) {
        if let Err(err) = fs::remove_dir_all(dir) {
            tracing::debug!(dir = %dir.display(), error = %err, "failed to remove staging dir");
        }
        // Only succeeds once no other staging dir is left.
        let _ = fs::remove_dir(self.staging_root());
    }
}

/// Expands a leading `~/` against `HOME`; other paths are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
