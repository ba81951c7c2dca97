use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::InstallerError;
use crate::layout::InstallLayout;

/// Marker file held for the duration of a run. Removed on drop.
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
}

impl InstallLock {
    pub fn acquire(layout: &InstallLayout) -> Result<Self> {
        let path = layout.lock_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let holder = read_lock_holder(&path).unwrap_or_else(|| "unknown".to_string());
                return Err(InstallerError::Locked {
                    path: path.display().to_string(),
                    pid: holder,
                }
                .into());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to claim install lock: {}", path.display()));
            }
        };

        file.write_all(format!("{}\n", std::process::id()).as_bytes())
            .and_then(|()| file.flush())
            .with_context(|| format!("failed to write install lock: {}", path.display()))?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release install lock");
        }
    }
}

fn read_lock_holder(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    let pid = raw.trim();
    if pid.is_empty() {
        return None;
    }
    Some(pid.to_string())
}
