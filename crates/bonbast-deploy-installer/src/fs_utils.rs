use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

pub(crate) fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Copies `src` into `dst`, overwriting files that already exist and leaving
/// everything else in `dst` alone. Top-level names in `skip` are not copied.
pub(crate) fn copy_dir_overlay(src: &Path, dst: &Path, skip: &[&str]) -> Result<Vec<String>> {
    let mut copied = Vec::new();
    copy_dir_overlay_recursive(src, dst, skip, "", &mut copied)?;
    copied.sort();
    Ok(copied)
}

fn copy_dir_overlay_recursive(
    src: &Path,
    dst: &Path,
    skip: &[&str],
    rel_prefix: &str,
    copied: &mut Vec<String>,
) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("failed to read {}", src.display()))? {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if rel_prefix.is_empty() && skip.contains(&name.as_ref()) {
            tracing::debug!(entry = %name, "skipping installer-owned entry from source");
            continue;
        }

        let rel = if rel_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{rel_prefix}/{name}")
        };
        let src_path = entry.path();
        let dst_path = dst.join(&file_name);
        let metadata = fs::symlink_metadata(&src_path)
            .with_context(|| format!("failed to stat {}", src_path.display()))?;
        if metadata.is_dir() {
            copy_dir_overlay_recursive(&src_path, &dst_path, skip, &rel, copied)?;
            continue;
        }

        #[cfg(unix)]
        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&src_path)
                .with_context(|| format!("failed to read symlink {}", src_path.display()))?;
            remove_file_if_exists(&dst_path)
                .with_context(|| format!("failed to replace {}", dst_path.display()))?;
            std::os::unix::fs::symlink(&target, &dst_path).with_context(|| {
                format!(
                    "failed to create symlink {} -> {}",
                    dst_path.display(),
                    target.display()
                )
            })?;
            copied.push(rel);
            continue;
        }

        fs::copy(&src_path, &dst_path).with_context(|| {
            format!(
                "failed to copy {} to {}",
                src_path.display(),
                dst_path.display()
            )
        })?;
        copied.push(rel);
    }
    Ok(())
}

/// Writes through a sibling `.part` file and renames into place.
pub(crate) fn write_replacing(path: &Path, payload: &[u8], mode: Option<u32>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let part_path = path.with_file_name(format!(
        "{}.part",
        path.file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("file")
    ));

    let mut file = fs::File::create(&part_path)
        .with_context(|| format!("failed to create {}", part_path.display()))?;
    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&part_path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("failed to set mode on {}", part_path.display()))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    file.write_all(payload)
        .and_then(|()| file.flush())
        .with_context(|| format!("failed to write {}", part_path.display()))?;
    drop(file);

    fs::rename(&part_path, path).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            part_path.display(),
            path.display()
        )
    })
}

pub(crate) fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("failed to hash {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}
