use anyhow::{anyhow, Context, Result};
use bonbast_deploy_core::{ArchiveType, ArtifactManifest, FetchMode, ManifestEntry};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::download::Downloader;
use crate::error::InstallerError;
use crate::fs_utils::{copy_dir_overlay, sha256_file};
use crate::host::Host;
use crate::layout::{InstallLayout, PRESERVED_APP_ENTRIES};
use crate::report::StepReport;

pub const STEP: &str = "fetch";

/// Branch suffixes used by code-hosting archive downloads (`repo-main/`).
const BRANCH_SUFFIXES: [&str; 2] = ["-main", "-master"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub name: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub mode: &'static str,
    pub source: String,
    pub files: Vec<FetchedFile>,
    pub skipped: Vec<String>,
}

/// What to fetch and where it goes.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub mode: &'a FetchMode,
    pub manifest: &'a ArtifactManifest,
    pub layout: &'a InstallLayout,
}

/// Brings the app directory up to date with the request's source. Everything is
/// staged first; the app directory is only touched once every required file
/// is present. `.env` and `venv/` inside the app directory are never removed.
pub fn fetch_artifacts<D, H>(
    downloader: &D,
    host: &mut H,
    request: FetchRequest<'_>,
    report: &mut StepReport,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<FetchOutcome>
where
    D: Downloader + ?Sized,
    H: Host + ?Sized,
{
    request.layout.ensure_base_dirs()?;
    let staging = request.layout.make_staging_dir(STEP)?;
    let result = match request.mode {
        FetchMode::PerFile { .. } => {
            fetch_per_file(downloader, request, &staging, report, progress)
        }
        FetchMode::Archive { url, archive_type } => {
            let archive = ArchiveSource {
                url,
                archive_type: *archive_type,
            };
            fetch_archive(downloader, host, request, archive, &staging, report, progress)
        }
    };
    request.layout.remove_staging_dir(&staging);
    result
}

#[derive(Clone, Copy)]
struct ArchiveSource<'a> {
    url: &'a str,
    archive_type: ArchiveType,
}

fn fetch_per_file<D: Downloader + ?Sized>(
    downloader: &D,
    request: FetchRequest<'_>,
    staging: &Path,
    report: &mut StepReport,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<FetchOutcome> {
    let entries = request.manifest.entries();
    let total = entries.len() as u64;
    let mut staged = Vec::new();
    let mut skipped = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let url = request
            .mode
            .file_url(&entry.name)
            .ok_or_else(|| anyhow!("per-file fetch requires a base URL"))?;
        let destination = staging.join(&entry.name);
        match downloader.download(&url, &destination) {
            Ok(bytes) => {
                tracing::debug!(file = %entry.name, bytes, "fetched");
                staged.push(entry.name.clone());
            }
            Err(err) => {
                skip_or_fail(entry, &url, err, report)?;
                skipped.push(entry.name.clone());
            }
        }
        progress(index as u64 + 1, total);
    }

    let files = install_staged_files(staging, &staged, &request.layout.app_dir())?;
    Ok(FetchOutcome {
        mode: request.mode.as_str(),
        source: request.mode.location().to_string(),
        files,
        skipped,
    })
}

fn fetch_archive<D, H>(
    downloader: &D,
    host: &mut H,
    request: FetchRequest<'_>,
    archive: ArchiveSource<'_>,
    staging: &Path,
    report: &mut StepReport,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<FetchOutcome>
where
    D: Downloader + ?Sized,
    H: Host + ?Sized,
{
    let url = archive.url;
    let archive_path = staging.join(archive.archive_type.scratch_file_name());
    if let Err(err) = downloader.download(url, &archive_path) {
        let err = download_error(url, &err);
        report.record_fatal(STEP, url, &err);
        return Err(err);
    }
    progress(1, 3);

    let raw_dir = staging.join("raw");
    fs::create_dir_all(&raw_dir)
        .with_context(|| format!("failed to create {}", raw_dir.display()))?;
    extract_archive(host, &archive_path, &raw_dir, archive.archive_type).map_err(|err| {
        let err = download_error(url, &err);
        report.record_fatal(STEP, url, &err);
        err
    })?;
    progress(2, 3);

    let source_root = locate_source_root(&raw_dir)?;
    tracing::debug!(root = %source_root.display(), "located extracted source root");

    let mut skipped = Vec::new();
    for entry in request.manifest.entries() {
        if source_root.join(&entry.name).is_file() {
            continue;
        }
        let err = anyhow!("archive does not contain {}", entry.name);
        skip_or_fail(entry, url, err, report)?;
        skipped.push(entry.name.clone());
    }

    let app_dir = request.layout.app_dir();
    copy_dir_overlay(&source_root, &app_dir, &PRESERVED_APP_ENTRIES)?;
    progress(3, 3);

    let mut files = Vec::new();
    for entry in request.manifest.entries() {
        if skipped.contains(&entry.name) {
            continue;
        }
        files.push(FetchedFile {
            name: entry.name.clone(),
            sha256: sha256_file(&app_dir.join(&entry.name))?,
        });
    }

    Ok(FetchOutcome {
        mode: "archive",
        source: url.to_string(),
        files,
        skipped,
    })
}

fn skip_or_fail(
    entry: &ManifestEntry,
    url: &str,
    err: anyhow::Error,
    report: &mut StepReport,
) -> Result<()> {
    if entry.is_required() {
        let err = download_error(url, &err);
        report.record_fatal(STEP, &entry.name, &err);
        return Err(err);
    }
    report.record_recoverable(STEP, &entry.name, &err);
    Ok(())
}

fn download_error(url: &str, err: &anyhow::Error) -> anyhow::Error {
    InstallerError::Download {
        url: url.to_string(),
        reason: format!("{err:#}"),
    }
    .into()
}

fn install_staged_files(staging: &Path, names: &[String], app_dir: &Path) -> Result<Vec<FetchedFile>> {
    let mut files = Vec::with_capacity(names.len());
    for name in names {
        let src = staging.join(name);
        let dst = app_dir.join(name);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::copy(&src, &dst).with_context(|| {
            format!("failed to install {} to {}", src.display(), dst.display())
        })?;
        files.push(FetchedFile {
            name: name.clone(),
            sha256: sha256_file(&dst)?,
        });
    }
    Ok(files)
}

/// Picks the extracted top-level folder: one ending in a branch suffix first,
/// then the first directory in name order, then the extraction root itself.
pub(crate) fn locate_source_root(raw_dir: &Path) -> Result<PathBuf> {
    let mut dirs = Vec::new();
    for entry in
        fs::read_dir(raw_dir).with_context(|| format!("failed to read {}", raw_dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();

    let by_suffix = dirs.iter().find(|dir| {
        dir.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| BRANCH_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
    });
    if let Some(dir) = by_suffix.or_else(|| dirs.first()) {
        return Ok(dir.clone());
    }
    Ok(raw_dir.to_path_buf())
}

fn extract_archive<H: Host + ?Sized>(
    host: &mut H,
    archive_path: &Path,
    dst: &Path,
    archive_type: ArchiveType,
) -> Result<()> {
    match archive_type {
        ArchiveType::TarGz => extract_tar(host, archive_path, dst),
        ArchiveType::Zip => extract_zip(host, archive_path, dst),
    }
}

fn extract_tar<H: Host + ?Sized>(host: &mut H, archive_path: &Path, dst: &Path) -> Result<()> {
    host.run(
        Command::new("tar")
            .arg("-xzf")
            .arg(archive_path)
            .arg("-C")
            .arg(dst),
        "failed to extract tar archive",
    )
}

/// Prefers `unzip`; falls back to `tar`, which reads zip files where it is
/// bsdtar/libarchive.
fn extract_zip<H: Host + ?Sized>(host: &mut H, archive_path: &Path, dst: &Path) -> Result<()> {
    if host.locate("unzip").is_some() {
        let mut unzip_command = Command::new("unzip");
        unzip_command.arg("-q").arg("-o").arg(archive_path).arg("-d").arg(dst);
        match host.run(&mut unzip_command, "failed to extract zip archive with unzip") {
            Ok(()) => return Ok(()),
            Err(err) => tracing::debug!(error = %format!("{err:#}"), "unzip failed; trying tar"),
        }
    }

    host.run(
        Command::new("tar")
            .arg("-xf")
            .arg(archive_path)
            .arg("-C")
            .arg(dst),
        "failed to extract zip archive with tar fallback",
    )
}
