use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::artifact::{FetchOutcome, FetchedFile};
use crate::fs_utils::write_replacing;
use crate::layout::InstallLayout;

/// What the last successful fetch put into the app directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReceipt {
    pub source: String,
    pub mode: String,
    pub files: Vec<FetchedFile>,
    pub skipped: Vec<String>,
    pub installed_at_unix: u64,
}

impl InstallReceipt {
    pub fn from_outcome(outcome: &FetchOutcome, installed_at_unix: u64) -> Self {
        Self {
            source: outcome.source.clone(),
            mode: outcome.mode.to_string(),
            files: outcome.files.clone(),
            skipped: outcome.skipped.clone(),
            installed_at_unix,
        }
    }
}

pub fn write_install_receipt(layout: &InstallLayout, receipt: &InstallReceipt) -> Result<PathBuf> {
    let mut payload = String::new();
    payload.push_str(&format!("source={}\n", receipt.source));
    payload.push_str(&format!("mode={}\n", receipt.mode));
    for file in &receipt.files {
        payload.push_str(&format!("file={}\t{}\n", file.name, file.sha256));
    }
    for skipped in &receipt.skipped {
        payload.push_str(&format!("skipped={}\n", skipped));
    }
    payload.push_str(&format!(
        "installed_at_unix={}\n",
        receipt.installed_at_unix
    ));

    let path = layout.receipt_path();
    write_replacing(&path, payload.as_bytes(), None)
        .with_context(|| format!("failed to write install receipt: {}", path.display()))?;
    Ok(path)
}

pub fn read_install_receipt(layout: &InstallLayout) -> Result<Option<InstallReceipt>> {
    let path = layout.receipt_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read install receipt: {}", path.display()));
        }
    };
    parse_receipt(&raw)
        .map(Some)
        .with_context(|| format!("failed to parse install receipt: {}", path.display()))
}

pub(crate) fn parse_receipt(raw: &str) -> Result<InstallReceipt> {
    let mut source = None;
    let mut mode = None;
    let mut files = Vec::new();
    let mut skipped = Vec::new();
    let mut installed_at_unix = None;

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        match k {
            "source" => source = Some(v.to_string()),
            "mode" => mode = Some(v.to_string()),
            "file" => {
                let (name, sha256) = v
                    .split_once('\t')
                    .ok_or_else(|| anyhow!("file entry must be '<name>\\t<sha256>': {v}"))?;
                files.push(FetchedFile {
                    name: name.to_string(),
                    sha256: sha256.to_string(),
                });
            }
            "skipped" => skipped.push(v.to_string()),
            "installed_at_unix" => {
                installed_at_unix = Some(v.parse().context("installed_at_unix must be u64")?)
            }
            _ => {}
        }
    }

    Ok(InstallReceipt {
        source: source.context("missing source")?,
        mode: mode.unwrap_or_else(|| "per-file".to_string()),
        files,
        skipped,
        installed_at_unix: installed_at_unix.context("missing installed_at_unix")?,
    })
}

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before UNIX epoch")?
        .as_secs())
}
