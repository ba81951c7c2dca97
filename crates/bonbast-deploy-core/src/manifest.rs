use std::collections::HashSet;
use std::path::{Component, Path};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Requirement {
    Required,
    BestEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub requirement: Requirement,
}

impl ManifestEntry {
    pub fn required(name: &str) -> Self {
        Self {
            name: name.to_string(),
            requirement: Requirement::Required,
        }
    }

    pub fn best_effort(name: &str) -> Self {
        Self {
            name: name.to_string(),
            requirement: Requirement::BestEffort,
        }
    }

    pub fn is_required(&self) -> bool {
        self.requirement == Requirement::Required
    }
}

/// Ordered list of files the bot needs in its app directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactManifest {
    #[serde(rename = "file")]
    entries: Vec<ManifestEntry>,
}

impl ArtifactManifest {
    pub fn new(entries: Vec<ManifestEntry>) -> anyhow::Result<Self> {
        let mut seen = HashSet::new();
        for entry in &entries {
            validate_entry_name(&entry.name)
                .with_context(|| format!("invalid manifest entry '{}'", entry.name))?;
            if !seen.insert(entry.name.as_str()) {
                return Err(anyhow!("duplicate manifest entry '{}'", entry.name));
            }
        }
        if !entries.iter().any(ManifestEntry::is_required) {
            return Err(anyhow!("manifest must declare at least one required file"));
        }
        Ok(Self { entries })
    }

    pub fn bonbast_bot() -> Self {
        Self {
            entries: vec![
                ManifestEntry::required(ENTRY_POINT),
                ManifestEntry::required("storage.py"),
                ManifestEntry::required("bonbast_client.py"),
                ManifestEntry::required("models.py"),
                ManifestEntry::required(REQUIREMENTS_FILE),
                ManifestEntry::best_effort("README.md"),
            ],
        }
    }

    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let raw: Self = toml::from_str(input).context("failed to parse artifact manifest")?;
        Self::new(raw.entries)
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn required_entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|entry| entry.is_required())
    }
}

pub const ENTRY_POINT: &str = "main.py";
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

fn validate_entry_name(name: &str) -> anyhow::Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow!("file name must not be empty"));
    }
    let path = Path::new(name);
    if path.is_absolute() {
        return Err(anyhow!("file name must be relative: {name}"));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(anyhow!("file name must not contain '..' or '.': {name}")),
        }
    }
    if name == ".env" || name.starts_with("venv/") || name == "venv" {
        return Err(anyhow!("file name collides with installer-owned state: {name}"));
    }
    Ok(())
}
