use anyhow::anyhow;

use crate::archive::ArchiveType;

pub const SOURCE_ENV_VAR: &str = "BONBAST_BOT_SOURCE";
pub const DEFAULT_SOURCE: &str = "https://github.com/bonbast-bot/bonbast-bot/archive/refs/heads/main.tar.gz";

/// Where the application files come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMode {
    Archive { url: String, archive_type: ArchiveType },
    PerFile { base_url: String },
}

impl FetchMode {
    /// Archive URLs are recognised by extension; anything else is a base URL
    /// that manifest file names are appended to.
    pub fn from_location(location: &str) -> anyhow::Result<Self> {
        let trimmed = location.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("source location must not be empty"));
        }
        if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
            return Err(anyhow!(
                "source location must be an http(s) URL: {trimmed}"
            ));
        }

        if let Some(archive_type) = ArchiveType::infer_from_url(trimmed) {
            return Ok(Self::Archive {
                url: trimmed.to_string(),
                archive_type,
            });
        }

        Ok(Self::PerFile {
            base_url: trimmed.trim_end_matches('/').to_string(),
        })
    }

    pub fn location(&self) -> &str {
        match self {
            Self::Archive { url, .. } => url,
            Self::PerFile { base_url } => base_url,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Archive { .. } => "archive",
            Self::PerFile { .. } => "per-file",
        }
    }

    pub fn needs_archive_tool(&self) -> bool {
        matches!(self, Self::Archive { .. })
    }

    pub fn file_url(&self, name: &str) -> Option<String> {
        match self {
            Self::Archive { .. } => None,
            Self::PerFile { base_url } => Some(format!("{base_url}/{name}")),
        }
    }
}

/// Resolves the default source: the environment override when set and
/// non-blank, the built-in location otherwise.
pub fn default_source_location(env_override: Option<&str>) -> String {
    env_override
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_SOURCE)
        .to_string()
}
