use anyhow::anyhow;

/// Keys the installer owns inside the bot's `.env` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ManagedKey {
    BotToken,
    OwnerIds,
    DbPath,
    LogLevel,
}

impl ManagedKey {
    /// Canonical write order.
    pub const ALL: [ManagedKey; 4] = [
        ManagedKey::BotToken,
        ManagedKey::OwnerIds,
        ManagedKey::DbPath,
        ManagedKey::LogLevel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BotToken => "BOT_TOKEN",
            Self::OwnerIds => "OWNER_IDS",
            Self::DbPath => "DB_PATH",
            Self::LogLevel => "LOG_LEVEL",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|managed| managed.as_str() == key)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::BotToken => "Telegram bot token",
            Self::OwnerIds => "Owner/admin Telegram user IDs (comma separated)",
            Self::DbPath => "Storage (SQLite) path",
            Self::LogLevel => "Log level",
        }
    }

    /// Normalises and validates an operator-supplied value for this key.
    pub fn normalize(self, value: &str) -> anyhow::Result<String> {
        let trimmed = value.trim();
        if trimmed.contains('\n') || trimmed.contains('\r') {
            return Err(anyhow!("{} must be a single line", self.as_str()));
        }
        match self {
            Self::BotToken | Self::DbPath => {
                if trimmed.is_empty() {
                    return Err(anyhow!("{} must not be empty", self.as_str()));
                }
                Ok(trimmed.to_string())
            }
            Self::OwnerIds => normalize_owner_ids(trimmed),
            Self::LogLevel => {
                let upper = trimmed.to_ascii_uppercase();
                if LOG_LEVELS.contains(&upper.as_str()) {
                    Ok(upper)
                } else {
                    Err(anyhow!(
                        "LOG_LEVEL must be one of {}: {trimmed}",
                        LOG_LEVELS.join(", ")
                    ))
                }
            }
        }
    }
}

pub const LOG_LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];
pub const DEFAULT_LOG_LEVEL: &str = "INFO";

fn normalize_owner_ids(raw: &str) -> anyhow::Result<String> {
    let mut ids = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        part.parse::<i64>()
            .map_err(|_| anyhow!("OWNER_IDS entries must be integers: '{part}'"))?;
        ids.push(part);
    }
    if ids.is_empty() {
        return Err(anyhow!("OWNER_IDS must list at least one user id"));
    }
    Ok(ids.join(","))
}

/// Ordered `KEY=VALUE` settings as persisted in the bot's `.env` file.
///
/// Values are stored verbatim; there is no quoting or escaping. Comment and
/// blank lines are dropped on parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSet {
    entries: Vec<(String, String)>,
}

impl ConfigSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Self {
        let mut set = Self::new();
        for line in raw.lines() {
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
            let Some((key, value)) = trimmed.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            set.insert(key, value.trim_end_matches('\r'));
        }
        set
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the value of a managed key when it is set to something non-blank.
    pub fn managed_value(&self, key: ManagedKey) -> Option<&str> {
        self.get(key.as_str()).filter(|value| !value.trim().is_empty())
    }

    /// Replaces the value in place, or appends a new key at the end.
    pub fn insert(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(existing, _)| existing == key) {
            Some((_, existing_value)) => *existing_value = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Keys not owned by the installer, in their original relative order.
    pub fn foreign_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter(|(key, _)| ManagedKey::parse(key).is_none())
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Builds the persisted form: managed keys first in canonical order, then
    /// every foreign key of `self` unchanged.
    pub fn merged_with(&self, managed: &[(ManagedKey, String)]) -> Self {
        let mut merged = Self::new();
        for key in ManagedKey::ALL {
            if let Some((_, value)) = managed.iter().find(|(candidate, _)| *candidate == key) {
                merged.insert(key.as_str(), value);
            }
        }
        for (key, value) in self.foreign_entries() {
            merged.insert(key, value);
        }
        merged
    }

    pub fn render(&self) -> anyhow::Result<String> {
        let mut payload = String::new();
        for (key, value) in &self.entries {
            if key.contains('=') || key.contains('\n') || value.contains('\n') {
                return Err(anyhow!(
                    "config entry '{key}' cannot be stored as a single KEY=VALUE line"
                ));
            }
            payload.push_str(&format!("{key}={value}\n"));
        }
        Ok(payload)
    }
}
