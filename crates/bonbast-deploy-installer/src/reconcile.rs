use anyhow::{Context, Result};
use bonbast_deploy_core::{ConfigSet, ManagedKey, DEFAULT_LOG_LEVEL};
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::error::InstallerError;
use crate::fs_utils::write_replacing;
use crate::input::{Confirmation, InputProvider, Question};
use crate::layout::InstallLayout;

pub const KEEP_CONFIG_ID: &str = "keep_config";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDefaults {
    pub db_path: String,
    pub log_level: String,
}

impl ConfigDefaults {
    pub fn for_layout(layout: &InstallLayout) -> Self {
        Self {
            db_path: layout.default_db_path().display().to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }

    fn default_for(&self, key: ManagedKey) -> Option<&str> {
        match key {
            ManagedKey::DbPath => Some(&self.db_path),
            ManagedKey::LogLevel => Some(&self.log_level),
            ManagedKey::BotToken | ManagedKey::OwnerIds => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    Created,
    Kept,
    Merged,
}

impl ConfigAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Kept => "kept",
            Self::Merged => "merged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub action: ConfigAction,
    pub config: ConfigSet,
}

/// Decides the next ConfigSet. With no existing config every managed key is
/// asked for. With one, the operator is asked once whether to keep it (default
/// yes); declining merges: current managed values become prompt defaults and
/// every foreign key is carried over unchanged.
pub fn reconcile(
    existing: Option<&ConfigSet>,
    input: &mut dyn InputProvider,
    defaults: &ConfigDefaults,
) -> Result<Reconciled> {
    let Some(existing) = existing else {
        let managed = ask_managed(&ConfigSet::new(), input, defaults)?;
        return Ok(Reconciled {
            action: ConfigAction::Created,
            config: ConfigSet::new().merged_with(&managed),
        });
    };

    let keep = input.confirm(&Confirmation {
        id: KEEP_CONFIG_ID,
        prompt: "An existing configuration was found. Keep it unchanged?",
        default: true,
    })?;
    if keep {
        return Ok(Reconciled {
            action: ConfigAction::Kept,
            config: existing.clone(),
        });
    }

    let managed = ask_managed(existing, input, defaults)?;
    Ok(Reconciled {
        action: ConfigAction::Merged,
        config: existing.merged_with(&managed),
    })
}

fn ask_managed(
    current: &ConfigSet,
    input: &mut dyn InputProvider,
    defaults: &ConfigDefaults,
) -> Result<Vec<(ManagedKey, String)>> {
    let mut values = Vec::with_capacity(ManagedKey::ALL.len());
    for key in ManagedKey::ALL {
        let id = key.as_str().to_ascii_lowercase();
        let fallback = current
            .managed_value(key)
            .or_else(|| defaults.default_for(key));
        let answer = input.text(&Question {
            id: &id,
            label: key.label(),
            default: fallback,
        })?;

        let chosen = if answer.trim().is_empty() {
            match fallback {
                Some(value) => value.to_string(),
                None => {
                    return Err(InstallerError::Input(format!(
                        "{} is required and has no default",
                        key.as_str()
                    ))
                    .into());
                }
            }
        } else {
            answer
        };

        let normalized = key
            .normalize(&chosen)
            .map_err(|err| InstallerError::Input(format!("{err:#}")))?;
        values.push((key, normalized));
    }
    Ok(values)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOutcome {
    pub action: ConfigAction,
    pub path: PathBuf,
    pub foreign_keys: usize,
}

/// Reads `app/.env`, reconciles it, and persists the result. A kept file is
/// not rewritten.
pub fn reconcile_env_file(
    layout: &InstallLayout,
    input: &mut dyn InputProvider,
    defaults: &ConfigDefaults,
) -> Result<ConfigOutcome> {
    let path = layout.env_file();
    // Invalid UTF-8 must not block the keep path, which never rewrites the file.
    let existing = match fs::read(&path) {
        Ok(raw) => Some(ConfigSet::parse(&String::from_utf8_lossy(&raw))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read configuration: {}", path.display()));
        }
    };

    let reconciled = reconcile(existing.as_ref(), input, defaults)?;
    let foreign_keys = reconciled.config.foreign_entries().count();
    if reconciled.action != ConfigAction::Kept {
        let payload = reconciled
            .config
            .render()
            .map_err(|err| InstallerError::Input(format!("{err:#}")))?;
        write_replacing(&path, payload.as_bytes(), Some(0o600))
            .with_context(|| format!("failed to write configuration: {}", path.display()))?;
    }
    tracing::info!(action = reconciled.action.as_str(), path = %path.display(), "configuration reconciled");

    Ok(ConfigOutcome {
        action: reconciled.action,
        path,
        foreign_keys,
    })
}
