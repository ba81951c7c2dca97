mod archive;
mod config_set;
mod manifest;
mod source;
mod unit;

pub use archive::ArchiveType;
pub use config_set::{ConfigSet, ManagedKey, DEFAULT_LOG_LEVEL, LOG_LEVELS};
pub use manifest::{ArtifactManifest, ManifestEntry, Requirement, ENTRY_POINT, REQUIREMENTS_FILE};
pub use source::{default_source_location, FetchMode, DEFAULT_SOURCE, SOURCE_ENV_VAR};
pub use unit::{ServiceUnit, DEFAULT_UNIT_PATH, RESTART_SEC, SERVICE_NAME};
