mod artifact;
mod download;
mod error;
mod fs_utils;
mod host;
mod input;
mod layout;
mod lock;
mod packages;
mod probe;
mod receipts;
mod reconcile;
mod report;
mod runtime_env;
mod service;

pub use artifact::{fetch_artifacts, FetchOutcome, FetchRequest, FetchedFile};
pub use download::{Downloader, HttpDownloader};
pub use error::InstallerError;
pub use host::{command_line, Host, Privilege, SystemHost};
pub use input::{Confirmation, InputProvider, Question, ScriptedInput};
pub use layout::{expand_home, InstallLayout, DEFAULT_INSTALL_DIR, PRESERVED_APP_ENTRIES};
pub use lock::InstallLock;
pub use packages::{ensure_prerequisites, install_packages, InstallReport};
pub use probe::{
    parse_python_version, probe, Capability, CapabilitySet, PackageManager, PythonRuntime,
    MIN_PYTHON, PYTHON,
};
pub use receipts::{
    current_unix_timestamp, read_install_receipt, write_install_receipt, InstallReceipt,
};
pub use reconcile::{
    reconcile, reconcile_env_file, ConfigAction, ConfigDefaults, ConfigOutcome, Reconciled,
    KEEP_CONFIG_ID,
};
pub use report::{Severity, StepFailure, StepReport};
pub use runtime_env::{ensure_environment, EnvironmentHandle};
pub use service::{bot_service_unit, register_and_start, status_hint, ServiceOutcome};

#[cfg(test)]
mod tests;
