use thiserror::Error;

/// Fatal failure classes of an install run. Each aborts the run with exit status 1.
#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("required tool '{tool}' is missing: {hint}")]
    MissingTool { tool: String, hint: String },

    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("failed to build the Python environment: {0}")]
    Build(String),

    #[error("invalid input: {0}")]
    Input(String),

    #[error("failed to register service: {0}")]
    Service(String),

    #[error("another install run holds the lock {path} (pid {pid})")]
    Locked { path: String, pid: String },
}
