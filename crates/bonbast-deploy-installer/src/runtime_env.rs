use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::InstallerError;
use crate::host::Host;
use crate::layout::InstallLayout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHandle {
    pub root: PathBuf,
    pub interpreter: PathBuf,
    pub created: bool,
    pub installed_requirements: bool,
}

/// Creates `app/venv` unless it already has an interpreter, then upgrades pip
/// and installs `requirements.txt` into it.
pub fn ensure_environment<H: Host + ?Sized>(
    host: &mut H,
    layout: &InstallLayout,
    python: &Path,
) -> Result<EnvironmentHandle> {
    let root = layout.venv_dir();
    let interpreter = layout.venv_python();

    let created = if interpreter.exists() {
        tracing::info!(venv = %root.display(), "reusing existing virtual environment");
        false
    } else {
        host.run(
            Command::new(python).arg("-m").arg("venv").arg(&root),
            "failed to create virtual environment",
        )
        .map_err(|err| build_error(&err))?;
        if !interpreter.exists() {
            return Err(InstallerError::Build(format!(
                "virtual environment was created but {} is missing",
                interpreter.display()
            ))
            .into());
        }
        true
    };

    host.run(
        Command::new(&interpreter)
            .args(["-m", "pip", "install", "--upgrade", "pip"])
            .current_dir(layout.app_dir()),
        "failed to upgrade pip",
    )
    .map_err(|err| build_error(&err))?;

    let requirements = layout.requirements_path();
    let installed_requirements = if requirements.is_file() {
        host.run(
            Command::new(&interpreter)
                .args(["-m", "pip", "install", "-r"])
                .arg(&requirements)
                .current_dir(layout.app_dir()),
            "failed to install application requirements",
        )
        .map_err(|err| build_error(&err))?;
        true
    } else {
        tracing::warn!(path = %requirements.display(), "no requirements file; skipping dependency install");
        false
    };

    Ok(EnvironmentHandle {
        root,
        interpreter,
        created,
        installed_requirements,
    })
}

fn build_error(err: &anyhow::Error) -> anyhow::Error {
    InstallerError::Build(format!("{err:#}")).into()
}
