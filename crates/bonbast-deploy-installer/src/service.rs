use anyhow::Result;
use bonbast_deploy_core::{ServiceUnit, RESTART_SEC, SERVICE_NAME};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::InstallerError;
use crate::host::{Host, Privilege};
use crate::layout::InstallLayout;

pub fn bot_service_unit(layout: &InstallLayout) -> ServiceUnit {
    ServiceUnit {
        name: SERVICE_NAME.to_string(),
        description: "Bonbast exchange-rate Telegram bot".to_string(),
        working_directory: layout.app_dir(),
        environment_file: layout.env_file(),
        interpreter: layout.venv_python(),
        entry_point: layout.entry_point(),
        restart_sec: RESTART_SEC,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOutcome {
    pub unit_path: PathBuf,
    pub newly_registered: bool,
    pub unit_changed: bool,
}

/// Writes the unit, reloads systemd when the unit is new or changed, enables it
/// when new, and restarts the service on every run. Under sudo the unit is
/// staged in the install root and copied into place with `sudo install`.
pub fn register_and_start<H: Host + ?Sized>(
    host: &mut H,
    privilege: Privilege,
    layout: &InstallLayout,
    unit: &ServiceUnit,
    unit_path: &Path,
) -> Result<ServiceOutcome> {
    if host.locate("systemctl").is_none() {
        return Err(InstallerError::Service(
            "systemctl was not found; this host does not appear to run systemd".to_string(),
        )
        .into());
    }

    let rendered = unit.render();
    let previous = match fs::read_to_string(unit_path) {
        Ok(raw) => Some(raw),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(InstallerError::Service(format!(
                "failed to read {}: {err}",
                unit_path.display()
            ))
            .into());
        }
    };
    let newly_registered = previous.is_none();
    let unit_changed = previous.as_deref() != Some(rendered.as_str());

    if unit_changed {
        if privilege == Privilege::Sudo {
            install_unit_with_sudo(host, layout, unit, &rendered, unit_path)?;
        } else {
            write_unit(unit_path, &rendered)?;
        }
        systemctl(host, privilege, &["daemon-reload"])?;
    }

    if newly_registered {
        systemctl(host, privilege, &["enable", &unit.name])?;
    }
    systemctl(host, privilege, &["restart", &unit.name])?;
    tracing::info!(unit = %unit.name, newly_registered, unit_changed, "service restarted");

    Ok(ServiceOutcome {
        unit_path: unit_path.to_path_buf(),
        newly_registered,
        unit_changed,
    })
}

fn write_unit(unit_path: &Path, rendered: &str) -> Result<()> {
    fs::write(unit_path, rendered.as_bytes()).map_err(|err| {
        let hint = if err.kind() == io::ErrorKind::PermissionDenied {
            "; re-run as root (for example with sudo)"
        } else {
            ""
        };
        InstallerError::Service(format!("failed to write {}: {err}{hint}", unit_path.display()))
            .into()
    })
}

fn install_unit_with_sudo<H: Host + ?Sized>(
    host: &mut H,
    layout: &InstallLayout,
    unit: &ServiceUnit,
    rendered: &str,
    unit_path: &Path,
) -> Result<()> {
    let staging = layout.make_staging_dir("unit")?;
    let staged = staging.join(format!("{}.service", unit.name));
    let result: Result<()> = fs::write(&staged, rendered.as_bytes())
        .map_err(|err| {
            InstallerError::Service(format!("failed to stage {}: {err}", staged.display())).into()
        })
        .and_then(|()| {
            let mut command = Privilege::Sudo.command("install");
            command.arg("-m").arg("0644").arg(&staged).arg(unit_path);
            host.run(
                &mut command,
                &format!("failed to install unit file {}", unit_path.display()),
            )
            .map_err(|err| InstallerError::Service(format!("{err:#}")).into())
        });
    layout.remove_staging_dir(&staging);
    result
}

fn systemctl<H: Host + ?Sized>(host: &mut H, privilege: Privilege, args: &[&str]) -> Result<()> {
    let mut command = privilege.command("systemctl");
    command.args(args);
    host.run(&mut command, &format!("systemctl {} failed", args.join(" ")))
        .map_err(|err| InstallerError::Service(format!("{err:#}")).into())
}

pub fn status_hint(unit_name: &str) -> [String; 2] {
    [
        format!("systemctl status {unit_name}"),
        format!("journalctl -u {unit_name} -f"),
    ]
}
