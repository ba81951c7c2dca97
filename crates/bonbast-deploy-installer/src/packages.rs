use anyhow::Result;
use bonbast_deploy_core::FetchMode;
use std::process::Command;

use crate::error::InstallerError;
use crate::host::{Host, Privilege};
use crate::probe::{probe, Capability, CapabilitySet, PackageManager, MIN_PYTHON};
use crate::report::StepReport;

pub const STEP: &str = "packages";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: Vec<String>,
    pub failed: Vec<String>,
}

/// Installs each package on its own; a failing package is recorded and the
/// loop moves on.
pub fn install_packages<H: Host + ?Sized>(
    host: &mut H,
    privilege: Privilege,
    manager: PackageManager,
    packages: &[&str],
    report: &mut StepReport,
) -> InstallReport {
    let mut outcome = InstallReport::default();
    if packages.is_empty() {
        return outcome;
    }

    if let Some(mut refresh) = refresh_command(privilege, manager) {
        if let Err(err) = host.run(&mut refresh, "failed to refresh package index") {
            report.record_recoverable(STEP, manager.program(), &err);
        }
    }

    for package in packages {
        let mut command = install_command(privilege, manager, package);
        match host.run(&mut command, &format!("failed to install package '{package}'")) {
            Ok(()) => {
                tracing::info!(package, manager = manager.program(), "installed package");
                outcome.installed.push((*package).to_string());
            }
            Err(err) => {
                report.record_recoverable(STEP, package, &err);
                outcome.failed.push((*package).to_string());
            }
        }
    }

    outcome
}

pub(crate) fn refresh_command(privilege: Privilege, manager: PackageManager) -> Option<Command> {
    match manager {
        PackageManager::AptGet => {
            let mut command = privilege.command("apt-get");
            command.arg("update");
            Some(command)
        }
        PackageManager::Apk => {
            let mut command = privilege.command("apk");
            command.arg("update");
            Some(command)
        }
        _ => None,
    }
}

pub(crate) fn install_command(
    privilege: Privilege,
    manager: PackageManager,
    package: &str,
) -> Command {
    let mut command = privilege.command(manager.program());
    match manager {
        PackageManager::AptGet => {
            command
                .env("DEBIAN_FRONTEND", "noninteractive")
                .args(["install", "-y", package]);
        }
        PackageManager::Dnf | PackageManager::Yum => {
            command.args(["install", "-y", package]);
        }
        PackageManager::Pacman => {
            command.args(["-S", "--noconfirm", "--needed", package]);
        }
        PackageManager::Zypper => {
            command.args(["--non-interactive", "install", package]);
        }
        PackageManager::Apk => {
            command.args(["add", "--no-cache", package]);
        }
    }
    command
}

/// Probes the host and, when something is missing, installs it through the
/// package manager and probes again. Fails only when a capability is still
/// absent afterwards, or when nothing could be installed at all.
pub fn ensure_prerequisites<H: Host + ?Sized>(
    host: &mut H,
    privilege: Privilege,
    mode: &FetchMode,
    report: &mut StepReport,
) -> Result<CapabilitySet> {
    let capabilities = probe(host, mode);
    if capabilities.is_complete() {
        return Ok(capabilities);
    }

    let Some(manager) = capabilities.package_manager else {
        let capability = capabilities.missing[0];
        return Err(missing_tool_error(&capabilities, capability, None).into());
    };

    let packages = capabilities.packages_to_install();
    tracing::info!(manager = manager.program(), ?packages, "installing prerequisites");
    let installed = install_packages(host, privilege, manager, &packages, report);
    tracing::debug!(
        installed = ?installed.installed,
        failed = ?installed.failed,
        "package install finished"
    );

    let recheck = probe(host, mode);
    if let Some(capability) = recheck.missing.first().copied() {
        let attempted = Some((manager, installed.failed.as_slice()));
        return Err(missing_tool_error(&recheck, capability, attempted).into());
    }
    Ok(recheck)
}

fn missing_tool_error(
    capabilities: &CapabilitySet,
    capability: Capability,
    attempted: Option<(PackageManager, &[String])>,
) -> InstallerError {
    let mut hint = match attempted {
        Some((manager, failed)) => {
            let mut hint = format!(
                "install it manually with '{} {}' and re-run",
                manager.program(),
                manager.packages_for(capability).join(" ")
            );
            if !failed.is_empty() {
                hint.push_str(&format!(" (failed to install: {})", failed.join(", ")));
            }
            hint
        }
        None => format!(
            "no supported package manager found; install {} manually and re-run",
            capability.as_str()
        ),
    };
    if capability == Capability::Python {
        if let Some(version) = &capabilities.outdated_python {
            hint = format!("found python {version}, need >= {MIN_PYTHON}; {hint}");
        }
    }
    InstallerError::MissingTool {
        tool: capability.as_str().to_string(),
        hint,
    }
}
