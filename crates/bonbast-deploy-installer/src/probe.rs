use bonbast_deploy_core::{ArchiveType, FetchMode};
use semver::Version;
use std::path::PathBuf;
use std::process::Command;

use crate::host::Host;

pub const MIN_PYTHON: Version = Version::new(3, 10, 0);
pub const PYTHON: &str = "python3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
    Python,
    Venv,
    Tar,
    Unzip,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python3",
            Self::Venv => "python3 venv",
            Self::Tar => "tar",
            Self::Unzip => "unzip",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    AptGet,
    Dnf,
    Yum,
    Pacman,
    Zypper,
    Apk,
}

impl PackageManager {
    pub const SEARCH_ORDER: [PackageManager; 6] = [
        PackageManager::AptGet,
        PackageManager::Dnf,
        PackageManager::Yum,
        PackageManager::Pacman,
        PackageManager::Zypper,
        PackageManager::Apk,
    ];

    pub fn program(self) -> &'static str {
        match self {
            Self::AptGet => "apt-get",
            Self::Dnf => "dnf",
            Self::Yum => "yum",
            Self::Pacman => "pacman",
            Self::Zypper => "zypper",
            Self::Apk => "apk",
        }
    }

    /// Distribution package names that provide a capability.
    pub fn packages_for(self, capability: Capability) -> &'static [&'static str] {
        match (self, capability) {
            (Self::Pacman, Capability::Python) => &["python"],
            (_, Capability::Python) => &["python3"],
            (Self::AptGet, Capability::Venv) => &["python3-venv", "python3-pip"],
            (Self::Pacman, Capability::Venv) => &["python-pip"],
            (Self::Apk, Capability::Venv) => &["py3-pip"],
            (_, Capability::Venv) => &["python3-pip"],
            (_, Capability::Tar) => &["tar"],
            (_, Capability::Unzip) => &["unzip"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonRuntime {
    pub path: PathBuf,
    pub version: Version,
}

/// Read-only snapshot of what the host can do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySet {
    pub python: Option<PythonRuntime>,
    pub outdated_python: Option<Version>,
    pub missing: Vec<Capability>,
    pub package_manager: Option<PackageManager>,
}

impl CapabilitySet {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Packages to request from the package manager, deduplicated, in capability order.
    pub fn packages_to_install(&self) -> Vec<&'static str> {
        let Some(manager) = self.package_manager else {
            return Vec::new();
        };
        let mut packages: Vec<&'static str> = Vec::new();
        for capability in &self.missing {
            for package in manager.packages_for(*capability) {
                if !packages.contains(package) {
                    packages.push(package);
                }
            }
        }
        packages
    }
}

pub fn probe<H: Host + ?Sized>(host: &mut H, mode: &FetchMode) -> CapabilitySet {
    let mut missing = Vec::new();
    let mut outdated_python = None;

    let python = match host.locate(PYTHON) {
        Some(path) => match detect_python_version(host, &path) {
            Some(version) if version >= MIN_PYTHON => Some(PythonRuntime { path, version }),
            Some(version) => {
                tracing::info!(%version, minimum = %MIN_PYTHON, "python runtime is too old");
                outdated_python = Some(version);
                None
            }
            None => None,
        },
        None => None,
    };

    match &python {
        Some(runtime) => {
            if !venv_available(host, runtime) {
                missing.push(Capability::Venv);
            }
        }
        None => {
            missing.push(Capability::Python);
            missing.push(Capability::Venv);
        }
    }

    if let FetchMode::Archive { archive_type, .. } = mode {
        let has_tar = host.locate("tar").is_some();
        match archive_type {
            ArchiveType::TarGz if !has_tar => missing.push(Capability::Tar),
            // Zip extraction falls back to tar when unzip is absent.
            ArchiveType::Zip if !has_tar && host.locate("unzip").is_none() => {
                missing.push(Capability::Unzip)
            }
            _ => {}
        }
    }

    let package_manager = PackageManager::SEARCH_ORDER
        .into_iter()
        .find(|manager| host.locate(manager.program()).is_some());

    tracing::debug!(?missing, ?package_manager, "probe complete");
    CapabilitySet {
        python,
        outdated_python,
        missing,
        package_manager,
    }
}

fn detect_python_version<H: Host + ?Sized>(host: &mut H, path: &std::path::Path) -> Option<Version> {
    let raw = host
        .capture(
            Command::new(path).arg("--version"),
            "failed to query python version",
        )
        .ok()?;
    parse_python_version(&raw)
}

fn venv_available<H: Host + ?Sized>(host: &mut H, runtime: &PythonRuntime) -> bool {
    host.run(
        Command::new(&runtime.path)
            .arg("-c")
            .arg("import ensurepip, venv"),
        "python venv support check failed",
    )
    .is_ok()
}

/// Parses `Python 3.11.4` style output; a missing patch component counts as 0
/// and pre-release suffixes such as `rc1` are ignored.
pub fn parse_python_version(raw: &str) -> Option<Version> {
    let token = raw
        .split_whitespace()
        .find(|part| part.chars().next().is_some_and(|ch| ch.is_ascii_digit()))?;
    let mut numbers = token.split('.').map(|part| {
        let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
        digits.parse::<u64>().ok()
    });
    let major = numbers.next()??;
    let minor = numbers.next().flatten().unwrap_or(0);
    let patch = numbers.next().flatten().unwrap_or(0);
    Some(Version::new(major, minor, patch))
}
