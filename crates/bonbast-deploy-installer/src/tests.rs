use super::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Result};
use bonbast_deploy_core::{ArchiveType, ArtifactManifest, ConfigSet, FetchMode, ManifestEntry};

use crate::artifact::locate_source_root;
use crate::packages::{install_command, refresh_command};
use crate::receipts::parse_receipt;

/// Records every command and answers from scripted rules. Commands whose line
/// starts with a prefix in `failing` fail; `python3 -m venv <dir>` creates
/// `<dir>/bin/python`; `tar -xzf <archive> -C <dir>` materialises `extract_tree`.
#[derive(Default)]
struct FakeHost {
    tools: BTreeSet<String>,
    captures: BTreeMap<String, String>,
    failing: Vec<String>,
    commands: Vec<String>,
    extract_tree: Vec<(String, String)>,
    installs_fix: Vec<(String, String)>,
}

impl FakeHost {
    fn with_tools(tools: &[&str]) -> Self {
        Self {
            tools: tools.iter().map(|tool| tool.to_string()).collect(),
            ..Self::default()
        }
    }

    fn healthy() -> Self {
        let mut host = Self::with_tools(&["python3", "apt-get", "tar", "systemctl"]);
        host.captures
            .insert("python3 --version".to_string(), "Python 3.11.4".to_string());
        host
    }

    fn fail(mut self, prefix: &str) -> Self {
        self.failing.push(prefix.to_string());
        self
    }

    fn ran(&self, prefix: &str) -> bool {
        self.commands.iter().any(|line| line.starts_with(prefix))
    }

    fn count(&self, prefix: &str) -> usize {
        self.commands
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }
}

impl Host for FakeHost {
    fn locate(&self, tool: &str) -> Option<PathBuf> {
        self.tools.contains(tool).then(|| PathBuf::from(tool))
    }

    fn run(&mut self, command: &mut Command, context_message: &str) -> Result<()> {
        let line = command_line(command);
        self.commands.push(line.clone());
        if self.failing.iter().any(|prefix| line.starts_with(prefix)) {
            return Err(anyhow!("{context_message}: status=exit status: 1"));
        }

        for (package, tool) in self.installs_fix.clone() {
            if line.ends_with(&format!(" {package}")) && line.contains(" install") {
                self.tools.insert(tool);
            }
        }

        let args = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        if args.len() == 3 && args[0] == "-m" && args[1] == "venv" {
            let python = Path::new(&args[2]).join("bin").join("python");
            std::fs::create_dir_all(python.parent().expect("venv bin dir"))?;
            std::fs::write(&python, "")?;
        }
        if let [.., mode_flag, _, source, destination] = args.as_slice() {
            if mode_flag == "-m" && line.contains("install -m ") {
                std::fs::copy(source, destination)?;
            }
        }
        if line.starts_with("tar -x") {
            let dst = PathBuf::from(args.last().expect("destination"));
            for (rel, contents) in &self.extract_tree {
                let path = dst.join(rel);
                std::fs::create_dir_all(path.parent().expect("parent"))?;
                std::fs::write(path, contents)?;
            }
        }
        Ok(())
    }

    fn capture(&mut self, command: &mut Command, context_message: &str) -> Result<String> {
        let line = command_line(command);
        self.commands.push(line.clone());
        self.captures
            .get(&line)
            .cloned()
            .ok_or_else(|| anyhow!("{context_message}: no scripted output for '{line}'"))
    }
}

#[derive(Default)]
struct FakeDownloader {
    files: BTreeMap<String, Vec<u8>>,
}

impl FakeDownloader {
    fn serving(entries: &[(&str, &str)]) -> Self {
        Self {
            files: entries
                .iter()
                .map(|(url, body)| (url.to_string(), body.as_bytes().to_vec()))
                .collect(),
        }
    }
}

impl Downloader for FakeDownloader {
    fn download(&self, url: &str, destination: &Path) -> Result<u64> {
        let body = self
            .files
            .get(url)
            .ok_or_else(|| anyhow!("server rejected request: {url}: 404 Not Found"))?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(destination, body)?;
        Ok(body.len() as u64)
    }
}

fn test_layout() -> InstallLayout {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut path = std::env::temp_dir();
    path.push(format!(
        "bonbast-deploy-installer-test-{}-{nanos}-{seq}",
        std::process::id()
    ));
    InstallLayout::new(path)
}

const BASE: &str = "https://files.example.test/bot";

fn per_file_mode() -> FetchMode {
    FetchMode::PerFile {
        base_url: BASE.to_string(),
    }
}

fn full_bot_server() -> FakeDownloader {
    FakeDownloader::serving(&[
        ("https://files.example.test/bot/main.py", "print('bot')\n"),
        ("https://files.example.test/bot/storage.py", "# storage\n"),
        ("https://files.example.test/bot/bonbast_client.py", "# client\n"),
        ("https://files.example.test/bot/models.py", "# models\n"),
        (
            "https://files.example.test/bot/requirements.txt",
            "python-telegram-bot\nhttpx\n",
        ),
        ("https://files.example.test/bot/README.md", "# Bonbast bot\n"),
    ])
}

fn no_progress() -> impl FnMut(u64, u64) {
    |_, _| {}
}

fn answers_for_fresh_install() -> ScriptedInput {
    ScriptedInput::new()
        .with_text("bot_token", "T1")
        .with_text("owner_ids", "111")
}

#[test]
fn parse_python_version_handles_common_shapes() {
    assert_eq!(
        parse_python_version("Python 3.11.4"),
        Some(semver::Version::new(3, 11, 4))
    );
    assert_eq!(
        parse_python_version("Python 3.13.0rc1"),
        Some(semver::Version::new(3, 13, 0))
    );
    assert_eq!(
        parse_python_version("Python 3.10"),
        Some(semver::Version::new(3, 10, 0))
    );
    assert_eq!(parse_python_version("command not found"), None);
}

#[test]
fn probe_reports_complete_host() {
    let mut host = FakeHost::healthy();
    let capabilities = probe(&mut host, &per_file_mode());
    assert!(capabilities.is_complete());
    assert_eq!(
        capabilities.python.as_ref().map(|python| python.version.clone()),
        Some(semver::Version::new(3, 11, 4))
    );
    assert_eq!(capabilities.package_manager, Some(PackageManager::AptGet));
    assert!(host.ran("python3 -c import ensurepip, venv"));
}

#[test]
fn probe_flags_old_python_and_missing_tar_in_archive_mode() {
    let mut host = FakeHost::with_tools(&["python3", "dnf"]);
    host.captures
        .insert("python3 --version".to_string(), "Python 3.8.10".to_string());
    let mode = FetchMode::Archive {
        url: "https://example.test/bot.tar.gz".to_string(),
        archive_type: ArchiveType::TarGz,
    };

    let capabilities = probe(&mut host, &mode);
    assert_eq!(
        capabilities.missing,
        vec![Capability::Python, Capability::Venv, Capability::Tar]
    );
    assert_eq!(
        capabilities.outdated_python,
        Some(semver::Version::new(3, 8, 10))
    );
    assert_eq!(
        capabilities.packages_to_install(),
        vec!["python3", "python3-pip", "tar"]
    );
}

#[test]
fn probe_does_not_need_tar_in_per_file_mode() {
    let mut host = FakeHost::healthy();
    host.tools.remove("tar");
    assert!(probe(&mut host, &per_file_mode()).is_complete());
}

#[test]
fn probe_accepts_tar_for_zip_archives() {
    let mode = FetchMode::Archive {
        url: "https://example.test/bot.zip".to_string(),
        archive_type: ArchiveType::Zip,
    };
    let mut host = FakeHost::healthy();
    assert!(probe(&mut host, &mode).is_complete());

    host.tools.remove("tar");
    assert_eq!(probe(&mut host, &mode).missing, vec![Capability::Unzip]);

    host.tools.insert("unzip".to_string());
    assert!(probe(&mut host, &mode).is_complete());
}

#[test]
fn probe_detects_missing_venv_support() {
    let mut host = FakeHost::healthy().fail("python3 -c");
    let capabilities = probe(&mut host, &per_file_mode());
    assert_eq!(capabilities.missing, vec![Capability::Venv]);
    assert_eq!(
        capabilities.packages_to_install(),
        vec!["python3-venv", "python3-pip"]
    );
}

#[test]
fn install_commands_per_manager() {
    let line = |manager| command_line(&install_command(Privilege::Root, manager, "python3"));
    assert_eq!(line(PackageManager::AptGet), "apt-get install -y python3");
    assert_eq!(line(PackageManager::Dnf), "dnf install -y python3");
    assert_eq!(
        line(PackageManager::Pacman),
        "pacman -S --noconfirm --needed python3"
    );
    assert_eq!(
        line(PackageManager::Zypper),
        "zypper --non-interactive install python3"
    );
    assert_eq!(line(PackageManager::Apk), "apk add --no-cache python3");
    assert_eq!(
        command_line(&install_command(
            Privilege::Sudo,
            PackageManager::AptGet,
            "tar"
        )),
        "sudo apt-get install -y tar"
    );
    assert!(refresh_command(Privilege::Root, PackageManager::Dnf).is_none());
}

#[test]
fn install_packages_continues_after_a_failure() {
    let mut host = FakeHost::healthy().fail("apt-get install -y python3-venv");
    let mut report = StepReport::new();

    let outcome = install_packages(
        &mut host,
        Privilege::Root,
        PackageManager::AptGet,
        &["python3-venv", "python3-pip"],
        &mut report,
    );

    assert_eq!(outcome.installed, vec!["python3-pip"]);
    assert_eq!(outcome.failed, vec!["python3-venv"]);
    assert!(host.ran("apt-get update"));
    assert!(host.ran("apt-get install -y python3-pip"));
    let failures = report.failures_for("packages");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].subject, "python3-venv");
    assert_eq!(failures[0].severity, Severity::Recoverable);
    assert!(!report.has_fatal());
}

#[test]
fn ensure_prerequisites_installs_missing_and_rechecks() {
    let mut host = FakeHost::healthy();
    host.tools.remove("tar");
    host.installs_fix
        .push(("tar".to_string(), "tar".to_string()));
    let mode = FetchMode::Archive {
        url: "https://example.test/bot.tar.gz".to_string(),
        archive_type: ArchiveType::TarGz,
    };
    let mut report = StepReport::new();

    let capabilities =
        ensure_prerequisites(&mut host, Privilege::Root, &mode, &mut report).expect("must recover");
    assert!(capabilities.is_complete());
    assert!(host.ran("apt-get install -y tar"));
    assert!(report.failures().is_empty());
}

#[test]
fn ensure_prerequisites_fails_without_package_manager() {
    let mut host = FakeHost::with_tools(&["systemctl"]);
    let mut report = StepReport::new();

    let err = ensure_prerequisites(&mut host, Privilege::Root, &per_file_mode(), &mut report)
        .expect_err("python is missing and cannot be installed");
    match err.downcast_ref::<InstallerError>() {
        Some(InstallerError::MissingTool { tool, hint }) => {
            assert_eq!(tool, "python3");
            assert!(hint.contains("no supported package manager"), "{hint}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn ensure_prerequisites_fails_with_hint_when_still_missing() {
    let mut host = FakeHost::healthy().fail("python3 -c");
    let mut report = StepReport::new();

    let err = ensure_prerequisites(&mut host, Privilege::Root, &per_file_mode(), &mut report)
        .expect_err("venv stays broken");
    let message = err.to_string();
    assert!(message.contains("python3 venv"), "{message}");
    assert!(
        message.contains("apt-get python3-venv python3-pip"),
        "{message}"
    );
    assert!(host.ran("apt-get install -y python3-venv"));
}

#[test]
fn ensure_prerequisites_names_packages_that_failed_to_install() {
    let mut host = FakeHost::healthy().fail("apt-get install -y tar");
    host.tools.remove("tar");
    let mode = FetchMode::Archive {
        url: "https://example.test/bot.tar.gz".to_string(),
        archive_type: ArchiveType::TarGz,
    };
    let mut report = StepReport::new();

    let err = ensure_prerequisites(&mut host, Privilege::Root, &mode, &mut report)
        .expect_err("tar stays missing");
    match err.downcast_ref::<InstallerError>() {
        Some(InstallerError::MissingTool { tool, hint }) => {
            assert_eq!(tool, "tar");
            assert!(hint.contains("apt-get tar"), "{hint}");
            assert!(hint.ends_with("(failed to install: tar)"), "{hint}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(report.recoverable().count(), 1);
}

#[test]
fn per_file_fetch_installs_manifest_and_hashes() {
    let layout = test_layout();
    let mut host = FakeHost::healthy();
    let mut report = StepReport::new();
    let mut seen = Vec::new();

    let outcome = fetch_artifacts(
        &full_bot_server(),
        &mut host,
        FetchRequest {
            mode: &per_file_mode(),
            manifest: &ArtifactManifest::bonbast_bot(),
            layout: &layout,
        },
        &mut report,
        &mut |current: u64, total: u64| seen.push((current, total)),
    )
    .expect("fetch must succeed");

    assert_eq!(outcome.mode, "per-file");
    assert_eq!(outcome.files.len(), 6);
    assert!(outcome.skipped.is_empty());
    assert_eq!(
        std::fs::read_to_string(layout.app_dir().join("main.py")).expect("main.py"),
        "print('bot')\n"
    );
    assert_eq!(outcome.files[0].sha256.len(), 64);
    assert_eq!(seen.last(), Some(&(6, 6)));
    assert!(!layout.staging_root().exists());

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn per_file_fetch_swallows_best_effort_failure() {
    let layout = test_layout();
    let mut host = FakeHost::healthy();
    let mut server = full_bot_server();
    server
        .files
        .remove("https://files.example.test/bot/README.md");
    let mut report = StepReport::new();

    let outcome = fetch_artifacts(
        &server,
        &mut host,
        FetchRequest {
            mode: &per_file_mode(),
            manifest: &ArtifactManifest::bonbast_bot(),
            layout: &layout,
        },
        &mut report,
        &mut no_progress(),
    )
    .expect("best-effort failure must not abort");

    assert_eq!(outcome.skipped, vec!["README.md"]);
    assert_eq!(outcome.files.len(), 5);
    let failures = report.recoverable().collect::<Vec<_>>();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].subject, "README.md");
    assert!(!layout.app_dir().join("README.md").exists());

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn per_file_fetch_required_failure_leaves_app_dir_untouched() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("dirs");
    std::fs::write(layout.app_dir().join("main.py"), "old main\n").expect("seed main");
    std::fs::write(layout.env_file(), "BOT_TOKEN=OLD\n").expect("seed env");

    let mut server = full_bot_server();
    server
        .files
        .remove("https://files.example.test/bot/models.py");
    let mut host = FakeHost::healthy();
    let mut report = StepReport::new();

    let err = fetch_artifacts(
        &server,
        &mut host,
        FetchRequest {
            mode: &per_file_mode(),
            manifest: &ArtifactManifest::bonbast_bot(),
            layout: &layout,
        },
        &mut report,
        &mut no_progress(),
    )
    .expect_err("required failure must abort");

    assert!(matches!(
        err.downcast_ref::<InstallerError>(),
        Some(InstallerError::Download { url, .. }) if url.ends_with("/models.py")
    ));
    assert!(report.has_fatal());
    assert_eq!(
        std::fs::read_to_string(layout.app_dir().join("main.py")).expect("main.py"),
        "old main\n"
    );
    assert_eq!(
        std::fs::read_to_string(layout.env_file()).expect("env"),
        "BOT_TOKEN=OLD\n"
    );

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn archive_fetch_overlays_app_dir_and_preserves_env_and_venv() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("dirs");
    std::fs::write(layout.env_file(), "BOT_TOKEN=KEEP\n").expect("seed env");
    std::fs::create_dir_all(layout.venv_dir().join("bin")).expect("venv");
    std::fs::write(layout.venv_python(), "").expect("venv python");
    std::fs::write(layout.app_dir().join("main.py"), "old\n").expect("old main");

    let mut host = FakeHost::healthy();
    host.extract_tree = vec![
        ("bot-main/main.py".to_string(), "new\n".to_string()),
        ("bot-main/storage.py".to_string(), "#\n".to_string()),
        ("bot-main/bonbast_client.py".to_string(), "#\n".to_string()),
        ("bot-main/models.py".to_string(), "#\n".to_string()),
        ("bot-main/requirements.txt".to_string(), "httpx\n".to_string()),
        ("bot-main/.env".to_string(), "BOT_TOKEN=FROM_ARCHIVE\n".to_string()),
        ("bot-main/lib/helpers.py".to_string(), "#\n".to_string()),
    ];
    let url = "https://example.test/bot/archive/refs/heads/main.tar.gz";
    let server = FakeDownloader::serving(&[(url, "not really gzip")]);
    let mode = FetchMode::from_location(url).expect("mode");
    let mut report = StepReport::new();

    let outcome = fetch_artifacts(
        &server,
        &mut host,
        FetchRequest {
            mode: &mode,
            manifest: &ArtifactManifest::bonbast_bot(),
            layout: &layout,
        },
        &mut report,
        &mut no_progress(),
    )
    .expect("archive fetch must succeed");

    assert_eq!(outcome.mode, "archive");
    assert_eq!(outcome.skipped, vec!["README.md"]);
    assert!(host.ran("tar -xzf"));
    assert_eq!(
        std::fs::read_to_string(layout.app_dir().join("main.py")).expect("main"),
        "new\n"
    );
    assert!(layout.app_dir().join("lib/helpers.py").exists());
    assert_eq!(
        std::fs::read_to_string(layout.env_file()).expect("env"),
        "BOT_TOKEN=KEEP\n"
    );
    assert!(layout.venv_python().exists());

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn zip_fetch_extracts_with_tar_when_unzip_is_absent() {
    let layout = test_layout();
    let mut host = FakeHost::healthy();
    host.extract_tree = [
        "main.py",
        "storage.py",
        "bonbast_client.py",
        "models.py",
        "requirements.txt",
    ]
    .iter()
    .map(|name| (format!("bot-main/{name}"), "#\n".to_string()))
    .collect();
    let url = "https://example.test/bot/archive/main.zip";
    let server = FakeDownloader::serving(&[(url, "not really zip")]);
    let mode = FetchMode::from_location(url).expect("mode");
    let mut report = StepReport::new();

    let outcome = fetch_artifacts(
        &server,
        &mut host,
        FetchRequest {
            mode: &mode,
            manifest: &ArtifactManifest::bonbast_bot(),
            layout: &layout,
        },
        &mut report,
        &mut no_progress(),
    )
    .expect("zip fetch must succeed");

    assert_eq!(outcome.files.len(), 5);
    assert!(!host.ran("unzip"));
    assert!(host.ran("tar -xf"));
    assert!(layout.app_dir().join("models.py").exists());
    assert!(!layout.staging_root().exists());

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn archive_fetch_missing_required_file_is_fatal() {
    let layout = test_layout();
    let mut host = FakeHost::healthy();
    host.extract_tree = vec![("bot-main/main.py".to_string(), "x\n".to_string())];
    let url = "https://example.test/bot.tar.gz";
    let server = FakeDownloader::serving(&[(url, "gz")]);
    let mode = FetchMode::from_location(url).expect("mode");
    let mut report = StepReport::new();

    let err = fetch_artifacts(
        &server,
        &mut host,
        FetchRequest {
            mode: &mode,
            manifest: &ArtifactManifest::bonbast_bot(),
            layout: &layout,
        },
        &mut report,
        &mut no_progress(),
    )
    .expect_err("missing storage.py must abort");
    assert!(err.to_string().contains("archive does not contain storage.py"));
    assert!(!layout.app_dir().join("main.py").exists());

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn archive_fetch_unreachable_url_is_download_error() {
    let layout = test_layout();
    let mut host = FakeHost::healthy();
    let mode = FetchMode::from_location("https://unreachable.test/bot.zip").expect("mode");
    let mut report = StepReport::new();

    let err = fetch_artifacts(
        &FakeDownloader::default(),
        &mut host,
        FetchRequest {
            mode: &mode,
            manifest: &ArtifactManifest::bonbast_bot(),
            layout: &layout,
        },
        &mut report,
        &mut no_progress(),
    )
    .expect_err("unreachable");
    assert!(matches!(
        err.downcast_ref::<InstallerError>(),
        Some(InstallerError::Download { .. })
    ));
    assert!(!host.ran("unzip"));

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn locate_source_root_prefers_branch_suffix() {
    let layout = test_layout();
    let raw = layout.root().join("raw");
    std::fs::create_dir_all(raw.join("aaa-docs")).expect("dir");
    std::fs::create_dir_all(raw.join("bot-master")).expect("dir");
    assert_eq!(
        locate_source_root(&raw).expect("root"),
        raw.join("bot-master")
    );

    std::fs::remove_dir_all(raw.join("bot-master")).expect("remove");
    assert_eq!(locate_source_root(&raw).expect("root"), raw.join("aaa-docs"));

    std::fs::remove_dir_all(raw.join("aaa-docs")).expect("remove");
    assert_eq!(locate_source_root(&raw).expect("root"), raw);

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn ensure_environment_creates_then_reuses_venv() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("dirs");
    std::fs::write(layout.requirements_path(), "httpx\n").expect("requirements");
    let mut host = FakeHost::healthy();

    let first = ensure_environment(&mut host, &layout, Path::new("python3")).expect("create");
    assert!(first.created);
    assert!(first.installed_requirements);
    assert_eq!(first.interpreter, layout.venv_python());

    let second = ensure_environment(&mut host, &layout, Path::new("python3")).expect("reuse");
    assert!(!second.created);
    assert_eq!(host.count("python3 -m venv"), 1);
    assert_eq!(
        host.count(&format!(
            "{} -m pip install --upgrade pip",
            layout.venv_python().display()
        )),
        2
    );
    assert_eq!(
        host.count(&format!(
            "{} -m pip install -r",
            layout.venv_python().display()
        )),
        2
    );

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn ensure_environment_failure_is_build_error() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("dirs");
    std::fs::write(layout.requirements_path(), "httpx\n").expect("requirements");
    let failing_pip = format!("{} -m pip install -r", layout.venv_python().display());
    let mut host = FakeHost::healthy().fail(&failing_pip);

    let err = ensure_environment(&mut host, &layout, Path::new("python3"))
        .expect_err("pip failure is fatal");
    assert!(matches!(
        err.downcast_ref::<InstallerError>(),
        Some(InstallerError::Build(_))
    ));

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn reconcile_fresh_applies_defaults() {
    let layout = InstallLayout::new("/opt/bonbast-bot");
    let defaults = ConfigDefaults::for_layout(&layout);
    let mut input = answers_for_fresh_install();

    let reconciled = reconcile(None, &mut input, &defaults).expect("reconcile");
    assert_eq!(reconciled.action, ConfigAction::Created);
    assert_eq!(
        reconciled.config.render().expect("render"),
        "BOT_TOKEN=T1\nOWNER_IDS=111\nDB_PATH=/opt/bonbast-bot/bot.db\nLOG_LEVEL=INFO\n"
    );
    assert!(!input.asked().iter().any(|id| id == KEEP_CONFIG_ID));
}

#[test]
fn reconcile_fresh_without_token_is_input_error() {
    let defaults = ConfigDefaults::for_layout(&InstallLayout::new("/srv/bot"));
    let mut input = ScriptedInput::new().with_text("owner_ids", "111");

    let err = reconcile(None, &mut input, &defaults).expect_err("token is required");
    assert!(matches!(
        err.downcast_ref::<InstallerError>(),
        Some(InstallerError::Input(message)) if message.contains("BOT_TOKEN")
    ));
}

#[test]
fn reconcile_rejects_invalid_owner_ids() {
    let defaults = ConfigDefaults::for_layout(&InstallLayout::new("/srv/bot"));
    let mut input = ScriptedInput::new()
        .with_text("bot_token", "T1")
        .with_text("owner_ids", "me");

    let err = reconcile(None, &mut input, &defaults).expect_err("owner ids must be numeric");
    assert!(err.to_string().contains("OWNER_IDS"));
}

#[test]
fn reconcile_keep_returns_existing_untouched() {
    let existing = ConfigSet::parse("BOT_TOKEN=OLD\nFOO=bar\n");
    let defaults = ConfigDefaults::for_layout(&InstallLayout::new("/srv/bot"));
    let mut input = ScriptedInput::new();

    let reconciled = reconcile(Some(&existing), &mut input, &defaults).expect("reconcile");
    assert_eq!(reconciled.action, ConfigAction::Kept);
    assert_eq!(reconciled.config, existing);
    assert_eq!(input.asked(), [KEEP_CONFIG_ID.to_string()]);
}

#[test]
fn reconcile_merge_keeps_foreign_and_current_values() {
    let existing = ConfigSet::parse("FOO=bar\nBOT_TOKEN=OLD\n");
    let defaults = ConfigDefaults::for_layout(&InstallLayout::new("/srv/bot"));
    let mut input = ScriptedInput::new()
        .with_confirmation(KEEP_CONFIG_ID, false)
        .with_text("owner_ids", "42");

    let reconciled = reconcile(Some(&existing), &mut input, &defaults).expect("reconcile");
    assert_eq!(reconciled.action, ConfigAction::Merged);
    assert_eq!(reconciled.config.get("FOO"), Some("bar"));
    assert_eq!(reconciled.config.get("BOT_TOKEN"), Some("OLD"));
    assert_eq!(reconciled.config.get("OWNER_IDS"), Some("42"));
    assert_eq!(reconciled.config.get("DB_PATH"), Some("/srv/bot/bot.db"));
    assert_eq!(reconciled.config.get("LOG_LEVEL"), Some("INFO"));
}

#[test]
fn reconcile_merge_with_empty_answers_requires_missing_owner_ids() {
    let existing = ConfigSet::parse("FOO=bar\nBOT_TOKEN=OLD\n");
    let defaults = ConfigDefaults::for_layout(&InstallLayout::new("/srv/bot"));
    let mut input = ScriptedInput::new().with_confirmation(KEEP_CONFIG_ID, false);

    let err = reconcile(Some(&existing), &mut input, &defaults).expect_err("owner ids missing");
    assert!(matches!(
        err.downcast_ref::<InstallerError>(),
        Some(InstallerError::Input(message)) if message.contains("OWNER_IDS")
    ));
}

#[test]
fn reconcile_merge_with_empty_answers_keeps_every_current_value() {
    let existing = ConfigSet::parse("FOO=bar\nBOT_TOKEN=OLD\nOWNER_IDS=7\nLOG_LEVEL=WARNING\n");
    let defaults = ConfigDefaults::for_layout(&InstallLayout::new("/srv/bot"));
    let mut input = ScriptedInput::new().with_confirmation(KEEP_CONFIG_ID, false);

    let reconciled = reconcile(Some(&existing), &mut input, &defaults).expect("reconcile");
    assert_eq!(reconciled.action, ConfigAction::Merged);
    assert_eq!(
        reconciled.config.render().expect("render"),
        "BOT_TOKEN=OLD\nOWNER_IDS=7\nDB_PATH=/srv/bot/bot.db\nLOG_LEVEL=WARNING\nFOO=bar\n"
    );
}

#[test]
fn env_file_kept_byte_for_byte() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("dirs");
    let original = "# operator notes\nBOT_TOKEN=OLD\nFOO=bar\n\n";
    std::fs::write(layout.env_file(), original).expect("seed");
    let defaults = ConfigDefaults::for_layout(&layout);

    for _ in 0..2 {
        let outcome = reconcile_env_file(&layout, &mut ScriptedInput::new(), &defaults)
            .expect("reconcile");
        assert_eq!(outcome.action, ConfigAction::Kept);
    }
    assert_eq!(
        std::fs::read_to_string(layout.env_file()).expect("env"),
        original
    );

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn env_file_with_invalid_utf8_is_kept_untouched() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("dirs");
    let original = b"BOT_TOKEN=OLD\nNOTE=caf\xe9\xff\n".to_vec();
    std::fs::write(layout.env_file(), &original).expect("seed");

    let outcome = reconcile_env_file(
        &layout,
        &mut ScriptedInput::new(),
        &ConfigDefaults::for_layout(&layout),
    )
    .expect("non-UTF-8 bytes must not block keeping the file");
    assert_eq!(outcome.action, ConfigAction::Kept);
    assert_eq!(std::fs::read(layout.env_file()).expect("env"), original);

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn env_file_merge_rewrites_managed_first() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("dirs");
    std::fs::write(
        layout.env_file(),
        "FOO=bar\nBOT_TOKEN=OLD\nOWNER_IDS=7\nEXTRA=a=b\n",
    )
    .expect("seed");
    let defaults = ConfigDefaults::for_layout(&layout);
    let mut input = ScriptedInput::new()
        .with_confirmation(KEEP_CONFIG_ID, false)
        .with_text("log_level", "debug");

    let outcome = reconcile_env_file(&layout, &mut input, &defaults).expect("reconcile");
    assert_eq!(outcome.action, ConfigAction::Merged);
    assert_eq!(outcome.foreign_keys, 2);
    assert_eq!(
        std::fs::read_to_string(layout.env_file()).expect("env"),
        format!(
            "BOT_TOKEN=OLD\nOWNER_IDS=7\nDB_PATH={}\nLOG_LEVEL=DEBUG\nFOO=bar\nEXTRA=a=b\n",
            layout.default_db_path().display()
        )
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(layout.env_file())
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn scripted_input_from_toml() {
    let input = ScriptedInput::from_toml_str(
        "bot_token = \"T1\"\nowner_ids = 111\nkeep_config = false\n",
    )
    .expect("parse");
    assert_eq!(
        input,
        ScriptedInput::new()
            .with_text("bot_token", "T1")
            .with_text("owner_ids", "111")
            .with_confirmation("keep_config", false)
    );

    let err = ScriptedInput::from_toml_str("owner_ids = [1, 2]\n").expect_err("array");
    assert!(err.to_string().contains("owner_ids"));
}

#[test]
fn register_new_unit_reloads_enables_and_restarts() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("dirs");
    let unit_path = layout.root().join("bonbast-bot.service");
    let unit = bot_service_unit(&layout);
    let mut host = FakeHost::healthy();

    let outcome = register_and_start(&mut host, Privilege::Root, &layout, &unit, &unit_path)
        .expect("register");
    assert!(outcome.newly_registered);
    assert!(outcome.unit_changed);
    assert_eq!(
        host.commands,
        vec![
            "systemctl daemon-reload",
            "systemctl enable bonbast-bot",
            "systemctl restart bonbast-bot"
        ]
    );
    let written = std::fs::read_to_string(&unit_path).expect("unit");
    assert!(written.contains(&format!("EnvironmentFile={}", layout.env_file().display())));

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn register_under_sudo_installs_unit_through_sudo() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("dirs");
    let unit_path = layout.root().join("bonbast-bot.service");
    let unit = bot_service_unit(&layout);
    let mut host = FakeHost::healthy();

    let outcome = register_and_start(&mut host, Privilege::Sudo, &layout, &unit, &unit_path)
        .expect("register");
    assert!(outcome.newly_registered);
    assert_eq!(host.commands.len(), 4);
    assert!(host.commands[0].starts_with("sudo install -m 0644 "));
    assert!(host.commands[0].ends_with(&format!("bonbast-bot.service {}", unit_path.display())));
    assert_eq!(
        &host.commands[1..],
        [
            "sudo systemctl daemon-reload",
            "sudo systemctl enable bonbast-bot",
            "sudo systemctl restart bonbast-bot"
        ]
    );
    assert_eq!(std::fs::read_to_string(&unit_path).expect("unit"), unit.render());
    assert!(!layout.staging_root().exists());

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn register_under_sudo_reports_failed_unit_install() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("dirs");
    let unit_path = layout.root().join("bonbast-bot.service");
    let mut host = FakeHost::healthy().fail("sudo install");

    let err = register_and_start(
        &mut host,
        Privilege::Sudo,
        &layout,
        &bot_service_unit(&layout),
        &unit_path,
    )
    .expect_err("install fails");
    assert!(matches!(
        err.downcast_ref::<InstallerError>(),
        Some(InstallerError::Service(_))
    ));
    assert!(!host.ran("sudo systemctl"));
    assert!(!unit_path.exists());

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn register_existing_unit_only_restarts() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("dirs");
    let unit_path = layout.root().join("bonbast-bot.service");
    let unit = bot_service_unit(&layout);
    std::fs::write(&unit_path, unit.render()).expect("seed unit");
    let mut host = FakeHost::healthy();

    let outcome = register_and_start(&mut host, Privilege::Sudo, &layout, &unit, &unit_path)
        .expect("register");
    assert!(!outcome.newly_registered);
    assert!(!outcome.unit_changed);
    assert_eq!(host.commands, vec!["sudo systemctl restart bonbast-bot"]);

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn register_changed_unit_reloads_without_enable() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("dirs");
    let unit_path = layout.root().join("bonbast-bot.service");
    std::fs::write(&unit_path, "[Unit]\nDescription=old\n").expect("seed unit");
    let mut host = FakeHost::healthy();

    register_and_start(
        &mut host,
        Privilege::Root,
        &layout,
        &bot_service_unit(&layout),
        &unit_path,
    )
    .expect("register");
    assert_eq!(
        host.commands,
        vec!["systemctl daemon-reload", "systemctl restart bonbast-bot"]
    );

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn register_without_systemd_is_service_error() {
    let layout = test_layout();
    let mut host = FakeHost::with_tools(&["python3"]);
    let err = register_and_start(
        &mut host,
        Privilege::Root,
        &layout,
        &bot_service_unit(&layout),
        &layout.root().join("unit.service"),
    )
    .expect_err("no systemctl");
    assert!(matches!(
        err.downcast_ref::<InstallerError>(),
        Some(InstallerError::Service(_))
    ));
}

#[test]
fn privilege_detection() {
    let mut host = FakeHost::with_tools(&["sudo"]);
    host.captures.insert("id -u".to_string(), "0".to_string());
    assert_eq!(Privilege::detect(&mut host), Privilege::Root);

    host.captures.insert("id -u".to_string(), "1000".to_string());
    assert_eq!(Privilege::detect(&mut host), Privilege::Sudo);

    host.tools.clear();
    assert_eq!(Privilege::detect(&mut host), Privilege::Unprivileged);
}

#[test]
fn install_lock_blocks_second_holder_and_releases_on_drop() {
    let layout = test_layout();
    let lock = InstallLock::acquire(&layout).expect("first lock");
    assert!(lock.path().exists());

    let err = InstallLock::acquire(&layout).expect_err("second lock must fail");
    match err.downcast_ref::<InstallerError>() {
        Some(InstallerError::Locked { pid, .. }) => {
            assert_eq!(pid, &std::process::id().to_string());
        }
        other => panic!("unexpected error: {other:?}"),
    }

    drop(lock);
    assert!(!layout.lock_path().exists());
    let relock = InstallLock::acquire(&layout).expect("lock after release");

    drop(relock);
    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn receipt_write_then_read() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("dirs");
    let receipt = InstallReceipt {
        source: BASE.to_string(),
        mode: "per-file".to_string(),
        files: vec![FetchedFile {
            name: "main.py".to_string(),
            sha256: "ab".repeat(32),
        }],
        skipped: vec!["README.md".to_string()],
        installed_at_unix: 1_771_001_234,
    };

    write_install_receipt(&layout, &receipt).expect("write");
    assert_eq!(
        read_install_receipt(&layout).expect("read"),
        Some(receipt)
    );

    let _ = std::fs::remove_dir_all(layout.root());
}

#[test]
fn read_receipt_missing_is_none() {
    let layout = test_layout();
    assert_eq!(read_install_receipt(&layout).expect("read"), None);
}

#[test]
fn parse_receipt_rejects_malformed_file_entry() {
    let err = parse_receipt("source=x\nfile=main.py\ninstalled_at_unix=1\n")
        .expect_err("missing digest");
    assert!(err.to_string().contains("file entry"));
}

#[test]
fn custom_manifest_entries_feed_per_file_urls() {
    let layout = test_layout();
    let manifest = ArtifactManifest::new(vec![
        ManifestEntry::required("main.py"),
        ManifestEntry::best_effort("docs/USAGE.md"),
    ])
    .expect("manifest");
    let server = FakeDownloader::serving(&[
        ("https://files.example.test/bot/main.py", "x"),
        ("https://files.example.test/bot/docs/USAGE.md", "y"),
    ]);
    let mut host = FakeHost::healthy();
    let mut report = StepReport::new();

    let outcome = fetch_artifacts(
        &server,
        &mut host,
        FetchRequest {
            mode: &per_file_mode(),
            manifest: &manifest,
            layout: &layout,
        },
        &mut report,
        &mut no_progress(),
    )
    .expect("fetch");
    assert_eq!(
        outcome
            .files
            .iter()
            .map(|file| file.name.as_str())
            .collect::<Vec<_>>(),
        vec!["main.py", "docs/USAGE.md"]
    );
    assert!(layout.app_dir().join("docs/USAGE.md").exists());

    let _ = std::fs::remove_dir_all(layout.root());
}
