use std::path::PathBuf;

use anyhow::{Context, Result};
use bonbast_deploy_core::{default_source_location, ArtifactManifest, FetchMode, SERVICE_NAME};
use bonbast_deploy_installer::{
    bot_service_unit, current_unix_timestamp, ensure_environment, ensure_prerequisites,
    expand_home, fetch_artifacts, read_install_receipt, reconcile_env_file, register_and_start,
    status_hint, write_install_receipt, ConfigDefaults, ConfigOutcome, Confirmation, Downloader,
    EnvironmentHandle, FetchOutcome, FetchRequest, Host, InputProvider, InstallLayout,
    InstallLock, InstallReceipt, InstallerError, Privilege, Question, ServiceOutcome, StepFailure,
    StepReport, DEFAULT_INSTALL_DIR,
};

use crate::render::{Status, Ui};

pub(crate) const INSTALL_DIR_ID: &str = "install_dir";
pub(crate) const SOURCE_ID: &str = "source";
pub(crate) const INSTALL_SERVICE_ID: &str = "install_service";

/// Where to install and where to fetch from, gathered before anything is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InstallPlan {
    pub(crate) layout: InstallLayout,
    pub(crate) source: FetchMode,
}

#[derive(Debug, Clone)]
pub(crate) struct RunOptions {
    pub(crate) unit_path: PathBuf,
    pub(crate) manifest: ArtifactManifest,
    pub(crate) lock: bool,
    pub(crate) source_override: Option<String>,
}

#[derive(Debug)]
pub(crate) struct InstallSummary {
    pub(crate) plan: InstallPlan,
    pub(crate) previous: Option<InstallReceipt>,
    pub(crate) fetch: FetchOutcome,
    pub(crate) environment: EnvironmentHandle,
    pub(crate) config: ConfigOutcome,
    pub(crate) service: Option<ServiceOutcome>,
    pub(crate) warnings: Vec<StepFailure>,
}

pub(crate) fn gather_plan(
    input: &mut dyn InputProvider,
    source_override: Option<&str>,
) -> Result<InstallPlan> {
    let answer = input.text(&Question {
        id: INSTALL_DIR_ID,
        label: "Install directory",
        default: Some(DEFAULT_INSTALL_DIR),
    })?;
    let install_dir = if answer.trim().is_empty() {
        DEFAULT_INSTALL_DIR.to_string()
    } else {
        answer.trim().to_string()
    };

    let default_source = default_source_location(source_override);
    let answer = input.text(&Question {
        id: SOURCE_ID,
        label: "Source location (base URL or .tar.gz/.zip archive)",
        default: Some(&default_source),
    })?;
    let location = if answer.trim().is_empty() {
        default_source
    } else {
        answer.trim().to_string()
    };
    let source = FetchMode::from_location(&location)
        .map_err(|err| InstallerError::Input(format!("{err:#}")))?;

    // The unit's WorkingDirectory and ExecStart must not depend on the caller's cwd.
    let root = std::path::absolute(expand_home(&install_dir))
        .with_context(|| format!("failed to resolve install directory: {install_dir}"))?;

    Ok(InstallPlan {
        layout: InstallLayout::new(root),
        source,
    })
}

/// Runs every step in order; the first fatal failure aborts the run.
pub(crate) fn run_install<H, D>(
    host: &mut H,
    downloader: &D,
    input: &mut dyn InputProvider,
    ui: Ui,
    options: &RunOptions,
) -> Result<InstallSummary>
where
    H: Host + ?Sized,
    D: Downloader + ?Sized,
{
    let plan = gather_plan(input, options.source_override.as_deref())?;
    let layout = &plan.layout;
    tracing::info!(root = %layout.root().display(), source = plan.source.location(), mode = plan.source.as_str(), "install plan");

    layout.ensure_base_dirs()?;
    let _lock = if options.lock {
        Some(InstallLock::acquire(layout)?)
    } else {
        None
    };

    let previous = read_install_receipt(layout)?;
    if let Some(receipt) = &previous {
        ui.status(
            Status::Step,
            &format!(
                "updating existing install from {} ({} files)",
                receipt.source,
                receipt.files.len()
            ),
        );
    }

    let mut report = StepReport::new();
    let privilege = Privilege::detect(host);
    tracing::debug!(privilege = privilege.as_str(), "detected privilege");

    ui.section("Prerequisites");
    let capabilities = ensure_prerequisites(host, privilege, &plan.source, &mut report)?;
    let python = capabilities
        .python
        .as_ref()
        .map(|runtime| runtime.path.clone())
        .ok_or_else(|| InstallerError::MissingTool {
            tool: "python3".to_string(),
            hint: "python runtime disappeared after probing".to_string(),
        })?;
    if let Some(runtime) = &capabilities.python {
        ui.status(
            Status::Ok,
            &format!("python {} at {}", runtime.version, runtime.path.display()),
        );
    }

    ui.section("Application files");
    let mut progress = ui.fetch_progress(options.manifest.entries().len() as u64);
    let fetched = fetch_artifacts(
        downloader,
        host,
        FetchRequest {
            mode: &plan.source,
            manifest: &options.manifest,
            layout,
        },
        &mut report,
        &mut |current: u64, total: u64| progress.update(current, total),
    );
    let fetch = match fetched {
        Ok(fetch) => {
            progress.finish(true);
            fetch
        }
        Err(err) => {
            progress.finish(false);
            return Err(err);
        }
    };
    ui.status(
        Status::Ok,
        &format!(
            "fetched {} files ({}) from {}",
            fetch.files.len(),
            fetch.mode,
            fetch.source
        ),
    );
    for skipped in &fetch.skipped {
        ui.status(Status::Skip, &format!("optional file {skipped} not available"));
    }
    let receipt = InstallReceipt::from_outcome(&fetch, current_unix_timestamp()?);
    write_install_receipt(layout, &receipt)?;

    ui.section("Python environment");
    let environment = ensure_environment(host, layout, &python)?;
    let verb = if environment.created { "created" } else { "reused" };
    ui.status(
        Status::Ok,
        &format!("{verb} virtual environment {}", environment.root.display()),
    );

    ui.section("Configuration");
    let config = reconcile_env_file(layout, input, &ConfigDefaults::for_layout(layout))?;
    ui.status(
        Status::Ok,
        &format!("configuration {} at {}", config.action.as_str(), config.path.display()),
    );

    ui.section("Service");
    let install_service = input.confirm(&Confirmation {
        id: INSTALL_SERVICE_ID,
        prompt: "Install and start the bot as a systemd service?",
        default: true,
    })?;
    let service = if install_service {
        let unit = bot_service_unit(layout);
        let outcome = register_and_start(host, privilege, layout, &unit, &options.unit_path)?;
        let state = if outcome.newly_registered {
            "registered and started"
        } else {
            "restarted"
        };
        ui.status(Status::Ok, &format!("service {SERVICE_NAME} {state}"));
        Some(outcome)
    } else {
        ui.status(Status::Skip, "service install declined; start the bot manually with:");
        ui.lines(&[manual_start_command(layout)]);
        None
    };

    Ok(InstallSummary {
        plan,
        previous,
        fetch,
        environment,
        config,
        service,
        warnings: report.recoverable().cloned().collect(),
    })
}

pub(crate) fn manual_start_command(layout: &InstallLayout) -> String {
    format!(
        "cd {} && {} {}",
        layout.app_dir().display(),
        layout.venv_python().display(),
        layout.entry_point().display()
    )
}

pub(crate) fn format_summary_lines(summary: &InstallSummary) -> Vec<String> {
    let mut lines = vec![format!(
        "install summary: root={} files={} skipped={} venv={} config={} warnings={}",
        summary.plan.layout.root().display(),
        summary.fetch.files.len(),
        summary.fetch.skipped.len(),
        if summary.environment.created {
            "created"
        } else {
            "reused"
        },
        summary.config.action.as_str(),
        summary.warnings.len()
    )];
    if let Some(previous) = &summary.previous {
        lines.push(format!(
            "previous install: source={} installed_at_unix={}",
            previous.source, previous.installed_at_unix
        ));
    }
    for warning in &summary.warnings {
        lines.push(format!("warning: {warning}"));
    }
    if summary.service.is_some() {
        lines.extend(status_hint(SERVICE_NAME));
    }
    lines
}

pub(crate) fn load_manifest(path: Option<&PathBuf>) -> Result<ArtifactManifest> {
    let Some(path) = path else {
        return Ok(ArtifactManifest::bonbast_bot());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest: {}", path.display()))?;
    ArtifactManifest::from_toml_str(&raw)
        .with_context(|| format!("invalid manifest: {}", path.display()))
}
