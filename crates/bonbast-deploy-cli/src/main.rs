use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use bonbast_deploy_core::{DEFAULT_UNIT_PATH, SOURCE_ENV_VAR};
use bonbast_deploy_installer::{HttpDownloader, InputProvider, ScriptedInput, SystemHost};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod flow;
mod prompts;
mod render;

use flow::{format_summary_lines, load_manifest, run_install, RunOptions};
use prompts::ConsoleInput;
use render::{current_output_style, Ui};

#[derive(Parser, Debug)]
#[command(name = "bonbast-deploy")]
#[command(about = "Install or update the Bonbast exchange-rate Telegram bot", long_about = None)]
struct Cli {
    /// TOML file with pre-supplied answers; no prompts are shown.
    #[arg(long)]
    answers: Option<PathBuf>,
    /// Disable colours, section headers and progress bars.
    #[arg(long)]
    plain: bool,
    /// Do not take the install lock.
    #[arg(long)]
    no_lock: bool,
    #[arg(long, default_value = DEFAULT_UNIT_PATH)]
    unit_path: PathBuf,
    /// TOML manifest replacing the built-in application file list.
    #[arg(long)]
    manifest: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let ui = Ui::new(current_output_style(cli.plain));
    let options = RunOptions {
        unit_path: cli.unit_path,
        manifest: load_manifest(cli.manifest.as_ref())?,
        lock: !cli.no_lock,
        source_override: std::env::var(SOURCE_ENV_VAR).ok(),
    };

    let mut input: Box<dyn InputProvider> = match &cli.answers {
        Some(path) => Box::new(ScriptedInput::from_file(path)?),
        None => Box::new(ConsoleInput::stdio()),
    };

    let mut host = SystemHost;
    let downloader = HttpDownloader::new()?;
    let summary = run_install(&mut host, &downloader, input.as_mut(), ui, &options)?;

    ui.section("Summary");
    ui.lines(&format_summary_lines(&summary));
    Ok(())
}
