use anyhow::{anyhow, Result};
use std::ffi::OsStr;
use std::io;
use std::path::PathBuf;
use std::process::Command;

/// Everything the installer needs from the machine it runs on: locating tools
/// and running commands. Tests swap in a recording implementation.
pub trait Host {
    fn locate(&self, tool: &str) -> Option<PathBuf>;

    fn run(&mut self, command: &mut Command, context_message: &str) -> Result<()>;

    /// Runs the command and returns its trimmed stdout (stderr when stdout is empty).
    fn capture(&mut self, command: &mut Command, context_message: &str) -> Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl Host for SystemHost {
    fn locate(&self, tool: &str) -> Option<PathBuf> {
        which::which(tool).ok()
    }

    fn run(&mut self, command: &mut Command, context_message: &str) -> Result<()> {
        tracing::debug!(command = %command_line(command), "running");
        run_command(command, context_message)
    }

    fn capture(&mut self, command: &mut Command, context_message: &str) -> Result<String> {
        tracing::debug!(command = %command_line(command), "capturing");
        let output = command
            .output()
            .map_err(|err| spawn_error(command, context_message, err))?;
        if !output.status.success() {
            return Err(anyhow!(
                "{context_message}: status={} stderr='{}'",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() {
            return Ok(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        Ok(stdout)
    }
}

pub(crate) fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .map_err(|err| spawn_error(command, context_message, err))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

fn spawn_error(command: &Command, context_message: &str, err: io::Error) -> anyhow::Error {
    if err.kind() == io::ErrorKind::NotFound {
        return anyhow!(
            "{context_message}: required tool '{}' was not found on PATH",
            command.get_program().to_string_lossy()
        );
    }
    anyhow::Error::new(err).context(format!("{context_message}: command failed to start"))
}

/// Renders a command as a single shell-like line for logs and tests.
pub fn command_line(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    parts.extend(
        command
            .get_args()
            .map(|arg: &OsStr| arg.to_string_lossy().into_owned()),
    );
    parts.join(" ")
}

/// How privileged commands (package manager, systemctl) are launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Root,
    Sudo,
    Unprivileged,
}

impl Privilege {
    pub fn detect<H: Host + ?Sized>(host: &mut H) -> Self {
        let uid = host
            .capture(Command::new("id").arg("-u"), "failed to read effective uid")
            .ok();
        if uid.as_deref() == Some("0") {
            return Self::Root;
        }
        if host.locate("sudo").is_some() {
            return Self::Sudo;
        }
        Self::Unprivileged
    }

    pub fn command(self, program: &str) -> Command {
        match self {
            Self::Sudo => {
                let mut command = Command::new("sudo");
                command.arg(program);
                command
            }
            Self::Root | Self::Unprivileged => Command::new(program),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Sudo => "sudo",
            Self::Unprivileged => "unprivileged",
        }
    }
}
