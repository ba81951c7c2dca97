use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Recoverable,
}

/// A failure that was observed during a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: &'static str,
    pub subject: String,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.step, self.subject, self.message)
    }
}

/// Failures a run swallowed instead of aborting on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    failures: Vec<StepFailure>,
}

impl StepReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_recoverable(&mut self, step: &'static str, subject: &str, err: &anyhow::Error) {
        tracing::warn!(step, subject, error = %format!("{err:#}"), "recoverable failure");
        self.failures.push(StepFailure {
            step,
            subject: subject.to_string(),
            severity: Severity::Recoverable,
            message: format!("{err:#}"),
        });
    }

    pub fn record_fatal(&mut self, step: &'static str, subject: &str, err: &anyhow::Error) {
        tracing::error!(step, subject, error = %format!("{err:#}"), "fatal failure");
        self.failures.push(StepFailure {
            step,
            subject: subject.to_string(),
            severity: Severity::Fatal,
            message: format!("{err:#}"),
        });
    }

    pub fn failures(&self) -> &[StepFailure] {
        &self.failures
    }

    pub fn recoverable(&self) -> impl Iterator<Item = &StepFailure> {
        self.failures
            .iter()
            .filter(|failure| failure.severity == Severity::Recoverable)
    }

    pub fn failures_for(&self, step: &str) -> Vec<&StepFailure> {
        self.failures
            .iter()
            .filter(|failure| failure.step == step)
            .collect()
    }

    pub fn has_fatal(&self) -> bool {
        self.failures
            .iter()
            .any(|failure| failure.severity == Severity::Fatal)
    }
}
