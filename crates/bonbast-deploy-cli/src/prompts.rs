use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use bonbast_deploy_installer::{Confirmation, InputProvider, Question};

/// Interactive answers from a line-oriented reader, prompts on a writer.
pub(crate) struct ConsoleInput<R, W> {
    reader: R,
    writer: W,
}

impl ConsoleInput<std::io::StdinLock<'static>, std::io::Stdout> {
    pub(crate) fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsoleInput<R, W> {
    pub(crate) fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    fn read_answer(&mut self, prompt: &str) -> Result<String> {
        write!(self.writer, "{prompt}: ").context("failed to write prompt")?;
        self.writer.flush().context("failed to flush prompt")?;

        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .context("failed to read answer from stdin")?;
        if read == 0 {
            // EOF: behave as if Enter was pressed so defaults apply.
            writeln!(self.writer).ok();
        }
        Ok(line.trim().to_string())
    }
}

impl<R: BufRead, W: Write> InputProvider for ConsoleInput<R, W> {
    fn text(&mut self, question: &Question<'_>) -> Result<String> {
        let prompt = match question.default {
            Some(default) if !default.is_empty() => {
                format!("{} [{}]", question.label, mask_secret(question.id, default))
            }
            _ => question.label.to_string(),
        };
        self.read_answer(&prompt)
    }

    fn confirm(&mut self, confirmation: &Confirmation<'_>) -> Result<bool> {
        let hint = if confirmation.default { "Y/n" } else { "y/N" };
        loop {
            let answer = self
                .read_answer(&format!("{} [{hint}]", confirmation.prompt))?
                .to_lowercase();
            match answer.as_str() {
                "" => return Ok(confirmation.default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => {
                    writeln!(self.writer, "please answer y or n").ok();
                }
            }
        }
    }
}

/// Shows only the last four characters of a token default.
pub(crate) fn mask_secret(id: &str, value: &str) -> String {
    if id != "bot_token" {
        return value.to_string();
    }
    let chars = value.chars().collect::<Vec<_>>();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail = chars[chars.len() - 4..].iter().collect::<String>();
    format!("{}{tail}", "*".repeat(chars.len() - 4))
}
