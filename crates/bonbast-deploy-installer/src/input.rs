use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// A free-text question. `id` is the stable name used by answers files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Question<'a> {
    pub id: &'a str,
    pub label: &'a str,
    pub default: Option<&'a str>,
}

/// A yes/no question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation<'a> {
    pub id: &'a str,
    pub prompt: &'a str,
    pub default: bool,
}

/// Source of operator answers. Implementations return the raw text answer;
/// an empty string means "no answer" and callers apply defaults.
pub trait InputProvider {
    fn text(&mut self, question: &Question<'_>) -> Result<String>;

    fn confirm(&mut self, confirmation: &Confirmation<'_>) -> Result<bool>;
}

/// Pre-supplied answers, e.g. from an answers file. Unanswered questions get
/// an empty answer and unanswered confirmations their default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptedInput {
    texts: BTreeMap<String, String>,
    confirmations: BTreeMap<String, bool>,
    asked: Vec<String>,
}

impl ScriptedInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, id: &str, answer: &str) -> Self {
        self.texts.insert(id.to_string(), answer.to_string());
        self
    }

    pub fn with_confirmation(mut self, id: &str, answer: bool) -> Self {
        self.confirmations.insert(id.to_string(), answer);
        self
    }

    /// Parses a flat TOML table: strings and integers answer text questions,
    /// booleans answer confirmations.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(raw).context("failed to parse answers file")?;
        let mut input = Self::new();
        for (id, value) in table {
            match value {
                toml::Value::String(text) => {
                    input.texts.insert(id, text);
                }
                toml::Value::Integer(number) => {
                    input.texts.insert(id, number.to_string());
                }
                toml::Value::Boolean(flag) => {
                    input.confirmations.insert(id, flag);
                }
                other => {
                    return Err(anyhow!(
                        "answer '{id}' must be a string, integer or boolean, got {}",
                        other.type_str()
                    ));
                }
            }
        }
        Ok(input)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read answers file: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid answers file: {}", path.display()))
    }

    /// Ids of every question asked so far, in order.
    pub fn asked(&self) -> &[String] {
        &self.asked
    }
}

impl InputProvider for ScriptedInput {
    fn text(&mut self, question: &Question<'_>) -> Result<String> {
        self.asked.push(question.id.to_string());
        Ok(self.texts.get(question.id).cloned().unwrap_or_default())
    }

    fn confirm(&mut self, confirmation: &Confirmation<'_>) -> Result<bool> {
        self.asked.push(confirmation.id.to_string());
        Ok(self
            .confirmations
            .get(confirmation.id)
            .copied()
            .unwrap_or(confirmation.default))
    }
}
