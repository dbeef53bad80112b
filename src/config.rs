//! Configuration management for synthloop
//!
//! Stores settings in ~/.config/synthloop/config.json

use crate::llm::client::REQUEST_TIMEOUT_SECS;
use crate::normalize::DEFAULT_NORMALIZER_COMMANDS;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const MODEL_URL_ENV: &str = "SYNTHLOOP_MODEL_URL";
pub const MODEL_ENV: &str = "SYNTHLOOP_MODEL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of an Ollama-compatible server
    pub model_url: String,
    pub model: String,
    pub request_timeout_secs: u64,
    /// Interpreter used for the harness and the test runner
    pub python: String,
    pub test_timeout_secs: u64,
    /// Limit for one harness execution of generated code
    pub exec_timeout_secs: u64,
    pub max_retries: usize,
    /// Commands run over generated source; the file path is appended to each
    pub normalizer_commands: Vec<String>,
    /// Replaces the built-in synthesis system prompt
    pub system_prompt: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_url: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder".to_string(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            python: "python3".to_string(),
            test_timeout_secs: 600,
            exec_timeout_secs: 60,
            max_retries: 5,
            normalizer_commands: DEFAULT_NORMALIZER_COMMANDS
                .iter()
                .map(|c| c.to_string())
                .collect(),
            system_prompt: None,
        }
    }
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("synthloop"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk with environment overrides applied.
    pub fn load() -> Self {
        let mut config = Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load a config file, falling back to defaults when missing or corrupt.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(path = %path.display(), "corrupt config replaced by defaults: {}", err);
                eprintln!(
                    "  Warning: Config file was corrupted ({}). A backup was saved and defaults were loaded.",
                    err
                );
                Self::default()
            }
        }
    }

    /// Environment values win over the file.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(MODEL_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.model_url = url.trim().to_string();
        }
        if let Some(model) = lookup(MODEL_ENV).filter(|v| !v.trim().is_empty()) {
            self.model = model.trim().to_string();
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        self.save_to(&path)
    }

    /// Write atomically, creating the directory if needed.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Config path {} has no parent", path.display()))?;
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;

        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(content.as_bytes())
            .context("Failed to write config")?;
        tmp.persist(path)
            .map_err(|e| anyhow::anyhow!("Failed to write config {}: {}", path.display(), e))?;
        Ok(())
    }

    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/synthloop/config.json".to_string())
    }

    /// System prompt for synthesis, honoring the override.
    pub fn system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(crate::llm::prompts::SYNTHESIS_SYSTEM)
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}
