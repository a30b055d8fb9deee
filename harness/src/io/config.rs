//! Harness configuration (TOML).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Harness configuration.
///
/// Intended to be edited by humans; missing fields default to the
/// reference policy values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Iteration budget per question.
    pub max_iterations: u32,

    /// Passages requested per retrieval call.
    pub top_k: usize,

    /// Model identifier sent to the generation service.
    pub model: String,

    /// Sampling temperature (0.0 to 1.0).
    pub temperature: f64,

    /// Chat-completions endpoint URL.
    pub generation_url: String,

    /// Retrieval endpoint URL.
    pub retrieval_url: String,

    /// Bounded automatic retry for transient service failures.
    pub service_max_retries: u32,

    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container image the generated code runs in.
    pub image: String,

    /// Wall-clock budget for one sandboxed run, in seconds.
    pub timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "mat-tool-bench".to_string(),
            timeout_secs: 300,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            top_k: 5,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            generation_url: "https://api.openai.com/v1/chat/completions".to_string(),
            retrieval_url: "http://localhost:8900/search".to_string(),
            service_max_retries: 3,
            sandbox: SandboxConfig::default(),
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.top_k == 0 {
            return Err(anyhow!("top_k must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(anyhow!("temperature must be between 0 and 1"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must be non-empty"));
        }
        if self.generation_url.trim().is_empty() {
            return Err(anyhow!("generation_url must be non-empty"));
        }
        if self.retrieval_url.trim().is_empty() {
            return Err(anyhow!("retrieval_url must be non-empty"));
        }
        if self.service_max_retries == 0 {
            return Err(anyhow!("service_max_retries must be > 0"));
        }
        if self.sandbox.image.trim().is_empty() {
            return Err(anyhow!("sandbox.image must be non-empty"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow!("sandbox.timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HarnessConfig::default()`.
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    if !path.exists() {
        let cfg = HarnessConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HarnessConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &HarnessConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
