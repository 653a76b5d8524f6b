//! Workspace configuration, read from `<workspace>/schoold.json` when present.

use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "schoold.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub generator: GeneratorConfig,
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeneratorConfig {
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key_env: "GEMINI_API_KEY".to_string(),
            model: "gemini-3-flash-preview".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            timeout_secs: 60,
        }
    }
}

impl GeneratorConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportConfig {
    pub preview_rows: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self { preview_rows: 5 }
    }
}

impl Config {
    pub fn load(workspace: &Path) -> anyhow::Result<Self> {
        let path = workspace.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
        tracing::info!(path = %path.display(), "loaded workspace config");
        Ok(cfg)
    }
}
