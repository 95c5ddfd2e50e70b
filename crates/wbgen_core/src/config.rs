use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::prompt::PromptPolicy;

pub const DEFAULT_USER_AGENT: &str = "wbgen/0.1";
pub const DEFAULT_CONFIG_PATH: &str = ".wbgen/config.toml";
pub const DEFAULT_CHECKPOINT_PATH: &str = "cache/processed.txt";
pub const DEFAULT_LABEL_LANGUAGE: &str = "en";
pub const DEFAULT_DB_NAME: &str = "wiki";
pub const DEFAULT_MODEL: &str = "ds";
pub const DEFAULT_TEMPERATURE: f32 = 0.5;
pub const DEFAULT_SUMMARY: &str = "Bot: Making an article based on data from item {item}";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct BotConfig {
    #[serde(default)]
    pub repository: RepositorySection,
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub run: RunSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RepositorySection {
    pub api_url: Option<String>,
    #[serde(default)]
    pub item_namespace: i32,
    pub label_language: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub db_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct GenerationSection {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub prompt_policy: PromptPolicy,
    pub custom_instruction: Option<String>,
    pub custom_api_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RunSection {
    #[serde(default)]
    pub title_prefix: String,
    #[serde(default)]
    pub leading_wikitext: String,
    pub count: Option<usize>,
    pub checkpoint_path: Option<PathBuf>,
    pub summary: Option<String>,
}

impl BotConfig {
    /// Resolve the repository API URL: env REPO_API_URL > config.
    pub fn repository_api_url(&self) -> Option<String> {
        env_override("REPO_API_URL").or_else(|| non_empty(self.repository.api_url.as_deref()))
    }

    /// Resolve the target wiki API URL: env WIKI_API_URL > config.
    pub fn wiki_api_url(&self) -> Option<String> {
        env_override("WIKI_API_URL").or_else(|| non_empty(self.wiki.api_url.as_deref()))
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| non_empty(self.wiki.user_agent.as_deref()))
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn label_language(&self) -> &str {
        self.repository
            .label_language
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_LABEL_LANGUAGE)
    }

    pub fn db_name(&self) -> &str {
        self.wiki
            .db_name
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_DB_NAME)
    }

    pub fn model(&self) -> &str {
        self.generation
            .model
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_MODEL)
    }

    pub fn temperature(&self) -> f32 {
        self.generation.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.run
            .checkpoint_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_PATH))
    }

    pub fn summary_template(&self) -> &str {
        self.run.summary.as_deref().unwrap_or(DEFAULT_SUMMARY)
    }

    pub fn validate(&self) -> Result<()> {
        let temperature = self.temperature();
        if !(0.0..=2.0).contains(&temperature) {
            bail!("generation.temperature must be within 0.0..=2.0, got {temperature}");
        }
        if !self.summary_template().contains("{item}") {
            bail!("run.summary must contain the {{item}} placeholder");
        }
        Ok(())
    }
}

/// Wiki account credentials, read from the environment only.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        let username = env_override("WIKI_USERNAME")
            .ok_or_else(|| anyhow::anyhow!("WIKI_USERNAME is not set"))?;
        let password = env_override("WIKI_PASSWORD")
            .ok_or_else(|| anyhow::anyhow!("WIKI_PASSWORD is not set"))?;
        Ok(Self { username, password })
    }
}

/// Load and parse a BotConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<BotConfig> {
    if !config_path.exists() {
        return Ok(BotConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: BotConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    parsed
        .validate()
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
    Ok(parsed)
}

pub(crate) fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}
