use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{BotConfig, env_override};
use crate::entity::ItemRecord;
use crate::prompt::{ChatMessage, PromptSettings, build_messages};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_MODEL: &str = "deepseek-chat";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_CUSTOM_BASE_URL: &str = "http://localhost:8080/v1";
const DEFAULT_CUSTOM_API_KEY: &str = "sk-local";
const OPENROUTER_REFERER: &str = "https://github.com/R4356th/wbgen";
const OPENROUTER_TITLE: &str = "WBGen";
const GENERATION_TIMEOUT_SECS: u64 = 300;

pub trait ArticleGenerator {
    fn generate(&mut self, record: &ItemRecord) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    DeepSeek,
    OpenRouter { model: String },
    Custom { base_url: String, model: String },
}

impl Provider {
    /// `ds` selects DeepSeek, `local:<model>` a custom OpenAI-compatible
    /// endpoint, anything else is taken as an OpenRouter model id.
    pub fn from_selector(selector: &str, custom_base_url: Option<&str>) -> Result<Self> {
        let selector = selector.trim();
        if selector.is_empty() {
            bail!("model selector must not be empty");
        }
        if selector == "ds" {
            return Ok(Self::DeepSeek);
        }
        if let Some(model) = selector.strip_prefix("local:") {
            if model.trim().is_empty() {
                bail!("local model selector needs a model name (local:<model>)");
            }
            return Ok(Self::Custom {
                base_url: custom_base_url
                    .unwrap_or(DEFAULT_CUSTOM_BASE_URL)
                    .trim_end_matches('/')
                    .to_string(),
                model: model.trim().to_string(),
            });
        }
        Ok(Self::OpenRouter {
            model: selector.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        match self {
            Self::DeepSeek => DEEPSEEK_BASE_URL,
            Self::OpenRouter { .. } => OPENROUTER_BASE_URL,
            Self::Custom { base_url, .. } => base_url,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::DeepSeek => DEEPSEEK_MODEL,
            Self::OpenRouter { model } | Self::Custom { model, .. } => model,
        }
    }

    fn api_key_var(&self) -> &'static str {
        match self {
            Self::DeepSeek => "DEEPSEEK_API_KEY",
            Self::OpenRouter { .. } => "OPENROUTER_API_KEY",
            Self::Custom { .. } => "CUSTOM_API_KEY",
        }
    }

    fn resolve_api_key(&self) -> Result<String> {
        match env_override(self.api_key_var()) {
            Some(key) => Ok(key),
            None if matches!(self, Self::Custom { .. }) => Ok(DEFAULT_CUSTOM_API_KEY.to_string()),
            None => bail!("{} is not set", self.api_key_var()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub provider: Provider,
    pub temperature: f32,
    pub prompt: PromptSettings,
}

impl GenerationSettings {
    pub fn from_config(config: &BotConfig) -> Result<Self> {
        let custom_url = env_override("CUSTOM_API_URL").or_else(|| config.generation.custom_api_url.clone());
        Ok(Self {
            provider: Provider::from_selector(config.model(), custom_url.as_deref())?,
            temperature: config.temperature(),
            prompt: PromptSettings {
                policy: config.generation.prompt_policy,
                custom_instruction: config.generation.custom_instruction.clone(),
            },
        })
    }
}

/// OpenAI-compatible chat completions client.
pub struct ChatCompletionsClient {
    client: Client,
    api_key: String,
    settings: GenerationSettings,
}

impl ChatCompletionsClient {
    pub fn new(settings: GenerationSettings) -> Result<Self> {
        let api_key = settings.provider.resolve_api_key()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(GENERATION_TIMEOUT_SECS))
            .build()
            .context("failed to build generation HTTP client")?;
        Ok(Self {
            client,
            api_key,
            settings,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.provider.base_url().trim_end_matches('/')
        )
    }
}

impl ArticleGenerator for ChatCompletionsClient {
    fn generate(&mut self, record: &ItemRecord) -> Result<String> {
        let request = ChatRequest {
            model: self.settings.provider.model(),
            messages: build_messages(record, &self.settings.prompt),
            stream: false,
            temperature: self.settings.temperature,
        };

        let mut builder = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request);
        if matches!(self.settings.provider, Provider::OpenRouter { .. }) {
            builder = builder
                .header("HTTP-Referer", OPENROUTER_REFERER)
                .header("X-Title", OPENROUTER_TITLE);
        }

        debug!(item = %record.id, model = request.model, "requesting article generation");
        let response = builder
            .send()
            .context("failed to call generation endpoint")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("generation request failed with HTTP {status}: {body}");
        }
        let payload: ChatResponse = response
            .json()
            .context("failed to decode generation response")?;
        extract_content(payload)
    }
}

fn extract_content(payload: ChatResponse) -> Result<String> {
    let content = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .unwrap_or_default();
    if content.is_empty() {
        bail!("generation endpoint returned no content");
    }
    Ok(content)
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::prompt::PromptPolicy;

    #[test]
    fn ds_selects_deepseek() {
        let provider = Provider::from_selector("ds", None).expect("provider");
        assert_eq!(provider, Provider::DeepSeek);
        assert_eq!(provider.model(), "deepseek-chat");
        assert_eq!(provider.base_url(), DEEPSEEK_BASE_URL);
    }

    #[test]
    fn other_selectors_are_openrouter_models() {
        let provider =
            Provider::from_selector("mistralai/mistral-large", None).expect("provider");
        assert_eq!(provider.model(), "mistralai/mistral-large");
        assert_eq!(provider.base_url(), OPENROUTER_BASE_URL);
    }

    #[test]
    fn local_selector_uses_custom_endpoint() {
        let provider = Provider::from_selector("local:qwen2.5", None).expect("provider");
        assert_eq!(provider.base_url(), DEFAULT_CUSTOM_BASE_URL);
        assert_eq!(provider.model(), "qwen2.5");

        let provider = Provider::from_selector("local:qwen2.5", Some("http://gpu:9000/v1/"))
            .expect("provider");
        assert_eq!(provider.base_url(), "http://gpu:9000/v1");
    }

    #[test]
    fn invalid_selectors_are_rejected() {
        assert!(Provider::from_selector("  ", None).is_err());
        assert!(Provider::from_selector("local:", None).is_err());
    }

    #[test]
    fn settings_follow_config() {
        let mut config = BotConfig::default();
        config.generation.model = Some("local:llama".to_string());
        config.generation.custom_api_url = Some("http://127.0.0.1:8081/v1".to_string());
        config.generation.temperature = Some(0.9);
        config.generation.prompt_policy = PromptPolicy::Relaxed;
        let settings = GenerationSettings::from_config(&config).expect("settings");
        assert_eq!(settings.temperature, 0.9);
        assert_eq!(settings.prompt.policy, PromptPolicy::Relaxed);
        assert_eq!(settings.provider.model(), "llama");
    }

    #[test]
    fn request_serializes_openai_shape() {
        let request = ChatRequest {
            model: "deepseek-chat",
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            stream: false,
            temperature: 0.5,
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            value,
            json!({
                "model": "deepseek-chat",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": false,
                "temperature": 0.5
            })
        );
    }

    #[test]
    fn content_is_extracted_from_first_choice() {
        let payload: ChatResponse = serde_json::from_value(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "  Article text \n"}}]
        }))
        .expect("decode");
        assert_eq!(extract_content(payload).expect("content"), "Article text");
    }

    #[test]
    fn empty_completion_is_an_error() {
        let payload: ChatResponse =
            serde_json::from_value(json!({"choices": []})).expect("decode");
        assert!(extract_content(payload).is_err());
    }
}
