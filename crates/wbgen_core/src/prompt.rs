use serde::{Deserialize, Serialize};

use crate::entity::ItemRecord;

const BASE_INSTRUCTION: &str = "You are an expert wiki editor. You write encyclopedic articles in proper English based on given JSON data in Wikitext (NOT Markdown).";

const STRICT_SOURCING: &str = " Do not add any information based on external knowledge or assumptions even if you know it from elsewhere.";

const RELAXED_SOURCING: &str = " Treat the given data as the primary source. You may add widely known background context, but never contradict the data.";

const OUTPUT_RULES: &str = " Do not include anything irrelevant such as comments about what you did or the process you followed, or remarks about missing data; only ever write the article itself. Refrain from using too many bullet points; write complete sentences as is the convention on wikis. Do not include references, because what you write will be pasted verbatim to make a new article. Do not try to use templates or categorise any page.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptPolicy {
    #[default]
    Strict,
    Relaxed,
}

impl PromptPolicy {
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        if value.eq_ignore_ascii_case("strict") {
            return Ok(Self::Strict);
        }
        if value.eq_ignore_ascii_case("relaxed") {
            return Ok(Self::Relaxed);
        }
        anyhow::bail!("unsupported prompt policy: {value} (expected strict|relaxed)")
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Relaxed => "relaxed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptSettings {
    pub policy: PromptPolicy,
    pub custom_instruction: Option<String>,
}

pub fn system_prompt(settings: &PromptSettings) -> String {
    let mut prompt = String::from(BASE_INSTRUCTION);
    prompt.push_str(match settings.policy {
        PromptPolicy::Strict => STRICT_SOURCING,
        PromptPolicy::Relaxed => RELAXED_SOURCING,
    });
    prompt.push_str(OUTPUT_RULES);
    if let Some(extra) = settings.custom_instruction.as_deref()
        && !extra.trim().is_empty()
    {
        prompt.push(' ');
        prompt.push_str(extra.trim());
    }
    prompt
}

pub fn user_prompt(record: &ItemRecord) -> String {
    format!(
        "Write a wiki article with the given data.\nSubject: {}\nBrief description of the subject: {}\nData about the subject: {}",
        record.display_label(),
        record.description,
        record.statements.to_json()
    )
}

pub fn build_messages(record: &ItemRecord, settings: &PromptSettings) -> Vec<ChatMessage> {
    vec![
        ChatMessage::new("system", system_prompt(settings)),
        ChatMessage::new("user", user_prompt(record)),
    ]
}

pub fn edit_summary(template: &str, item_id: &str) -> String {
    template.replace("{item}", item_id)
}

pub fn article_title(prefix: &str, record: &ItemRecord) -> String {
    format!("{prefix}{}", record.display_label())
}

/// Drops a first-line section heading that merely repeats the title.
pub fn strip_leading_title_heading(text: &str, title: &str) -> String {
    let trimmed = text.trim_start();
    let (first_line, rest) = match trimmed.split_once('\n') {
        Some((first, rest)) => (first, rest),
        None => (trimmed, ""),
    };
    let heading = first_line.trim();
    let level = heading.chars().take_while(|ch| *ch == '=').count();
    let is_heading = level > 0
        && heading.len() > level * 2
        && heading.ends_with(&"=".repeat(level));
    if is_heading {
        let inner = heading[level..heading.len() - level].trim();
        if inner.eq_ignore_ascii_case(title.trim()) {
            return rest.trim().to_string();
        }
    }
    text.trim().to_string()
}

/// Final page text: configured leading wikitext followed by the cleaned article.
pub fn assemble_article(leading_wikitext: &str, generated: &str, title: &str) -> String {
    format!(
        "{leading_wikitext}{}",
        strip_leading_title_heading(generated, title)
    )
}
