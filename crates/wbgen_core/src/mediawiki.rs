use std::collections::BTreeMap;
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::DEFAULT_USER_AGENT;
use crate::entity::{EntitiesResponse, EntityLookup, EntityPayload};

pub const LABEL_BATCH_SIZE: usize = 50;
const ARTICLE_EXISTS_CODE: &str = "articleexists";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageListing {
    pub titles: Vec<String>,
    pub continuation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Created,
    AlreadyExists,
}

pub trait RepositoryApi {
    fn get_entity(&mut self, id: &str, language: &str) -> Result<EntityLookup>;
    /// Labels for `ids` in `language`; `None` where the entity has no label.
    fn get_labels(
        &mut self,
        ids: &[String],
        language: &str,
    ) -> Result<BTreeMap<String, Option<String>>>;
    fn list_pages(&mut self, namespace: i32, continuation: Option<&str>) -> Result<PageListing>;
}

pub trait WikiPublishApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    fn create_page(&mut self, title: &str, content: &str, summary: &str)
    -> Result<PublishOutcome>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn for_api_url(api_url: &str, user_agent: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            user_agent: if user_agent.trim().is_empty() {
                DEFAULT_USER_AGENT.to_string()
            } else {
                user_agent.to_string()
            },
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            bail!("MediaWiki API URL is not configured");
        }
        Url::parse(&config.api_url)
            .with_context(|| format!("invalid MediaWiki API URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            csrf_token: None,
        })
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let payload = self.send_with_retries(params, false, false)?;
        ensure_no_api_error(&payload)?;
        Ok(payload)
    }

    fn request_json_post(&mut self, params: &[(&str, String)], is_write: bool) -> Result<Value> {
        let payload = self.send_with_retries(params, true, is_write)?;
        ensure_no_api_error(&payload)?;
        Ok(payload)
    }

    /// Sends one API request and returns the decoded payload, including any
    /// MediaWiki `error` object, so callers can branch on error codes.
    fn send_with_retries(
        &mut self,
        params: &[(&str, String)],
        use_post: bool,
        is_write: bool,
    ) -> Result<Value> {
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };
        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        for attempt in 0..=max_retries {
            self.apply_rate_limit(is_write);
            let request = if use_post {
                self.client.post(&self.config.api_url).form(&pairs)
            } else {
                self.client.get(&self.config.api_url).query(&pairs)
            };
            let response = request
                .header("User-Agent", self.config.user_agent.clone())
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, is_write);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    return response
                        .json()
                        .context("failed to decode MediaWiki API JSON response");
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        let delay = base.saturating_mul(multiplier).saturating_add(jitter);
        debug!(attempt, delay_ms = delay, "retrying MediaWiki API request");
        sleep(Duration::from_millis(delay));
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .as_ref()
            .and_then(|tokens| tokens.csrftoken.as_ref())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }

    fn get_entities(
        &mut self,
        ids: &[String],
        props: &str,
        language: &str,
    ) -> Result<EntitiesResponse> {
        let response = self.request_json_get(&[
            ("action", "wbgetentities".to_string()),
            ("ids", ids.join("|")),
            ("props", props.to_string()),
            ("languages", language.to_string()),
            ("redirects", "yes".to_string()),
        ])?;
        serde_json::from_value(response).context("failed to decode wbgetentities response")
    }
}

impl RepositoryApi for MediaWikiClient {
    fn get_entity(&mut self, id: &str, language: &str) -> Result<EntityLookup> {
        let response = self.get_entities(
            &[id.to_string()],
            "labels|descriptions|claims|sitelinks",
            language,
        )?;
        Ok(select_entity(response, id, language))
    }

    fn get_labels(
        &mut self,
        ids: &[String],
        language: &str,
    ) -> Result<BTreeMap<String, Option<String>>> {
        collect_labels(ids, language, |batch| {
            self.get_entities(batch, "labels", language)
        })
    }

    fn list_pages(&mut self, namespace: i32, continuation: Option<&str>) -> Result<PageListing> {
        let mut params = vec![
            ("action", "query".to_string()),
            ("list", "allpages".to_string()),
            ("apnamespace", namespace.to_string()),
            ("aplimit", "max".to_string()),
        ];
        if let Some(token) = continuation {
            params.push(("apcontinue", token.to_string()));
        }

        let response = self.request_json_get(&params)?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode allpages API response")?;
        Ok(PageListing {
            titles: parsed
                .query
                .allpages
                .into_iter()
                .map(|item| item.title)
                .collect(),
            continuation: parsed.continuation.and_then(|cont| cont.apcontinue),
        })
    }
}

impl WikiPublishApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .as_ref()
            .and_then(|tokens| tokens.logintoken.as_ref())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json_post(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn create_page(
        &mut self,
        title: &str,
        content: &str,
        summary: &str,
    ) -> Result<PublishOutcome> {
        let token = self.ensure_csrf_token()?;
        let response = self.send_with_retries(
            &[
                ("action", "edit".to_string()),
                ("title", title.to_string()),
                ("text", content.to_string()),
                ("summary", summary.to_string()),
                ("createonly", "1".to_string()),
                ("bot", "1".to_string()),
                ("token", token),
            ],
            true,
            true,
        )?;
        edit_outcome(response, title)
    }
}

/// Picks the requested entity out of a `wbgetentities` response.
fn select_entity(mut response: EntitiesResponse, id: &str, language: &str) -> EntityLookup {
    // A redirected id comes back keyed by its target.
    let payload = match response.entities.remove(id) {
        Some(payload) => payload,
        None => match response.entities.into_values().next() {
            Some(payload) => payload,
            None => return EntityLookup::Missing,
        },
    };
    if payload.is_missing() {
        return EntityLookup::Missing;
    }
    EntityLookup::Found(payload.into_document(id, language))
}

/// Looks labels up in batches of `LABEL_BATCH_SIZE` and merges the results.
fn collect_labels<F>(
    ids: &[String],
    language: &str,
    mut fetch_batch: F,
) -> Result<BTreeMap<String, Option<String>>>
where
    F: FnMut(&[String]) -> Result<EntitiesResponse>,
{
    let mut labels = BTreeMap::new();
    for batch in ids.chunks(LABEL_BATCH_SIZE) {
        let response = fetch_batch(batch)?;
        for (id, payload) in response.entities {
            let label = EntityPayload::term(&payload.labels, language);
            labels.insert(id, label);
        }
    }
    Ok(labels)
}

fn edit_outcome(response: Value, title: &str) -> Result<PublishOutcome> {
    if api_error_code(&response) == Some(ARTICLE_EXISTS_CODE) {
        return Ok(PublishOutcome::AlreadyExists);
    }
    ensure_no_api_error(&response)?;

    let edit_payload: EditResponse =
        serde_json::from_value(response).context("failed to decode edit response")?;
    let edit = edit_payload
        .edit
        .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
    if edit.result.as_deref() != Some("Success") {
        bail!(
            "MediaWiki edit failed for {}: {}",
            title,
            edit.result.unwrap_or_else(|| "unknown".to_string())
        );
    }
    Ok(PublishOutcome::Created)
}

fn api_error_code(payload: &Value) -> Option<&str> {
    payload
        .get("error")
        .and_then(|error| error.get("code"))
        .and_then(Value::as_str)
}

fn ensure_no_api_error(payload: &Value) -> Result<()> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

pub(crate) fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    allpages: Vec<TitleQueryItem>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    apcontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TitleQueryItem {
    title: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}
