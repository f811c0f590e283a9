use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{BlockResult, PageSource, RawBlock};
use crate::error::{RecordParseError, SourceError};

/// The API refuses larger pages.
pub const MAX_LIMIT: usize = 50;

/// Search parameters sent with every page request.
#[derive(Debug, Clone)]
pub struct ApiQuery {
    pub q: String,
    pub country: Option<String>,
    pub language: Option<String>,
    pub category: Option<String>,
}

impl Default for ApiQuery {
    fn default() -> Self {
        ApiQuery {
            q: "a".into(),
            country: Some("RU".into()),
            language: None,
            category: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiPacing {
    pub page_delay: Duration,
    pub rate_limit_wait: Duration,
    pub rate_limit_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    ok: Option<bool>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiChannel {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    participants_count: Option<u64>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    category: Option<Value>,
}

/// Offset-paged channel search over the JSON API.
pub struct ApiSource {
    client: Client,
    base: String,
    token: String,
    query: ApiQuery,
    limit: usize,
    offset: usize,
    last_len: Option<usize>,
    with_age: bool,
    origin: String,
    pacing: ApiPacing,
}

impl ApiSource {
    pub fn new(
        base: &str,
        token: &str,
        user_agent: &str,
        origin: &str,
        query: ApiQuery,
        pacing: ApiPacing,
    ) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        if let Ok(ua) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, ua);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(ApiSource {
            client,
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            query,
            limit: MAX_LIMIT,
            offset: 0,
            last_len: None,
            with_age: false,
            origin: origin.trim_end_matches('/').to_string(),
            pacing,
        })
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.clamp(1, MAX_LIMIT);
        self
    }

    /// Look up every channel's creation date to fill in its age.
    pub fn with_age(mut self, enabled: bool) -> Self {
        self.with_age = enabled;
        self
    }

    pub fn categories(&self) -> Result<Vec<Category>, SourceError> {
        let response = self.get("database/categories", &[])?;
        Ok(parse_categories(&response))
    }

    fn search_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("q", self.query.q.clone())];
        if let Some(c) = &self.query.country {
            params.push(("country", c.clone()));
        }
        if let Some(l) = &self.query.language {
            params.push(("language", l.clone()));
        }
        if let Some(c) = &self.query.category {
            params.push(("category", c.clone()));
        }
        params.push(("offset", self.offset.to_string()));
        params.push(("limit", self.limit.to_string()));
        params
    }

    /// GET `{base}/{path}` and unwrap the envelope, retrying on 429.
    fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, SourceError> {
        let url = format!("{}/{}", self.base, path);
        let mut attempt = 0;
        loop {
            let resp = self
                .client
                .get(&url)
                .query(&[("token", self.token.as_str())])
                .query(params)
                .send()?;
            let status = resp.status().as_u16();
            match status_action(status, &url, attempt, self.pacing.rate_limit_retries) {
                StatusAction::Accept => {}
                StatusAction::Retry => {
                    attempt += 1;
                    warn!(attempt, "Rate limited, waiting {:?}", self.pacing.rate_limit_wait);
                    thread::sleep(self.pacing.rate_limit_wait);
                    continue;
                }
                StatusAction::Fail(e) => return Err(e),
            }
            let body: Value = resp.json()?;
            return unwrap_envelope(body);
        }
    }

    fn channel_age(&self, id: &Value) -> Option<String> {
        let id = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match self.get("channels/info", &[("channel_id", id.clone())]) {
            Ok(info) => {
                let months = age_months(info.get("created_at")?, Utc::now())?;
                Some(format!("{} months", months))
            }
            Err(e) => {
                debug!(channel = %id, "No age: {}", e);
                None
            }
        }
    }
}

impl PageSource for ApiSource {
    fn container_blocks(&mut self) -> Result<Vec<BlockResult>, SourceError> {
        info!(offset = self.offset, limit = self.limit, "Querying channels/search");
        let response = self.get("channels/search", &self.search_params())?;
        let items = items_of(&response);
        self.last_len = Some(items.len());

        let mut blocks = Vec::with_capacity(items.len());
        for item in items {
            let channel: ApiChannel = match serde_json::from_value(item.clone()) {
                Ok(c) => c,
                Err(e) => {
                    blocks.push(Err(RecordParseError::Malformed(e.to_string())));
                    continue;
                }
            };
            let mut block = channel_block(&channel, &self.origin);
            if self.with_age {
                if let Some(id) = &channel.id {
                    block.age = self.channel_age(id);
                }
            }
            blocks.push(Ok(block));
        }
        Ok(blocks)
    }

    fn advance_page(&mut self) -> Result<bool, SourceError> {
        match self.last_len {
            Some(n) if n >= self.limit => {}
            _ => return Ok(false),
        }
        thread::sleep(self.pacing.page_delay);
        self.offset += self.limit;
        Ok(true)
    }
}

#[derive(Debug)]
enum StatusAction {
    Accept,
    Retry,
    Fail(SourceError),
}

/// 401/403 are auth failures, 429 is retried `retries` times, other non-2xx fail.
fn status_action(status: u16, url: &str, attempt: u32, retries: u32) -> StatusAction {
    match status {
        200..=299 => StatusAction::Accept,
        401 | 403 => StatusAction::Fail(SourceError::Auth(format!("{} returned HTTP {}", url, status))),
        429 if attempt < retries => StatusAction::Retry,
        _ => StatusAction::Fail(SourceError::Status {
            status,
            url: url.to_string(),
        }),
    }
}

fn unwrap_envelope(body: Value) -> Result<Value, SourceError> {
    let env: Envelope =
        serde_json::from_value(body).map_err(|e| SourceError::Api(format!("bad envelope: {}", e)))?;
    let failed = env.ok == Some(false)
        || env.status.as_deref().is_some_and(|s| !s.eq_ignore_ascii_case("ok"));
    if failed {
        return Err(SourceError::Api(
            env.error.unwrap_or_else(|| "request not ok".into()),
        ));
    }
    env.response
        .ok_or_else(|| SourceError::Api("response missing".into()))
}

/// `response.items`, or the response itself when it is a bare list.
fn items_of(response: &Value) -> Vec<Value> {
    match response {
        Value::Array(items) => items.clone(),
        Value::Object(o) => match o.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn channel_block(channel: &ApiChannel, origin: &str) -> RawBlock {
    let title = channel
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| channel.username.clone());
    let mut text = title.clone().unwrap_or_default();
    if let Some(n) = channel.participants_count {
        text.push_str(&format!("\n{} subscribers", n));
    }
    let links = channel
        .username
        .as_deref()
        .map(|u| u.trim_start_matches('@'))
        .filter(|u| !u.is_empty())
        .map(|u| format!("{}/channel/@{}", origin, u))
        .into_iter()
        .collect();
    let badges = channel
        .category
        .as_ref()
        .and_then(category_title)
        .into_iter()
        .collect();
    RawBlock {
        text,
        title,
        links,
        badges,
        language: channel.language.clone(),
        age: None,
    }
}

fn category_title(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("title").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn parse_categories(response: &Value) -> Vec<Category> {
    items_of(response)
        .iter()
        .filter_map(|c| {
            let title = c.get("title")?.as_str()?.to_string();
            let id = match c.get("id")? {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some(Category { id, title })
        })
        .collect()
}

/// Whole 30-day months since `created_at` (RFC 3339 or unix seconds).
fn age_months(created_at: &Value, now: DateTime<Utc>) -> Option<i64> {
    let created = match created_at {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok()?.with_timezone(&Utc),
        Value::Number(n) => DateTime::from_timestamp(n.as_i64()?, 0)?,
        _ => return None,
    };
    Some((now - created).num_days().max(0) / 30)
}
