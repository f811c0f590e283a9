use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::info;

use super::html::HtmlLayout;
use super::{BlockResult, PageSource};
use crate::error::SourceError;

/// Query filters understood by the public search page.
#[derive(Debug, Clone)]
pub struct SearchFilters {
    pub languages: Vec<String>,
    pub channel_type: String,
    pub min_subscribers: u64,
    pub min_age_months: u32,
}

impl Default for SearchFilters {
    fn default() -> Self {
        SearchFilters {
            languages: vec!["ru".into(), "en".into()],
            channel_type: "public".into(),
            min_subscribers: 10_000,
            min_age_months: 1,
        }
    }
}

/// Stateless variant: one GET per page, page number in the query string.
pub struct SearchSource {
    client: Client,
    url: String,
    filters: SearchFilters,
    layout: HtmlLayout,
    page: u32,
    delay: Duration,
}

impl SearchSource {
    pub fn new(
        url: &str,
        user_agent: &str,
        filters: SearchFilters,
        layout: HtmlLayout,
        delay: Duration,
    ) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        if let Ok(ua) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, ua);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(SearchSource {
            client,
            url: url.to_string(),
            filters,
            layout,
            page: 1,
            delay,
        })
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        build_query(&self.filters, self.page)
    }
}

pub fn build_query(filters: &SearchFilters, page: u32) -> Vec<(&'static str, String)> {
    let mut q = vec![("page", page.to_string())];
    for lang in &filters.languages {
        q.push(("lang", lang.clone()));
    }
    q.push(("type", filters.channel_type.clone()));
    q.push(("subscribers_from", filters.min_subscribers.to_string()));
    q.push(("age_from", filters.min_age_months.to_string()));
    q
}

fn check_status(status: u16, url: &str) -> Result<(), SourceError> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    Err(SourceError::Status {
        status,
        url: url.to_string(),
    })
}

impl PageSource for SearchSource {
    fn container_blocks(&mut self) -> Result<Vec<BlockResult>, SourceError> {
        info!(page = self.page, "Fetching {}", self.url);
        let resp = self.client.get(&self.url).query(&self.query()).send()?;
        check_status(resp.status().as_u16(), resp.url().as_str())?;
        let body = resp.text()?;
        Ok(self.layout.blocks(&body))
    }

    fn advance_page(&mut self) -> Result<bool, SourceError> {
        thread::sleep(self.delay);
        self.page += 1;
        Ok(true)
    }
}
