use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use regex::Regex;
use serde::Deserialize;

use crate::error::SettingsError;
use crate::extractor::{
    CategoryStrategy, ExtractConfig, NameStrategy, DEFAULT_SITE_ORIGIN, DEFAULT_SUBSCRIBER_PATTERN,
};

pub const DEFAULT_CONFIG_FILE: &str = "tgstat.toml";
const ENV_PREFIX: &str = "TGSTAT";

/// Everything tunable without recompiling. Layered: defaults, then
/// `tgstat.toml` (or `--config`), then `TGSTAT_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub site_origin: String,
    pub search_url: String,
    pub browse_url: String,
    pub api_base: String,
    pub api_token: Option<String>,
    pub user_agent: String,

    pub page_delay_ms: u64,
    pub advance_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub settle_ms: u64,
    pub rate_limit_wait_secs: u64,
    pub rate_limit_retries: u32,

    pub max_pages: usize,
    pub target_count: Option<usize>,
    pub subscriber_pattern: String,
    pub require_link: bool,
    pub name_strategies: Vec<NameStrategy>,
    pub category_strategies: Vec<CategoryStrategy>,

    pub selectors: SelectorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            site_origin: DEFAULT_SITE_ORIGIN.to_string(),
            search_url: "https://tgstat.ru/en/channels/search".to_string(),
            browse_url: "https://tgstat.com/channels/search".to_string(),
            api_base: "https://api.tgstat.ru".to_string(),
            api_token: None,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            page_delay_ms: 1000,
            advance_timeout_secs: 5,
            poll_interval_ms: 250,
            settle_ms: 3000,
            rate_limit_wait_secs: 5,
            rate_limit_retries: 3,
            max_pages: 50,
            target_count: None,
            subscriber_pattern: DEFAULT_SUBSCRIBER_PATTERN.to_string(),
            require_link: true,
            name_strategies: vec![NameStrategy::TitleElement, NameStrategy::FirstTextLine],
            category_strategies: vec![CategoryStrategy::Badge],
            selectors: SelectorSettings::default(),
        }
    }
}

/// CSS selector chains. Within a chain the first selector that matches wins.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorSettings {
    pub containers: Vec<String>,
    pub title: Vec<String>,
    pub links: Vec<String>,
    pub badges: Vec<String>,
    pub language: Vec<String>,
    pub age: Vec<String>,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        let v = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        SelectorSettings {
            containers: v(&[
                "div.channel-card",
                "div.channel-item",
                "div.channel-info__main",
                "div.row > div.col-12",
            ]),
            title: v(&["a.channel-info__title-link", ".channel-card__title", ".channel-name"]),
            links: v(&[
                r#"a[href*="/channel/"], a[href*="/@"]"#,
                "a.channel-info__title-link",
            ]),
            badges: v(&[
                "span.border.rounded.bg-light.px-1",
                "div.channel-info__tags",
                ".badge, .tag, .category",
                r#"[class*="category"], [class*="tag"], [class*="badge"]"#,
            ]),
            language: v(&["div.channel-info__lang", ".channel-lang"]),
            age: v(&["div.channel-info__age", ".channel-age"]),
        }
    }
}

impl Settings {
    /// `path` is optional; a missing file is fine, a malformed one is not.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Settings>()?;
        Ok(settings)
    }

    pub fn extract_config(&self) -> Result<ExtractConfig, SettingsError> {
        let subscriber_pattern = Regex::new(&self.subscriber_pattern)?;
        if subscriber_pattern.captures_len() < 2 {
            return Err(SettingsError::NoCaptureGroup(self.subscriber_pattern.clone()));
        }
        let defaults = ExtractConfig::default();
        Ok(ExtractConfig {
            max_pages: self.max_pages,
            target_count: self.target_count,
            subscriber_pattern,
            require_link: self.require_link,
            site_origin: self.site_origin.clone(),
            name_strategies: non_empty_or(&self.name_strategies, defaults.name_strategies),
            category_strategies: non_empty_or(&self.category_strategies, defaults.category_strategies),
        })
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn advance_timeout(&self) -> Duration {
        Duration::from_secs(self.advance_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.rate_limit_wait_secs)
    }
}

fn non_empty_or<T: Clone>(items: &[T], fallback: Vec<T>) -> Vec<T> {
    if items.is_empty() {
        fallback
    } else {
        items.to_vec()
    }
}
