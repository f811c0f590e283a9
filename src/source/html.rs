use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::{BlockResult, RawBlock};
use crate::error::{RecordParseError, SettingsError};
use crate::settings::SelectorSettings;

/// Compiled selector chains for a listing page.
#[derive(Debug, Clone)]
pub struct HtmlLayout {
    containers: Vec<Selector>,
    title: Vec<Selector>,
    links: Vec<Selector>,
    badges: Vec<Selector>,
    language: Vec<Selector>,
    age: Vec<Selector>,
}

impl HtmlLayout {
    pub fn compile(cfg: &SelectorSettings) -> Result<Self, SettingsError> {
        if cfg.containers.is_empty() {
            return Err(SettingsError::EmptyChain("containers"));
        }
        Ok(HtmlLayout {
            containers: compile_chain(&cfg.containers)?,
            title: compile_chain(&cfg.title)?,
            links: compile_chain(&cfg.links)?,
            badges: compile_chain(&cfg.badges)?,
            language: compile_chain(&cfg.language)?,
            age: compile_chain(&cfg.age)?,
        })
    }

    /// Containers found by the first container selector that matches anything.
    pub fn blocks(&self, html: &str) -> Vec<BlockResult> {
        let doc = Html::parse_document(html);
        for (i, selector) in self.containers.iter().enumerate() {
            let found: Vec<ElementRef> = doc.select(selector).collect();
            if found.is_empty() {
                continue;
            }
            debug!(selector = i, containers = found.len(), "Container selector matched");
            return found.into_iter().map(|el| self.read_block(el)).collect();
        }
        Vec::new()
    }

    fn read_block(&self, el: ElementRef) -> BlockResult {
        let text = text_lines(el);
        if text.is_empty() {
            return Err(RecordParseError::Malformed("container has no text".into()));
        }

        let links = self
            .links
            .iter()
            .map(|s| {
                el.select(s)
                    .filter_map(|a| a.value().attr("href"))
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .find(|hrefs| !hrefs.is_empty())
            .unwrap_or_default();

        let badges = self
            .badges
            .iter()
            .map(|s| {
                el.select(s)
                    .map(|b| flat_text(b))
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
            })
            .find(|texts| !texts.is_empty())
            .unwrap_or_default();

        Ok(RawBlock {
            text,
            title: first_text(el, &self.title),
            links,
            badges,
            language: first_text(el, &self.language),
            age: first_text(el, &self.age),
        })
    }
}

fn compile_chain(chain: &[String]) -> Result<Vec<Selector>, SettingsError> {
    chain
        .iter()
        .map(|s| {
            Selector::parse(s).map_err(|e| SettingsError::Selector {
                selector: s.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Text nodes as trimmed lines, empty ones dropped.
fn text_lines(el: ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn flat_text(el: ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(el: ElementRef, chain: &[Selector]) -> Option<String> {
    chain
        .iter()
        .find_map(|s| el.select(s).map(flat_text).find(|t| !t.is_empty()))
}
