use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use tracing::{debug, info};

use super::html::HtmlLayout;
use super::{BlockResult, PageSource};
use crate::error::SourceError;

// ── Page scripts ──

const DISMISS_MODALS_JS: &str = r#"
(() => {
    const selectors = [
        '.modal.show .close',
        '.modal.show button[data-dismiss="modal"]',
        '.modal.show button[data-bs-dismiss="modal"]',
        '.modal-close',
        'button[aria-label="Close"]'
    ];
    let closed = 0;
    for (const sel of selectors) {
        for (const btn of document.querySelectorAll(sel)) {
            if (btn.offsetParent !== null) { btn.click(); closed++; }
        }
    }
    return closed;
})();
"#;

/// Scrolls down, then clicks the first visible, enabled next-page control.
const ADVANCE_JS: &str = r#"
(() => {
    window.scrollTo(0, document.body.scrollHeight);
    const usable = el => el && el.offsetParent !== null && !el.disabled
        && !el.classList.contains('disabled');
    const labels = ['show more', 'показать еще', 'показать ещё'];
    for (const btn of document.querySelectorAll('button, a.btn')) {
        const text = (btn.innerText || '').trim().toLowerCase();
        if (labels.some(l => text.includes(l)) && usable(btn)) {
            btn.click();
            return 'clicked';
        }
    }
    for (const a of document.querySelectorAll('a.page-link, a.pagination__item[rel="next"]')) {
        const text = (a.innerText || '').trim();
        if ((a.getAttribute('rel') === 'next' || text === '›' || text === '»') && usable(a)) {
            a.click();
            return 'clicked';
        }
    }
    return 'none';
})();
"#;

/// An open browser with one working tab. Dropping it closes the browser.
pub struct BrowserSession {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserSession {
    pub fn launch(headless: bool) -> Result<Self> {
        let browser = Browser::new(LaunchOptions {
            headless,
            window_size: Some((1920, 1080)),
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        })
        .context("Failed to launch Chrome")?;
        let tab = browser.new_tab().context("Failed to open a tab")?;
        Ok(BrowserSession { _browser: browser, tab })
    }

    pub fn open(&self, url: &str) -> Result<()> {
        info!("Navigating to {}", url);
        self.tab.navigate_to(url)?;
        self.tab.wait_until_navigated()?;
        Ok(())
    }

    /// Best-effort: closes any visible modal dialogs.
    pub fn dismiss_modals(&self) {
        match self.tab.evaluate(DISMISS_MODALS_JS, false) {
            Ok(r) => debug!(closed = ?r.value, "Modal dismissal"),
            Err(e) => debug!("Modal dismissal failed: {}", e),
        }
    }

    pub fn save_screenshot(&self, path: &Path) -> Result<()> {
        let png = self
            .tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .context("Failed to capture screenshot")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, png).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn source<'a>(&'a self, layout: HtmlLayout, pacing: BrowserPacing) -> BrowserSource<'a> {
        BrowserSource {
            tab: self.tab.as_ref(),
            layout,
            pacing,
            served: ServedContainers::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserPacing {
    pub advance_timeout: Duration,
    pub poll_interval: Duration,
    pub settle: Duration,
}

/// Interactive variant: reads the live DOM, advances with "Show more".
pub struct BrowserSource<'a> {
    tab: &'a Tab,
    layout: HtmlLayout,
    pacing: BrowserPacing,
    served: ServedContainers,
}

/// "Show more" appends to the list already on screen. Tracks what was handed
/// out so each page yields only the new tail; a different first card means
/// the list was replaced and everything is new again.
#[derive(Debug, Default)]
struct ServedContainers {
    count: usize,
    head: Option<Option<String>>,
}

impl ServedContainers {
    fn fresh(&mut self, blocks: Vec<BlockResult>) -> Vec<BlockResult> {
        let head = blocks.first().map(|b| b.as_ref().ok().map(|r| r.text.clone()));
        let total = blocks.len();
        let appended = total >= self.count && head == self.head;
        let skip = if appended { self.count } else { 0 };
        self.count = total;
        self.head = head;
        blocks.into_iter().skip(skip).collect()
    }
}

impl BrowserSource<'_> {
    fn try_advance(&self) -> Result<bool, SourceError> {
        let result = self
            .tab
            .evaluate(ADVANCE_JS, false)
            .map_err(|e| SourceError::Browser(e.to_string()))?;
        Ok(clicked(result.value.as_ref()))
    }
}

fn clicked(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::String(s)) if s == "clicked")
}

impl PageSource for BrowserSource<'_> {
    fn container_blocks(&mut self) -> Result<Vec<BlockResult>, SourceError> {
        let html = self
            .tab
            .get_content()
            .map_err(|e| SourceError::Browser(e.to_string()))?;
        let blocks = self.layout.blocks(&html);
        let total = blocks.len();
        let fresh = self.served.fresh(blocks);
        debug!(total, fresh = fresh.len(), "Containers on screen");
        Ok(fresh)
    }

    fn advance_page(&mut self) -> Result<bool, SourceError> {
        let deadline = Instant::now() + self.pacing.advance_timeout;
        loop {
            if self.try_advance()? {
                thread::sleep(self.pacing.settle);
                return Ok(true);
            }
            if Instant::now() >= deadline {
                info!("No next-page control within {:?}", self.pacing.advance_timeout);
                return Ok(false);
            }
            thread::sleep(self.pacing.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RawBlock;
    use serde_json::json;

    fn cards(names: &[&str]) -> Vec<BlockResult> {
        names
            .iter()
            .map(|n| {
                Ok(RawBlock {
                    text: format!("{}\n100 subscribers", n),
                    ..Default::default()
                })
            })
            .collect()
    }

    fn texts(blocks: &[BlockResult]) -> Vec<String> {
        blocks
            .iter()
            .map(|b| b.as_ref().unwrap().lines().next().unwrap().to_string())
            .collect()
    }

    #[test]
    fn show_more_yields_only_new_cards() {
        let mut served = ServedContainers::default();
        assert_eq!(texts(&served.fresh(cards(&["Alpha", "Beta"]))), ["Alpha", "Beta"]);
        assert_eq!(
            texts(&served.fresh(cards(&["Alpha", "Beta", "Gamma", "Delta"]))),
            ["Gamma", "Delta"]
        );
        // nothing appended after the click
        assert!(served.fresh(cards(&["Alpha", "Beta", "Gamma", "Delta"])).is_empty());
    }

    #[test]
    fn replaced_list_is_served_in_full() {
        let mut served = ServedContainers::default();
        served.fresh(cards(&["Alpha", "Beta", "Gamma"]));
        // next-page navigation: same size, different cards
        assert_eq!(
            texts(&served.fresh(cards(&["Delta", "Echo", "Foxtrot"]))),
            ["Delta", "Echo", "Foxtrot"]
        );
        // shorter last page
        assert_eq!(texts(&served.fresh(cards(&["Delta", "Golf"]))), ["Delta", "Golf"]);
    }

    #[test]
    fn only_the_clicked_marker_counts() {
        assert!(clicked(Some(&json!("clicked"))));
        assert!(!clicked(Some(&json!("none"))));
        assert!(!clicked(Some(&json!(true))));
        assert!(!clicked(None));
    }
}
