pub mod api;
#[cfg(feature = "browser")]
pub mod browser;
pub mod html;
pub mod http;

use crate::error::{RecordParseError, SourceError};

/// One listing container as the page rendered it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBlock {
    /// Visible text, one trimmed line per text node.
    pub text: String,
    /// Text of the title anchor, when the layout has one.
    pub title: Option<String>,
    /// Channel hrefs in document order.
    pub links: Vec<String>,
    /// Badge/tag texts that may carry the category.
    pub badges: Vec<String>,
    pub language: Option<String>,
    pub age: Option<String>,
}

impl RawBlock {
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// A container, or the structural fault that kept it from being read.
pub type BlockResult = Result<RawBlock, RecordParseError>;

/// Something that can be walked page by page.
///
/// Implementations own their pacing (fixed delays, polling). Opening and
/// closing the underlying session is the caller's business.
pub trait PageSource {
    /// Containers on the current page. An empty list means no results.
    fn container_blocks(&mut self) -> Result<Vec<BlockResult>, SourceError>;

    /// Move to the next page. `Ok(false)` means there is none.
    fn advance_page(&mut self) -> Result<bool, SourceError>;
}
