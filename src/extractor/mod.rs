pub mod count;
pub mod link;
pub mod record;

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::source::PageSource;
pub use record::{parse_block, CategoryStrategy, ChannelRecord, NameStrategy};

pub const DEFAULT_SUBSCRIBER_PATTERN: &str = r"(?i)(\d[\d,\p{Zs}]*)\s*subscribers?";
pub const DEFAULT_SITE_ORIGIN: &str = "https://tgstat.com";

static DEFAULT_SUBSCRIBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_SUBSCRIBER_PATTERN).unwrap());

/// Bounds and parsing rules for one run.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub max_pages: usize,
    /// `None` means take everything the source offers.
    pub target_count: Option<usize>,
    /// Capture group 1 holds the raw count.
    pub subscriber_pattern: Regex,
    pub require_link: bool,
    pub site_origin: String,
    pub name_strategies: Vec<NameStrategy>,
    pub category_strategies: Vec<CategoryStrategy>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_pages: 50,
            target_count: None,
            subscriber_pattern: DEFAULT_SUBSCRIBER_RE.clone(),
            require_link: true,
            site_origin: DEFAULT_SITE_ORIGIN.to_string(),
            name_strategies: vec![NameStrategy::TitleElement, NameStrategy::FirstTextLine],
            category_strategies: vec![CategoryStrategy::Badge],
        }
    }
}

impl ExtractConfig {
    fn target_reached(&self, have: usize) -> bool {
        self.target_count.is_some_and(|t| have >= t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Normal end of results, or the target count was reached.
    Exhausted,
    /// Page 1 had no containers: wrong selectors, not logged in, no search run.
    NoContainers,
    PageLimit,
    SourceError,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Termination::Exhausted => "exhausted",
            Termination::NoContainers => "no containers on first page",
            Termination::PageLimit => "page limit reached",
            Termination::SourceError => "source error",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct ExtractionRun {
    pub records: Vec<ChannelRecord>,
    seen_names: HashSet<String>,
    pub page_cursor: usize,
    pub pages_processed: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub terminated: Option<Termination>,
    pub source_error: Option<String>,
}

impl Default for ExtractionRun {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionRun {
    pub fn new() -> Self {
        ExtractionRun {
            records: Vec::new(),
            seen_names: HashSet::new(),
            page_cursor: 1,
            pages_processed: 0,
            skipped: 0,
            duplicates: 0,
            terminated: None,
            source_error: None,
        }
    }

    /// `false` if the name was already taken.
    fn push(&mut self, record: ChannelRecord) -> bool {
        if !self.seen_names.insert(record.name.clone()) {
            return false;
        }
        self.records.push(record);
        true
    }
}

/// Told about each page once its containers are processed.
pub trait RunObserver {
    fn page_done(&mut self, _page: usize, _added: usize, _total: usize) {}
}

impl RunObserver for () {}

pub fn extract(source: &mut dyn PageSource, config: &ExtractConfig) -> ExtractionRun {
    extract_with(source, config, &mut ())
}

pub fn extract_with(
    source: &mut dyn PageSource,
    config: &ExtractConfig,
    observer: &mut dyn RunObserver,
) -> ExtractionRun {
    let mut run = ExtractionRun::new();
    let reason = drive(&mut run, source, config, observer);
    info!(
        reason = %reason,
        records = run.records.len(),
        pages = run.pages_processed,
        skipped = run.skipped,
        duplicates = run.duplicates,
        "Extraction finished"
    );
    run.terminated = Some(reason);
    run
}

fn drive(
    run: &mut ExtractionRun,
    source: &mut dyn PageSource,
    config: &ExtractConfig,
    observer: &mut dyn RunObserver,
) -> Termination {
    loop {
        if run.page_cursor > config.max_pages {
            return Termination::PageLimit;
        }
        if config.target_reached(run.records.len()) {
            return Termination::Exhausted;
        }

        let blocks = match source.container_blocks() {
            Ok(b) => b,
            Err(e) => {
                warn!(page = run.page_cursor, "Fetching containers failed: {}", e);
                run.source_error = Some(e.to_string());
                return Termination::SourceError;
            }
        };

        if blocks.is_empty() {
            if run.page_cursor == 1 {
                warn!("No channel containers on the first page");
                return Termination::NoContainers;
            }
            info!(page = run.page_cursor, "No more containers");
            return Termination::Exhausted;
        }

        debug!(page = run.page_cursor, containers = blocks.len(), "Processing page");
        let before = run.records.len();

        for (index, block) in blocks.into_iter().enumerate() {
            if config.target_reached(run.records.len()) {
                break;
            }
            let parsed = block.and_then(|b| parse_block(&b, config));
            match parsed {
                Ok(record) => {
                    let name = record.name.clone();
                    if run.push(record) {
                        debug!(page = run.page_cursor, index, "Added {}", name);
                    } else {
                        run.duplicates += 1;
                    }
                }
                Err(e) => {
                    run.skipped += 1;
                    debug!(page = run.page_cursor, index, "Skipping container: {}", e);
                }
            }
        }

        run.pages_processed += 1;
        let added = run.records.len() - before;
        info!(
            page = run.page_cursor,
            added,
            total = run.records.len(),
            "Page done"
        );
        observer.page_done(run.page_cursor, added, run.records.len());

        if config.target_reached(run.records.len()) {
            return Termination::Exhausted;
        }
        if run.page_cursor >= config.max_pages {
            return Termination::PageLimit;
        }

        match source.advance_page() {
            Ok(true) => run.page_cursor += 1,
            Ok(false) => {
                info!(page = run.page_cursor, "No further page");
                return Termination::Exhausted;
            }
            Err(e) => {
                warn!(page = run.page_cursor, "Advancing failed: {}", e);
                run.source_error = Some(e.to_string());
                return Termination::SourceError;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RecordParseError, SourceError};
    use crate::source::{BlockResult, RawBlock};

    /// Serves canned pages; past the end it keeps repeating the generator.
    struct ScriptedSource {
        pages: Vec<Vec<BlockResult>>,
        current: usize,
        fetches: usize,
        unlimited: bool,
        fail_advance_from: Option<usize>,
        fail_fetch_from: Option<usize>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Vec<BlockResult>>) -> Self {
            ScriptedSource {
                pages,
                current: 0,
                fetches: 0,
                unlimited: false,
                fail_advance_from: None,
                fail_fetch_from: None,
            }
        }

        fn unlimited() -> Self {
            ScriptedSource {
                unlimited: true,
                ..Self::new(Vec::new())
            }
        }
    }

    impl PageSource for ScriptedSource {
        fn container_blocks(&mut self) -> Result<Vec<BlockResult>, SourceError> {
            self.fetches += 1;
            if self.fail_fetch_from.is_some_and(|n| self.current + 1 >= n) {
                return Err(SourceError::Browser("disconnected".into()));
            }
            if self.unlimited {
                let p = self.current;
                return Ok((0..3).map(|i| Ok(card(&format!("Chan {p}-{i}"), 100))).collect());
            }
            Ok(self.pages.get(self.current).cloned().unwrap_or_default())
        }

        fn advance_page(&mut self) -> Result<bool, SourceError> {
            if self.fail_advance_from.is_some_and(|n| self.current + 1 >= n) {
                return Err(SourceError::Browser("session closed".into()));
            }
            if !self.unlimited && self.current + 1 >= self.pages.len() {
                return Ok(false);
            }
            self.current += 1;
            Ok(true)
        }
    }

    fn card(name: &str, subs: u64) -> RawBlock {
        RawBlock {
            text: format!("{name}\n{subs} subscribers"),
            links: vec![format!("/@{}", name.replace(' ', "_"))],
            ..Default::default()
        }
    }

    fn names(run: &ExtractionRun) -> Vec<&str> {
        run.records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn page_limit_after_exactly_three_pages() {
        let mut source = ScriptedSource::unlimited();
        let config = ExtractConfig {
            max_pages: 3,
            ..Default::default()
        };
        let run = extract(&mut source, &config);
        assert_eq!(run.terminated, Some(Termination::PageLimit));
        assert_eq!(run.pages_processed, 3);
        assert_eq!(source.fetches, 3);
        assert_eq!(run.records.len(), 9);
    }

    #[test]
    fn empty_first_page_is_no_containers() {
        let mut source = ScriptedSource::new(vec![vec![]]);
        let run = extract(&mut source, &ExtractConfig::default());
        assert_eq!(run.terminated, Some(Termination::NoContainers));
        assert!(run.records.is_empty());
        assert_eq!(run.pages_processed, 0);
    }

    #[test]
    fn empty_later_page_is_exhausted() {
        let mut source = ScriptedSource::new(vec![vec![Ok(card("Alpha", 10))], vec![]]);
        let run = extract(&mut source, &ExtractConfig::default());
        assert_eq!(run.terminated, Some(Termination::Exhausted));
        assert_eq!(names(&run), ["Alpha"]);
        assert_eq!(run.pages_processed, 1);
    }

    #[test]
    fn duplicate_names_keep_first_occurrence() {
        let mut source = ScriptedSource::new(vec![
            vec![Ok(card("Alpha", 10)), Ok(card("Beta", 20)), Ok(card("Alpha", 99))],
            vec![Ok(card("Beta", 77)), Ok(card("Gamma", 30))],
        ]);
        let run = extract(&mut source, &ExtractConfig::default());
        assert_eq!(names(&run), ["Alpha", "Beta", "Gamma"]);
        assert_eq!(run.records[0].subscriber_count, 10);
        assert_eq!(run.records[1].subscriber_count, 20);
        assert_eq!(run.duplicates, 2);
        assert!(run.records.iter().any(|r| r.name == "Gamma"));
        assert_eq!(run.terminated, Some(Termination::Exhausted));
    }

    #[test]
    fn faulty_container_only_skips_itself() {
        let page = vec![
            Ok(card("One", 1)),
            Ok(card("Two", 2)),
            Err(RecordParseError::Malformed("stale element".into())),
            Ok(card("Four", 4)),
            Ok(card("Five", 5)),
        ];
        let mut source = ScriptedSource::new(vec![page, vec![Ok(card("Six", 6))]]);
        let run = extract(&mut source, &ExtractConfig::default());
        assert_eq!(names(&run), ["One", "Two", "Four", "Five", "Six"]);
        assert_eq!(run.skipped, 1);
        assert_eq!(run.pages_processed, 2);
    }

    #[test]
    fn invalid_records_are_skipped_not_fatal() {
        let no_link = RawBlock {
            links: vec![],
            ..card("NoLink", 5)
        };
        let bad_count = RawBlock {
            text: "Bad\nN/A subscribers".into(),
            ..card("Bad", 0)
        };
        let mut source =
            ScriptedSource::new(vec![vec![Ok(no_link), Ok(bad_count), Ok(card("Good", 3))]]);
        let run = extract(&mut source, &ExtractConfig::default());
        assert_eq!(names(&run), ["Good"]);
        assert_eq!(run.skipped, 2);
    }

    #[test]
    fn target_count_stops_mid_page() {
        let mut source = ScriptedSource::unlimited();
        let config = ExtractConfig {
            target_count: Some(4),
            ..Default::default()
        };
        let run = extract(&mut source, &config);
        assert_eq!(run.records.len(), 4);
        assert_eq!(run.terminated, Some(Termination::Exhausted));
        assert_eq!(source.fetches, 2);
    }

    #[test]
    fn advance_error_preserves_records() {
        let mut source = ScriptedSource::new(vec![
            vec![Ok(card("Alpha", 1))],
            vec![Ok(card("Beta", 2))],
            vec![Ok(card("Gamma", 3))],
        ]);
        source.fail_advance_from = Some(2);
        let run = extract(&mut source, &ExtractConfig::default());
        assert_eq!(run.terminated, Some(Termination::SourceError));
        assert_eq!(names(&run), ["Alpha", "Beta"]);
        assert!(run.source_error.as_deref().unwrap().contains("session closed"));
    }

    #[test]
    fn fetch_error_preserves_records() {
        let mut source = ScriptedSource::new(vec![
            vec![Ok(card("Alpha", 1)), Ok(card("Beta", 2))],
            vec![Ok(card("Gamma", 3))],
        ]);
        source.fail_fetch_from = Some(2);
        let run = extract(&mut source, &ExtractConfig::default());
        assert_eq!(run.terminated, Some(Termination::SourceError));
        assert_eq!(names(&run), ["Alpha", "Beta"]);
        assert_eq!(run.pages_processed, 1);
        assert_eq!(run.source_error.as_deref(), Some("browser session failed: disconnected"));
    }

    #[test]
    fn zero_bounds_fetch_nothing() {
        let mut source = ScriptedSource::unlimited();
        let config = ExtractConfig {
            max_pages: 0,
            ..Default::default()
        };
        assert_eq!(extract(&mut source, &config).terminated, Some(Termination::PageLimit));

        let config = ExtractConfig {
            target_count: Some(0),
            ..Default::default()
        };
        assert_eq!(extract(&mut source, &config).terminated, Some(Termination::Exhausted));
        assert_eq!(source.fetches, 0);
    }

    #[test]
    fn observer_sees_every_page() {
        struct Pages(Vec<(usize, usize, usize)>);
        impl RunObserver for Pages {
            fn page_done(&mut self, page: usize, added: usize, total: usize) {
                self.0.push((page, added, total));
            }
        }
        let mut source = ScriptedSource::new(vec![
            vec![Ok(card("Alpha", 1)), Ok(card("Beta", 1))],
            vec![Ok(card("Beta", 1)), Ok(card("Gamma", 1))],
        ]);
        let mut pages = Pages(Vec::new());
        extract_with(&mut source, &ExtractConfig::default(), &mut pages);
        assert_eq!(pages.0, [(1, 2, 2), (2, 1, 3)]);
    }
}
