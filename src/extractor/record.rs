use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::count::normalize_count;
use super::link::resolve_link;
use super::ExtractConfig;
use crate::error::RecordParseError;
use crate::source::RawBlock;

pub const UNKNOWN: &str = "Unknown";

const MAX_BADGE_CHARS: usize = 50;
const MAX_CATEGORY_LINE_CHARS: usize = 30;

/// Lines carrying these words belong to the subscriber figure, never the name.
const COUNT_LABELS: &[&str] = &["subscriber", "подписчик"];

static CATEGORY_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-zА-Яа-яЁё\s]+$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub name: String,
    pub subscriber_count: u64,
    pub canonical_link: String,
    pub category: String,
    pub language: String,
    pub age_descriptor: String,
}

/// Where a channel name may come from, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameStrategy {
    /// The title anchor of the card.
    TitleElement,
    /// First text line that is not a number and not the subscriber line.
    FirstTextLine,
}

/// Where a category may come from, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStrategy {
    /// First short badge/tag element.
    Badge,
    /// Short purely alphabetic text line other than the name.
    ShortTextLine,
}

pub fn parse_block(block: &RawBlock, config: &ExtractConfig) -> Result<ChannelRecord, RecordParseError> {
    let subscriber_count = subscriber_count(block, config)?;

    let name = config
        .name_strategies
        .iter()
        .find_map(|s| name_by(*s, block, config))
        .ok_or(RecordParseError::MissingName)?;

    let canonical_link = resolve_link(
        block.links.first().map(String::as_str),
        config.require_link,
        &config.site_origin,
    )
    .ok_or(RecordParseError::MissingLink)?;

    let category = config
        .category_strategies
        .iter()
        .find_map(|s| category_by(*s, block, &name, config))
        .unwrap_or_else(|| UNKNOWN.to_string());

    Ok(ChannelRecord {
        name,
        subscriber_count,
        canonical_link,
        category,
        language: non_empty(block.language.as_deref()).unwrap_or_else(|| UNKNOWN.to_string()),
        age_descriptor: non_empty(block.age.as_deref()).unwrap_or_else(|| UNKNOWN.to_string()),
    })
}

fn subscriber_count(block: &RawBlock, config: &ExtractConfig) -> Result<u64, RecordParseError> {
    let caps = config
        .subscriber_pattern
        .captures(&block.text)
        .ok_or(RecordParseError::MissingSubscribers)?;
    let raw = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    normalize_count(raw).ok_or_else(|| RecordParseError::BadCount(raw.trim().to_string()))
}

fn name_by(strategy: NameStrategy, block: &RawBlock, config: &ExtractConfig) -> Option<String> {
    match strategy {
        NameStrategy::TitleElement => non_empty(block.title.as_deref()),
        NameStrategy::FirstTextLine => block
            .lines()
            .find(|line| {
                line.chars().count() > 1
                    && normalize_count(line).is_none()
                    && !is_count_line(line, config)
            })
            .map(str::to_string),
    }
}

fn category_by(
    strategy: CategoryStrategy,
    block: &RawBlock,
    name: &str,
    config: &ExtractConfig,
) -> Option<String> {
    match strategy {
        CategoryStrategy::Badge => block
            .badges
            .iter()
            .map(|b| b.trim())
            .find(|b| !b.is_empty() && b.chars().count() < MAX_BADGE_CHARS)
            .map(str::to_string),
        CategoryStrategy::ShortTextLine => block
            .lines()
            .find(|line| {
                *line != name
                    && line.chars().count() < MAX_CATEGORY_LINE_CHARS
                    && !is_count_line(line, config)
                    && CATEGORY_LINE_RE.is_match(line)
            })
            .map(str::to_string),
    }
}

fn is_count_line(line: &str, config: &ExtractConfig) -> bool {
    let lower = line.to_lowercase();
    config.subscriber_pattern.is_match(line) || COUNT_LABELS.iter().any(|l| lower.contains(l))
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}
