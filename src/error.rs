use thiserror::Error;

/// Failure of the page source itself. Ends the run with `SourceError`.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { status: u16, url: String },

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("browser session failed: {0}")]
    Browser(String),
}

/// Why a single container did not produce a record. Never aborts a page.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordParseError {
    #[error("no subscriber count")]
    MissingSubscribers,

    #[error("unparseable subscriber count {0:?}")]
    BadCount(String),

    #[error("no usable name line")]
    MissingName,

    #[error("no channel link")]
    MissingLink,

    #[error("malformed container: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid subscriber pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("subscriber pattern {0:?} needs a capture group for the count")]
    NoCaptureGroup(String),

    #[error("invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },

    #[error("selector chain {0:?} is empty")]
    EmptyChain(&'static str),
}
