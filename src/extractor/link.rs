use std::sync::LazyLock;

use regex::Regex;

pub const NO_LINK: &str = "N/A";

static HANDLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/@([\w_]+)").unwrap());

/// Turn a listing href into the link we export.
///
/// `.../@handle` becomes a t.me deep link; root-relative paths are resolved
/// against `origin`; anything else is returned as-is.
pub fn canonicalize(raw_href: &str, origin: &str) -> String {
    let href = raw_href.trim();
    if let Some(caps) = HANDLE_RE.captures(href) {
        return format!("https://t.me/{}", &caps[1]);
    }
    if let Some(rest) = href.strip_prefix("//") {
        return format!("https://{}", rest);
    }
    if href.starts_with('/') {
        return format!("{}{}", origin.trim_end_matches('/'), href);
    }
    href.to_string()
}

/// `None` means the container has to be skipped.
pub fn resolve_link(href: Option<&str>, require_link: bool, origin: &str) -> Option<String> {
    match href.map(str::trim).filter(|h| !h.is_empty()) {
        Some(h) => Some(canonicalize(h, origin)),
        None if require_link => None,
        None => Some(NO_LINK.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://tgstat.com";

    #[test]
    fn root_relative_gets_origin() {
        assert_eq!(
            canonicalize("/channel/123", ORIGIN),
            "https://tgstat.com/channel/123"
        );
        assert_eq!(
            canonicalize("/channel/123", "https://tgstat.com/"),
            "https://tgstat.com/channel/123"
        );
    }

    #[test]
    fn handle_becomes_deep_link() {
        assert_eq!(canonicalize("/@cryptonews", ORIGIN), "https://t.me/cryptonews");
        assert_eq!(
            canonicalize("https://tgstat.com/channel/@cryptonews/stat", ORIGIN),
            "https://t.me/cryptonews"
        );
    }

    #[test]
    fn absolute_and_protocol_relative() {
        assert_eq!(
            canonicalize("https://example.org/x", ORIGIN),
            "https://example.org/x"
        );
        assert_eq!(canonicalize("//tgstat.ru/channel/9", ORIGIN), "https://tgstat.ru/channel/9");
    }

    #[test]
    fn missing_link_policy() {
        assert_eq!(resolve_link(None, true, ORIGIN), None);
        assert_eq!(resolve_link(Some("  "), true, ORIGIN), None);
        assert_eq!(resolve_link(None, false, ORIGIN).as_deref(), Some(NO_LINK));
        assert_eq!(
            resolve_link(Some("/@abc"), true, ORIGIN).as_deref(),
            Some("https://t.me/abc")
        );
    }
}
