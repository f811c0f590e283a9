/// Parse a subscriber figure like `12 345`, `12,345` or `12345`.
///
/// Whitespace of any kind (regular, non-breaking, narrow no-break) and commas
/// are thousands separators. Anything else left over makes the figure invalid.
pub fn normalize_count(raw: &str) -> Option<u64> {
    let digits: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// `1234567` -> `1,234,567`
pub fn with_thousands(n: u64) -> String {
    let raw = n.to_string();
    let mut out = String::with_capacity(raw.len() + raw.len() / 3);
    for (i, ch) in raw.chars().enumerate() {
        if i > 0 && (raw.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
