use std::fmt::Write as _;
use std::path::Path;

use anyhow::{bail, Context, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;

use crate::extractor::count::{normalize_count, with_thousands};
use crate::extractor::ChannelRecord;
use crate::sink::is_sqlite_path;
use crate::sink::sqlite::TABLE;

/// A row read back from a results table. The count may not survive coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub name: String,
    pub subscribers: Option<u64>,
    pub link: String,
}

impl From<&ChannelRecord> for ReportRow {
    fn from(r: &ChannelRecord) -> Self {
        ReportRow {
            name: r.name.clone(),
            subscribers: Some(r.subscriber_count),
            link: r.canonical_link.clone(),
        }
    }
}

pub fn load(path: &Path) -> Result<Vec<ReportRow>> {
    if !path.exists() {
        bail!("{} not found, run a scrape first", path.display());
    }
    if is_sqlite_path(path) {
        load_sqlite(path)
    } else {
        load_csv(path)
    }
}

fn load_csv(path: &Path) -> Result<Vec<ReportRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let headers = rdr.headers()?.clone();
    let col = |name: &str, fallback: usize| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .unwrap_or(fallback)
    };
    let (name_i, subs_i, link_i) = (col("name", 0), col("subscribers", 1), col("link", 2));

    let mut rows = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        let field = |i: usize| rec.get(i).unwrap_or_default().to_string();
        rows.push(ReportRow {
            name: field(name_i),
            subscribers: coerce_count(&field(subs_i)),
            link: field(link_i),
        });
    }
    Ok(rows)
}

fn load_sqlite(path: &Path) -> Result<Vec<ReportRow>> {
    let conn = Connection::open(path)?;
    let mut stmt = conn
        .prepare(&format!("SELECT name, subscribers, link FROM {} ORDER BY rowid", TABLE))
        .with_context(|| format!("No {} table in {}", TABLE, path.display()))?;
    let rows = stmt
        .query_map([], |r| {
            let subscribers = match r.get::<_, SqlValue>(1)? {
                SqlValue::Integer(n) => u64::try_from(n).ok(),
                SqlValue::Real(f) => coerce_count(&f.to_string()),
                SqlValue::Text(t) => coerce_count(&t),
                _ => None,
            };
            Ok(ReportRow {
                name: r.get::<_, Option<String>>(0)?.unwrap_or_default(),
                subscribers,
                link: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Digits with separators, or a plain non-negative number. Anything else is missing.
fn coerce_count(raw: &str) -> Option<u64> {
    normalize_count(raw).or_else(|| {
        let f: f64 = raw.trim().parse().ok()?;
        (f.is_finite() && f >= 0.0).then(|| f as u64)
    })
}

/// Rows with a count, largest first. Ties keep table order.
pub fn top_by_subscribers(rows: &[ReportRow], k: usize) -> Vec<&ReportRow> {
    let mut ranked: Vec<&ReportRow> = rows.iter().filter(|r| r.subscribers.is_some()).collect();
    ranked.sort_by(|a, b| b.subscribers.cmp(&a.subscribers));
    ranked.truncate(k);
    ranked
}

fn count_text(n: Option<u64>) -> String {
    n.map(with_thousands).unwrap_or_else(|| "unknown".into())
}

pub fn render(rows: &[ReportRow], first: usize, top: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total channels: {}", rows.len());
    if rows.is_empty() {
        return out;
    }

    let _ = writeln!(out, "\nFirst {} channels:", first.min(rows.len()));
    for (i, r) in rows.iter().take(first).enumerate() {
        let _ = writeln!(out, "{:2}. {} - {} subscribers", i + 1, r.name, count_text(r.subscribers));
        let _ = writeln!(out, "    Link: {}", r.link);
    }

    let ranked = top_by_subscribers(rows, top);
    if !ranked.is_empty() {
        let _ = writeln!(out, "\nTop {} by subscribers:", ranked.len());
        for r in ranked {
            let _ = writeln!(out, "- {} ({}) - {}", r.name, count_text(r.subscribers), r.link);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{for_path, ColumnSet, Sink};

    fn row(name: &str, subs: Option<u64>) -> ReportRow {
        ReportRow {
            name: name.into(),
            subscribers: subs,
            link: format!("https://t.me/{}", name.to_lowercase()),
        }
    }

    #[test]
    fn coercion() {
        assert_eq!(coerce_count("1 234"), Some(1234));
        assert_eq!(coerce_count("1500.0"), Some(1500));
        assert_eq!(coerce_count("N/A"), None);
        assert_eq!(coerce_count("-5"), None);
        assert_eq!(coerce_count(""), None);
    }

    #[test]
    fn top_skips_missing_counts() {
        let rows = vec![row("A", Some(10)), row("B", None), row("C", Some(300)), row("D", Some(10))];
        let names: Vec<&str> = top_by_subscribers(&rows, 3).iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["C", "A", "D"]);
    }

    #[test]
    fn rendering() {
        let rows = vec![row("Alpha", Some(1500)), row("Beta", None), row("Gamma", Some(2_000_000))];
        let text = render(&rows, 2, 10);
        assert!(text.contains(" 1. Alpha - 1,500 subscribers\n    Link: https://t.me/alpha\n"));
        assert!(text.contains(" 2. Beta - unknown subscribers"));
        assert!(!text.contains(" 3. Gamma"));
        assert!(text.contains("Top 2 by subscribers:\n- Gamma (2,000,000) - https://t.me/gamma\n- Alpha (1,500)"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load(Path::new("/nonexistent/tgstat_channels.csv")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn reads_back_both_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            ChannelRecord {
                name: "Alpha".into(),
                subscriber_count: 42,
                canonical_link: "https://t.me/alpha".into(),
                category: "News".into(),
                language: "English".into(),
                age_descriptor: "Unknown".into(),
            },
        ];
        for file in ["out.csv", "out.db"] {
            let path = dir.path().join(file);
            for_path(&path, ColumnSet::Extended).write(&records).unwrap();
            let rows = load(&path).unwrap();
            assert_eq!(rows, [ReportRow::from(&records[0])], "{}", file);
        }
    }

    #[test]
    fn hand_edited_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edited.csv");
        std::fs::write(&path, "link,name,subscribers\nhttps://t.me/x,X,\"12,000\"\nhttps://t.me/y,Y,lots\n")
            .unwrap();
        let rows = load(&path).unwrap();
        assert_eq!(rows[0].subscribers, Some(12000));
        assert_eq!(rows[0].name, "X");
        assert_eq!(rows[1].subscribers, None);
    }
}
