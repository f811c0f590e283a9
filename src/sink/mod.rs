pub mod csv_file;
pub mod sqlite;

use std::path::Path;

use anyhow::Result;

use crate::extractor::ChannelRecord;
use crate::extractor::count::with_thousands;

/// Which columns go into the output table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSet {
    /// name, subscribers, link, category
    Basic,
    /// basic plus language and age
    Extended,
}

impl ColumnSet {
    pub fn headers(self) -> &'static [&'static str] {
        match self {
            ColumnSet::Basic => &["name", "subscribers", "link", "category"],
            ColumnSet::Extended => &["name", "subscribers", "link", "category", "language", "age"],
        }
    }

    pub fn row(self, r: &ChannelRecord) -> Vec<String> {
        let mut row = vec![
            r.name.clone(),
            r.subscriber_count.to_string(),
            r.canonical_link.clone(),
            r.category.clone(),
        ];
        if self == ColumnSet::Extended {
            row.push(r.language.clone());
            row.push(r.age_descriptor.clone());
        }
        row
    }
}

/// Persists a finished run. Existing output is replaced.
pub trait Sink {
    fn write(&self, records: &[ChannelRecord]) -> Result<()>;

    fn target(&self) -> &Path;
}

/// SQLite for `.db`/`.sqlite`/`.sqlite3`, CSV for anything else.
pub fn for_path(path: &Path, columns: ColumnSet) -> Box<dyn Sink> {
    if is_sqlite_path(path) {
        Box::new(sqlite::SqliteSink::new(path.to_path_buf(), columns))
    } else {
        Box::new(csv_file::CsvSink::new(path.to_path_buf(), columns))
    }
}

pub fn is_sqlite_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("db" | "sqlite" | "sqlite3")
    )
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// One-line description for the run summary.
pub fn describe(path: &Path, count: usize) -> String {
    format!("Saved {} channels to {}", with_thousands(count as u64), path.display())
}
