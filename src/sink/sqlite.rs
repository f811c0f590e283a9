use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

use super::{ensure_parent, ColumnSet, Sink};
use crate::extractor::ChannelRecord;

pub const TABLE: &str = "channels";

/// Writes a `channels` table, replacing any previous one in the file.
pub struct SqliteSink {
    path: PathBuf,
    columns: ColumnSet,
}

impl SqliteSink {
    pub fn new(path: PathBuf, columns: ColumnSet) -> Self {
        SqliteSink { path, columns }
    }
}

fn schema(columns: ColumnSet) -> String {
    let cols: Vec<String> = columns
        .headers()
        .iter()
        .map(|h| match *h {
            "subscribers" => format!("{} INTEGER NOT NULL", h),
            "name" => format!("{} TEXT PRIMARY KEY", h),
            _ => format!("{} TEXT", h),
        })
        .collect();
    format!(
        "DROP TABLE IF EXISTS {t};\nCREATE TABLE {t} ({cols});",
        t = TABLE,
        cols = cols.join(", ")
    )
}

fn insert_sql(columns: ColumnSet) -> String {
    let headers = columns.headers();
    let placeholders: Vec<String> = (1..=headers.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        TABLE,
        headers.join(", "),
        placeholders.join(", ")
    )
}

impl Sink for SqliteSink {
    fn write(&self, records: &[ChannelRecord]) -> Result<()> {
        ensure_parent(&self.path)?;
        let conn = Connection::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(&schema(self.columns))?;
        {
            let mut stmt = tx.prepare(&insert_sql(self.columns))?;
            for r in records {
                stmt.execute(rusqlite::params_from_iter(self.columns.row(r)))?;
            }
        }
        tx.commit()?;
        info!(rows = records.len(), "Wrote {} table to {}", TABLE, self.path.display());
        Ok(())
    }

    fn target(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::tests::record;

    fn rows(path: &Path) -> Vec<(String, i64, String)> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn
            .prepare("SELECT name, subscribers, link FROM channels ORDER BY rowid")
            .unwrap();
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn writes_typed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.db");
        let sink = SqliteSink::new(path.clone(), ColumnSet::Extended);
        sink.write(&[record("Alpha", 1500), record("Beta", 20)]).unwrap();

        assert_eq!(
            rows(&path),
            [
                ("Alpha".to_string(), 1500, "https://t.me/alpha".to_string()),
                ("Beta".to_string(), 20, "https://t.me/beta".to_string()),
            ]
        );
    }

    #[test]
    fn rewrite_replaces_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.sqlite");
        SqliteSink::new(path.clone(), ColumnSet::Extended)
            .write(&[record("Alpha", 1), record("Beta", 2)])
            .unwrap();
        SqliteSink::new(path.clone(), ColumnSet::Basic)
            .write(&[record("Gamma", 3)])
            .unwrap();

        assert_eq!(rows(&path).len(), 1);
        let conn = Connection::open(&path).unwrap();
        let cols: i64 = conn
            .query_row("SELECT COUNT(*) FROM pragma_table_info('channels')", [], |r| r.get(0))
            .unwrap();
        assert_eq!(cols, 4);
    }
}
