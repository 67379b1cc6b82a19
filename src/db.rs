use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;

pub const PAGES_DDL: &str = "CREATE TABLE IF NOT EXISTS pages (
    url     TEXT PRIMARY KEY,
    summary TEXT
)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRecord {
    pub url: String,
    pub summary: Option<String>,
}

pub fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(PAGES_DDL)?;
    Ok(())
}

pub fn existing_urls(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT url FROM pages")?;
    let urls = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(urls)
}

pub fn insert_page(conn: &Connection, url: &str, summary: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO pages (url, summary) VALUES (?1, ?2)",
        rusqlite::params![url, summary],
    )
    .with_context(|| format!("Failed to insert {}", url))?;
    Ok(())
}

/// All records in insertion order.
pub fn fetch_pages(conn: &Connection) -> Result<Vec<PageRecord>> {
    let mut stmt = conn.prepare("SELECT url, summary FROM pages ORDER BY rowid")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PageRecord {
                url: row.get(0)?,
                summary: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_pages(conn: &Connection) -> Result<usize> {
    let n: usize = conn.query_row("SELECT COUNT(*) FROM pages", [], |r| r.get(0))?;
    Ok(n)
}
