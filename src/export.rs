//! Portable snapshots of the `pages` table.
//!
//! The artifact is written to a temporary file beside the destination and
//! then persisted over it, so readers never see a half-written export and a
//! previous artifact of the same name is replaced.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use rusqlite::Connection;
use serde::Deserialize;
use tempfile::NamedTempFile;

use crate::db::{self, PageRecord, PAGES_DDL};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Self-contained SQL script that recreates the table.
    #[default]
    Sql,
    /// One JSON object per line.
    Jsonl,
    /// Columnar `url`/`summary` file.
    Parquet,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Sql => "sql",
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Parquet => "parquet",
        }
    }
}

/// Export every stored page to `path`, replacing any existing file.
///
/// Returns the number of rows written.
pub fn export_pages(conn: &Connection, format: ExportFormat, path: &Path) -> Result<usize> {
    let pages = db::fetch_pages(conn)?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary export in {:?}", dir))?;

    match format {
        ExportFormat::Parquet => write_parquet(tmp.as_file(), &pages)?,
        ExportFormat::Sql | ExportFormat::Jsonl => {
            let mut w = BufWriter::new(tmp.as_file());
            if format == ExportFormat::Sql {
                write_sql(&mut w, &pages)?;
            } else {
                write_jsonl(&mut w, &pages)?;
            }
            w.flush()?;
        }
    }

    tmp.persist(path)
        .with_context(|| format!("Failed to move export to {:?}", path))?;
    Ok(pages.len())
}

fn write_sql<W: Write>(w: &mut W, pages: &[PageRecord]) -> Result<()> {
    writeln!(w, "-- pages snapshot exported {}", chrono::Utc::now().to_rfc3339())?;
    writeln!(w, "BEGIN TRANSACTION;")?;
    writeln!(w, "{};", PAGES_DDL)?;
    for page in pages {
        writeln!(
            w,
            "INSERT INTO pages (url, summary) VALUES ({}, {});",
            sql_literal(Some(&page.url)),
            sql_literal(page.summary.as_deref()),
        )?;
    }
    writeln!(w, "COMMIT;")?;
    Ok(())
}

fn write_jsonl<W: Write>(w: &mut W, pages: &[PageRecord]) -> Result<()> {
    for page in pages {
        serde_json::to_writer(&mut *w, page)?;
        writeln!(w)?;
    }
    Ok(())
}

fn write_parquet(file: &File, pages: &[PageRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("url", DataType::Utf8, false),
        Field::new("summary", DataType::Utf8, true),
    ]));
    let urls = StringArray::from_iter_values(pages.iter().map(|p| p.url.as_str()));
    let summaries: StringArray = pages.iter().map(|p| p.summary.as_deref()).collect();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(urls) as ArrayRef, Arc::new(summaries) as ArrayRef],
    )?;

    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn sql_literal(value: Option<&str>) -> String {
    match value {
        Some(s) => format!("'{}'", s.replace('\'', "''")),
        None => "NULL".to_string(),
    }
}
