use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::config::Config;
use crate::render::{self, PageRenderer};
use crate::{db, export, sitemap};

/// Counters for one indexing run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub listed: usize,
    pub skipped: usize,
    pub indexed: usize,
    pub failed: usize,
    pub pauses: usize,
}

/// List the sitemap, index every page not yet stored, then export the table.
///
/// Pages already in the store are skipped, so repeated runs append only what
/// is new. Render failures leave the URL unindexed for a later run; store and
/// export errors are returned.
pub async fn build_index<R: PageRenderer + ?Sized>(
    config: &Config,
    client: &reqwest::Client,
    renderer: &R,
) -> Result<IndexStats> {
    let urls = sitemap::list_urls(client, &config.sitemap_url).await;
    if urls.is_empty() {
        info!("No URLs found in the sitemap. Exiting.");
        return Ok(IndexStats::default());
    }

    let conn = db::connect(&config.db_path)?;
    db::init_schema(&conn)?;
    let mut seen = db::existing_urls(&conn)?;
    info!("{} pages already indexed in {:?}", seen.len(), config.db_path);

    let mut stats = IndexStats {
        listed: urls.len(),
        ..Default::default()
    };

    let pb = ProgressBar::new(urls.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({eta})")?
            .progress_chars("=> "),
    );

    let last = urls.len() - 1;
    for (i, url) in urls.iter().enumerate() {
        pb.inc(1);
        if seen.contains(url) {
            pb.suspend(|| info!("Skipping {}...", url));
            stats.skipped += 1;
            continue;
        }

        pb.suspend(|| info!("Processing {}...", url));
        match render::render_to_markdown(renderer, url).await {
            Some(summary) => {
                db::insert_page(&conn, url, &summary)?;
                seen.insert(url.clone());
                stats.indexed += 1;
            }
            None => stats.failed += 1,
        }

        if i < last {
            stats.pauses += 1;
            tokio::time::sleep(config.delay()).await;
        }
    }
    pb.finish_and_clear();

    let export_path = config.export_path();
    let rows = export::export_pages(&conn, config.export_format, &export_path)
        .context("Export failed")?;
    info!("Exported {} pages to {:?}", rows, export_path);

    info!(
        "Done: {} listed, {} skipped, {} indexed, {} failed",
        stats.listed, stats.skipped, stats.indexed, stats.failed
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::export::ExportFormat;
    use crate::render::RenderError;

    /// Serves canned HTML per URL and records every call. Unknown URLs fail.
    #[derive(Default)]
    struct FakeRenderer {
        pages: HashMap<String, String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRenderer {
        fn with(pages: &[(&str, &str)]) -> Self {
            FakeRenderer {
                pages: pages
                    .iter()
                    .map(|(u, h)| (u.to_string(), h.to_string()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageRenderer for FakeRenderer {
        async fn render(&self, url: &str) -> Result<String, RenderError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| RenderError::Navigation(format!("net::ERR_FAILED at {url}")))
        }
    }

    fn urlset(urls: &[&str]) -> String {
        let body: String = urls
            .iter()
            .map(|u| format!("<url><loc>{}</loc></url>", u))
            .collect();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">{}</urlset>",
            body
        )
    }

    async fn sitemap_server(body: String) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    fn test_config(dir: &Path, sitemap_url: String) -> Config {
        Config {
            sitemap_url,
            db_path: dir.join("opendata.db"),
            export_path: Some(dir.join("opendata.sql")),
            rate_limit_delay: 0,
            ..Config::default()
        }
    }

    fn stored(config: &Config) -> Vec<db::PageRecord> {
        let conn = db::connect(&config.db_path).unwrap();
        db::fetch_pages(&conn).unwrap()
    }

    #[tokio::test]
    async fn indexes_successes_and_omits_failures() {
        let server = sitemap_server(urlset(&["https://a.test/A", "https://a.test/B"])).await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), server.uri());
        let renderer = FakeRenderer::with(&[("https://a.test/A", "<p>Hello</p>")]);
        let client = sitemap::http_client(&config).unwrap();

        let stats = build_index(&config, &client, &renderer).await.unwrap();

        assert_eq!(stats.indexed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(
            stored(&config),
            vec![db::PageRecord {
                url: "https://a.test/A".into(),
                summary: Some("Hello".into()),
            }]
        );

        let dump = std::fs::read_to_string(config.export_path()).unwrap();
        let fresh = rusqlite::Connection::open_in_memory().unwrap();
        fresh.execute_batch(&dump).unwrap();
        assert_eq!(db::fetch_pages(&fresh).unwrap(), stored(&config));
    }

    #[tokio::test]
    async fn second_run_renders_nothing_already_stored() {
        let urls = ["https://a.test/1", "https://a.test/2", "https://a.test/3"];
        let server = sitemap_server(urlset(&urls)).await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), server.uri());
        let client = sitemap::http_client(&config).unwrap();

        let first = FakeRenderer::with(&[
            ("https://a.test/1", "<p>one</p>"),
            ("https://a.test/2", "<p>two</p>"),
        ]);
        build_index(&config, &client, &first).await.unwrap();
        assert_eq!(first.calls().len(), 3);

        let second = FakeRenderer::with(&[
            ("https://a.test/1", "<p>changed</p>"),
            ("https://a.test/2", "<p>changed</p>"),
        ]);
        let stats = build_index(&config, &client, &second).await.unwrap();

        assert_eq!(stats.indexed, 0);
        assert_eq!(stats.skipped, 2);
        // the page that failed last time is the only one retried
        assert_eq!(second.calls(), vec!["https://a.test/3"]);
        let summaries: Vec<_> = stored(&config).into_iter().filter_map(|p| p.summary).collect();
        assert_eq!(summaries, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn pauses_after_each_processed_page_but_the_last() {
        let urls = ["https://a.test/1", "https://a.test/2", "https://a.test/3"];
        let server = sitemap_server(urlset(&urls)).await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), server.uri());
        let client = sitemap::http_client(&config).unwrap();
        let renderer = FakeRenderer::with(&[
            ("https://a.test/1", "<p>one</p>"),
            ("https://a.test/3", "<p>three</p>"),
        ]);

        let stats = build_index(&config, &client, &renderer).await.unwrap();
        assert_eq!(stats.pauses, 2);

        // everything but the middle page is now stored and skipped without pausing
        let stats = build_index(&config, &client, &renderer).await.unwrap();
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.pauses, 1);
    }

    #[tokio::test]
    async fn duplicate_sitemap_entries_render_once() {
        let server = sitemap_server(urlset(&["https://a.test/x", "https://a.test/x"])).await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), server.uri());
        let client = sitemap::http_client(&config).unwrap();
        let renderer = FakeRenderer::with(&[("https://a.test/x", "<p>x</p>")]);

        let stats = build_index(&config, &client, &renderer).await.unwrap();

        assert_eq!(renderer.calls().len(), 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stored(&config).len(), 1);
    }

    #[tokio::test]
    async fn empty_sitemap_touches_nothing() {
        let server = sitemap_server(urlset(&[])).await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), server.uri());
        let client = sitemap::http_client(&config).unwrap();
        let renderer = FakeRenderer::default();

        let stats = build_index(&config, &client, &renderer).await.unwrap();

        assert_eq!(stats, IndexStats::default());
        assert!(renderer.calls().is_empty());
        assert!(!config.db_path.exists());
        assert!(!config.export_path().exists());
    }

    #[tokio::test]
    async fn jsonl_export_holds_indexed_rows() {
        let server = sitemap_server(urlset(&["https://a.test/A"])).await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), server.uri());
        config.export_format = ExportFormat::Jsonl;
        config.export_path = Some(dir.path().join("snapshot.jsonl"));
        let client = sitemap::http_client(&config).unwrap();
        let renderer = FakeRenderer::with(&[("https://a.test/A", "<p>Hello</p>")]);

        build_index(&config, &client, &renderer).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("snapshot.jsonl")).unwrap();
        let row: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(row["url"], "https://a.test/A");
        assert_eq!(row["summary"], "Hello");
    }
}
