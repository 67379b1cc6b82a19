use std::sync::LazyLock;

use anyhow::{Context, Result};
use quick_xml::events::Event;
use regex::Regex;
use tracing::{info, warn};

use crate::config::Config;

static XML_PI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<\?xml[^>]*\?>").unwrap());

pub fn http_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build HTTP client")
}

/// Fetch the sitemap and return every `<loc>` in document order.
///
/// Never fails: transport errors, HTTP error statuses and unparseable XML are
/// logged and produce an empty list.
pub async fn list_urls(client: &reqwest::Client, sitemap_url: &str) -> Vec<String> {
    info!("Fetching sitemap: {}", sitemap_url);
    let xml = match fetch_sitemap(client, sitemap_url).await {
        Ok(xml) => xml,
        Err(e) => {
            warn!("Error fetching sitemap: {:#}", e);
            return Vec::new();
        }
    };

    match parse_urlset(&xml) {
        Ok(urls) => {
            info!("Total URLs in sitemap: {}", urls.len());
            urls
        }
        Err(e) => {
            warn!("Error parsing sitemap: {:#}", e);
            Vec::new()
        }
    }
}

async fn fetch_sitemap(client: &reqwest::Client, sitemap_url: &str) -> Result<String> {
    let bytes = client
        .get(sitemap_url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await
        .context("Failed to read sitemap body")?;

    // Declared encoding is ignored; the body is always read as UTF-8.
    let text = String::from_utf8_lossy(&bytes);
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

/// Parse a urlset XML and return all <loc> URLs.
pub fn parse_urlset(xml: &str) -> Result<Vec<String>> {
    let xml = XML_PI_RE.replace_all(xml, "");
    let mut reader = quick_xml::Reader::from_str(&xml);
    let mut urls = Vec::new();
    let mut loc: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"loc" => {
                loc = Some(String::new());
            }
            Ok(Event::Text(e)) => {
                if let Some(text) = loc.as_mut() {
                    text.push_str(&e.unescape()?);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(text) = loc.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"loc" => {
                if let Some(text) = loc.take() {
                    let url = text.trim();
                    if !url.is_empty() {
                        urls.push(url.to_string());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Malformed sitemap at byte {}", reader.buffer_position())
                })
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(urls)
}
