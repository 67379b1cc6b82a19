use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::export::ExportFormat;

pub const DEFAULT_SITEMAP_URL: &str = "https://open.toronto.ca/page-sitemap.xml";
const DEFAULT_DB_PATH: &str = "opendata.db";
const EXPORT_STEM: &str = "opendata";

/// Run settings. Loaded from `OPENDATA_*` env vars; `RATE_LIMIT_DELAY` wins over
/// `OPENDATA_RATE_LIMIT_DELAY` when both are set.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub sitemap_url: String,
    pub db_path: PathBuf,
    #[serde(default)]
    pub export_path: Option<PathBuf>,
    pub export_format: ExportFormat,
    /// Seconds to wait after each processed page.
    pub rate_limit_delay: u64,
    /// Seconds allowed for navigation plus network idle.
    pub navigation_timeout: u64,
    /// Seconds allowed for the sitemap request.
    pub request_timeout: u64,
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,
    pub no_sandbox: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let settings = ::config::Config::builder()
            .set_default("sitemap_url", DEFAULT_SITEMAP_URL)?
            .set_default("db_path", DEFAULT_DB_PATH)?
            .set_default("export_format", "sql")?
            .set_default("rate_limit_delay", 6)?
            .set_default("navigation_timeout", 30)?
            .set_default("request_timeout", 30)?
            .set_default("no_sandbox", false)?
            .add_source(::config::Environment::with_prefix("OPENDATA").try_parsing(true))
            .set_override_option("rate_limit_delay", std::env::var("RATE_LIMIT_DELAY").ok())?
            .build()
            .context("Failed to load configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Explicit export path, or `opendata.<ext>` for the configured format.
    pub fn export_path(&self) -> PathBuf {
        self.export_path.clone().unwrap_or_else(|| {
            PathBuf::from(format!("{}.{}", EXPORT_STEM, self.export_format.extension()))
        })
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.rate_limit_delay)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sitemap_url: DEFAULT_SITEMAP_URL.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            export_path: None,
            export_format: ExportFormat::default(),
            rate_limit_delay: 6,
            navigation_timeout: 30,
            request_timeout: 30,
            chrome_executable: None,
            no_sandbox: false,
        }
    }
}
