mod config;
mod db;
mod export;
mod indexer;
mod markdown;
mod render;
mod sitemap;

use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::info;

use config::Config;
use render::ChromeRenderer;

#[derive(Parser)]
#[command(
    name = "opendata_indexer",
    about = "Snapshot an open-data portal's sitemap pages as Markdown"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the sitemap, render new pages, store them and export (default)
    Run,
    /// Re-export the existing store without crawling
    Export,
    /// Show how many pages are stored
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let client = sitemap::http_client(&config)?;
            let renderer = ChromeRenderer::new(&config);
            indexer::build_index(&config, &client, &renderer).await?;
        }
        Commands::Export => {
            let conn = db::connect(&config.db_path)?;
            db::init_schema(&conn)?;
            let path = config.export_path();
            let rows = export::export_pages(&conn, config.export_format, &path)?;
            println!("Exported {} pages to {}", rows, path.display());
        }
        Commands::Stats => {
            let conn = db::connect(&config.db_path)?;
            db::init_schema(&conn)?;
            println!("Database: {}", config.db_path.display());
            println!("Export:   {}", config.export_path().display());
            println!("Pages:    {}", db::count_pages(&conn)?);
        }
    }

    info!("Finished in {}", format_duration(t0.elapsed()));
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn no_arguments_means_run() {
        let cli = Cli::try_parse_from(["opendata_indexer"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn subcommands_parse() {
        let cli = Cli::try_parse_from(["opendata_indexer", "export"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Export)));
        assert!(Cli::try_parse_from(["opendata_indexer", "reset"]).is_err());
    }

    #[test]
    fn durations_are_human_readable() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
