use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use tracing::warn;

use motormeet_scraper::config::Config;
use motormeet_scraper::logging;
use motormeet_scraper::pipeline::{self, PipelineOptions};
use motormeet_scraper::storage::{InMemoryStorage, Storage};

#[derive(Parser)]
#[command(
    name = "motormeet_scraper",
    about = "MotorMeet event ingestion pipeline",
    version
)]
struct Cli {
    /// Scrape every enabled source
    #[arg(long)]
    all: bool,

    /// Specific source keys to scrape (comma-separated)
    #[arg(long)]
    source: Option<String>,

    /// Fetch, dedupe and build rows but write nothing
    #[arg(long)]
    dry_run: bool,

    /// Only keep events starting on or after this date (YYYY-MM-DD)
    #[arg(long)]
    range_start: Option<NaiveDate>,

    /// Only keep events starting on or before this date (YYYY-MM-DD)
    #[arg(long)]
    range_end: Option<NaiveDate>,

    /// Cap on events fetched per source
    #[arg(long)]
    limit_per_source: Option<usize>,

    /// Correlation id recorded in job payloads
    #[arg(long)]
    job_id: Option<String>,

    /// Path to the config file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();

    if !cli.all && cli.source.is_none() {
        eprintln!("error: pass --all or --source <keys> to pick what to scrape");
        std::process::exit(1);
    }
    if cli.all && cli.source.is_some() {
        eprintln!("error: --all and --source are mutually exclusive");
        std::process::exit(1);
    }
    if let (Some(start), Some(end)) = (cli.range_start, cli.range_end) {
        if start > end {
            eprintln!("error: --range-start {start} is after --range-end {end}");
            std::process::exit(1);
        }
    }

    let config = Config::load(&cli.config)?;
    let storage = select_storage().await?;

    let filter: Option<Vec<String>> = cli.source.map(|list| {
        list.split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect()
    });
    let options = PipelineOptions {
        dry_run: cli.dry_run,
        range_start: cli.range_start,
        range_end: cli.range_end,
        limit_per_source: cli.limit_per_source,
        job_id: cli.job_id,
    };

    let stats = pipeline::run_pipeline(storage, &config, &options, filter.as_deref()).await?;

    println!("\n📊 Run summary:");
    println!("   Discovered: {}", stats.total_discovered);
    println!("   Unique:     {}", stats.total_unique);
    if cli.dry_run {
        println!("   Would write: {}", stats.total_inserted);
    } else {
        println!("   Written:    {}", stats.total_inserted);
    }
    println!("   Sources ok: {}", stats.sources_processed);
    println!("   Failed:     {}", stats.sources_failed);
    if !stats.errors.is_empty() {
        println!("\n⚠️  Problems:");
        for problem in problem_lines(&stats.errors, 10) {
            println!("   - {problem}");
        }
    }

    Ok(())
}

/// First few problems verbatim, the rest folded into a count; the full list
/// is always in the log file.
fn problem_lines(errors: &[String], cap: usize) -> Vec<String> {
    let mut lines: Vec<String> = errors.iter().take(cap).cloned().collect();
    if errors.len() > cap {
        lines.push(format!("... and {} more (see logs/)", errors.len() - cap));
    }
    lines
}

#[cfg(feature = "db")]
fn database_env_ready() -> bool {
    std::env::var("LIBSQL_URL").is_ok() && std::env::var("LIBSQL_AUTH_TOKEN").is_ok()
}

#[cfg(feature = "db")]
async fn select_storage() -> Result<Arc<dyn Storage>> {
    use motormeet_scraper::db::DatabaseStorage;

    if database_env_ready() {
        let database = DatabaseStorage::connect().await?;
        database.run_migrations().await?;
        Ok(Arc::new(database))
    } else {
        warn!("LIBSQL_URL/LIBSQL_AUTH_TOKEN not set; falling back to in-memory storage");
        println!("⚠️  LIBSQL_URL/LIBSQL_AUTH_TOKEN not set; using in-memory storage (nothing survives this run)");
        Ok(Arc::new(InMemoryStorage::new()))
    }
}

#[cfg(not(feature = "db"))]
async fn select_storage() -> Result<Arc<dyn Storage>> {
    warn!("Built without the db feature; using in-memory storage");
    println!("⚠️  Built without the db feature; using in-memory storage (nothing survives this run)");
    Ok(Arc::new(InMemoryStorage::new()))
}
