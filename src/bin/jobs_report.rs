use anyhow::Result;
use motormeet_scraper::db::DatabaseStorage;
use motormeet_scraper::storage::Storage;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let limit = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(20);

    println!("Connecting to database...");
    let storage = DatabaseStorage::connect().await?;

    let jobs = storage.recent_scrape_jobs(limit).await?;
    if jobs.is_empty() {
        println!("No scrape jobs recorded yet");
        return Ok(());
    }

    println!("Last {} scrape jobs:", jobs.len());
    for job in jobs {
        let id = job
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let finished = job
            .completed_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "running".to_string());
        println!(
            "  [{}] {} {} started={} finished={}",
            job.status.as_str(),
            job.source_key,
            id,
            job.started_at.to_rfc3339(),
            finished
        );
        if let Some(error) = &job.error_message {
            println!("      error: {error}");
        }
        if !job.payload.is_null() {
            println!("      payload: {}", job.payload);
        }
    }

    Ok(())
}
