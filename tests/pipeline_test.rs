use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use serde_json::json;

use motormeet_scraper::config::{Config, SourceConfig};
use motormeet_scraper::domain::JobStatus;
use motormeet_scraper::error::IngestError;
use motormeet_scraper::pipeline::{run_pipeline, run_sources, PipelineOptions, ResolvedSource};
use motormeet_scraper::storage::{InMemoryStorage, Storage};
use motormeet_scraper::types::{EventSource, FetchOutcome, FetchParams, RawEvent};

struct StubSource {
    key: String,
    events: Vec<RawEvent>,
    item_errors: Vec<String>,
    fail: bool,
    /// Simulated upstream latency, so tests can overlap fetches.
    delay: Option<Duration>,
}

#[async_trait::async_trait]
impl EventSource for StubSource {
    fn source_name(&self) -> &str {
        &self.key
    }

    async fn fetch(&self, _params: &FetchParams) -> motormeet_scraper::error::Result<FetchOutcome> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(IngestError::adapter("upstream returned 500"));
        }
        Ok(FetchOutcome {
            events: self.events.clone(),
            errors: self.item_errors.clone(),
        })
    }
}

fn source_config(key: &str) -> SourceConfig {
    SourceConfig {
        key: key.to_string(),
        name: format!("Stub {key}"),
        adapter: "stub".to_string(),
        enabled: true,
        endpoint: None,
        api_key_env: None,
        delay_ms: None,
        page_size: None,
        timeout_secs: None,
        data_file: None,
        default_city: None,
        default_state: None,
        scope: None,
    }
}

fn stub(key: &str, events: Vec<RawEvent>) -> ResolvedSource {
    ResolvedSource {
        config: source_config(key),
        adapter: Some(Box::new(StubSource {
            key: key.to_string(),
            events,
            item_errors: Vec::new(),
            fail: false,
            delay: None,
        })),
    }
}

fn failing_stub(key: &str) -> ResolvedSource {
    ResolvedSource {
        config: source_config(key),
        adapter: Some(Box::new(StubSource {
            key: key.to_string(),
            events: Vec::new(),
            item_errors: Vec::new(),
            fail: true,
            delay: None,
        })),
    }
}

fn slow_stub(key: &str, events: Vec<RawEvent>, delay: Duration) -> ResolvedSource {
    ResolvedSource {
        config: source_config(key),
        adapter: Some(Box::new(StubSource {
            key: key.to_string(),
            events,
            item_errors: Vec::new(),
            fail: false,
            delay: Some(delay),
        })),
    }
}

fn raw_event(name: &str, city: &str, url: &str, day: NaiveDate) -> RawEvent {
    RawEvent {
        name: name.to_string(),
        city: city.to_string(),
        source_url: Some(url.to_string()),
        start_date: Some(day),
        state: Some("ID".to_string()),
        source_name: "stub".to_string(),
        ..Default::default()
    }
}

fn test_config() -> Config {
    Config {
        pipeline: Default::default(),
        http: Default::default(),
        sources: Vec::new(),
    }
}

fn year_window() -> PipelineOptions {
    PipelineOptions {
        dry_run: false,
        range_start: NaiveDate::from_ymd_opt(2026, 1, 1),
        range_end: NaiveDate::from_ymd_opt(2026, 12, 31),
        limit_per_source: None,
        job_id: None,
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn running_the_same_source_twice_is_idempotent() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::new());
    let config = test_config();
    let options = year_window();
    let day = date(2026, 5, 9);

    let first_batch = vec![
        raw_event(
            "Spring Meet",
            "Boise",
            "https://idaho-meets.example.org/spring",
            day,
        ),
        raw_event(
            "Canyon Run",
            "Boise",
            "https://idaho-meets.example.org/canyon",
            day,
        ),
    ];
    let stats = run_sources(
        storage.clone(),
        vec![stub("idem-source", first_batch)],
        &config,
        &options,
    )
    .await?;
    assert_eq!(stats.total_inserted, 2);

    let window_start = date(2026, 1, 1);
    let window_end = date(2026, 12, 31);
    let after_first = storage.events_in_range(window_start, window_end).await?;
    assert_eq!(after_first.len(), 2);
    let spring_before = after_first
        .iter()
        .find(|e| e.source_url.ends_with("/spring"))
        .expect("spring row stored");
    let spring_slug = spring_before.slug.clone();
    let spring_id = spring_before.id;

    // Same URLs and dates on the next run, one event renamed upstream.
    let second_batch = vec![
        raw_event(
            "Spring Meet and Swap",
            "Boise",
            "https://idaho-meets.example.org/spring",
            day,
        ),
        raw_event(
            "Canyon Run",
            "Boise",
            "https://idaho-meets.example.org/canyon",
            day,
        ),
    ];
    run_sources(
        storage.clone(),
        vec![stub("idem-source", second_batch)],
        &config,
        &options,
    )
    .await?;

    let after_second = storage.events_in_range(window_start, window_end).await?;
    assert_eq!(after_second.len(), 2, "re-run must not duplicate rows");
    let spring_after = after_second
        .iter()
        .find(|e| e.source_url.ends_with("/spring"))
        .expect("spring row still stored");
    assert_eq!(spring_after.slug, spring_slug, "slug survives re-ingest");
    assert_eq!(spring_after.id, spring_id, "row identity survives re-ingest");
    assert_eq!(spring_after.name, "Spring Meet and Swap");

    Ok(())
}

#[tokio::test]
async fn one_failing_source_does_not_stop_the_others() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::new());
    let config = test_config();
    let options = year_window();

    let sources = vec![
        stub(
            "iso-a",
            vec![raw_event(
                "Alpha Meet",
                "Boise",
                "https://alpha.example.org/meet",
                date(2026, 4, 11),
            )],
        ),
        failing_stub("iso-b"),
        stub(
            "iso-c",
            vec![raw_event(
                "Charlie Show",
                "Nampa",
                "https://charlie.example.org/show",
                date(2026, 7, 25),
            )],
        ),
    ];

    let stats = run_sources(storage.clone(), sources, &config, &options).await?;
    assert_eq!(stats.sources_processed, 2);
    assert_eq!(stats.sources_failed, 1);
    assert_eq!(stats.total_inserted, 2);
    assert!(stats.errors.iter().any(|e| e.contains("500")));

    let jobs = storage.recent_scrape_jobs(10).await?;
    assert_eq!(jobs.len(), 3);
    let failed: Vec<_> = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].source_key, "iso-b");
    assert!(failed[0]
        .error_message
        .as_deref()
        .unwrap_or("")
        .contains("500"));
    let completed = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .count();
    assert_eq!(completed, 2);

    Ok(())
}

#[tokio::test]
async fn dry_run_writes_no_events_but_records_the_job() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::new());
    let config = test_config();
    let mut options = year_window();
    options.dry_run = true;
    options.job_id = Some("nightly-2026-08-22".to_string());

    let events = vec![
        raw_event(
            "Dry Run Meet",
            "Twin Falls",
            "https://dry.example.org/meet",
            date(2026, 6, 13),
        ),
        raw_event(
            "Dry Run Show",
            "Twin Falls",
            "https://dry.example.org/show",
            date(2026, 6, 14),
        ),
    ];

    let stats = run_sources(
        storage.clone(),
        vec![stub("dry-source", events)],
        &config,
        &options,
    )
    .await?;
    assert_eq!(stats.total_inserted, 2, "staged rows still counted");

    let rows = storage
        .events_in_range(date(2026, 1, 1), date(2026, 12, 31))
        .await?;
    assert!(rows.is_empty(), "dry run must not write events");

    let jobs = storage.recent_scrape_jobs(5).await?;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Completed);
    assert_eq!(jobs[0].payload["dry_run"], json!(true));
    assert_eq!(jobs[0].payload["would_upsert"], json!(2));
    assert_eq!(jobs[0].payload["job_id"], json!("nightly-2026-08-22"));
    assert!(jobs[0].payload.get("upserted").is_none());

    Ok(())
}

#[tokio::test]
async fn unknown_adapter_fails_its_job_without_aborting_the_run() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::new());
    let config = test_config();
    let options = year_window();

    let mut ghost_config = source_config("ghost-source");
    ghost_config.adapter = "craigslist".to_string();
    let sources = vec![
        ResolvedSource {
            config: ghost_config,
            adapter: None,
        },
        stub(
            "real-source",
            vec![raw_event(
                "Real Meet",
                "Pocatello",
                "https://real.example.org/meet",
                date(2026, 9, 5),
            )],
        ),
    ];

    let stats = run_sources(storage.clone(), sources, &config, &options).await?;
    assert_eq!(stats.sources_failed, 1);
    assert_eq!(stats.sources_processed, 1);
    assert_eq!(stats.total_inserted, 1);
    assert!(stats
        .errors
        .iter()
        .any(|e| e.contains("no adapter registered")));

    Ok(())
}

#[tokio::test]
async fn concurrent_invocations_of_one_source_serialize() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::new());
    let config = test_config();
    let options = year_window();
    let day = date(2026, 5, 3);

    let meet = || {
        raw_event(
            "Dawn Patrol Meet",
            "Moscow",
            "https://dawnpatrol.example.org/meet",
            day,
        )
    };
    let first = run_sources(
        storage.clone(),
        vec![slow_stub(
            "serial-source",
            vec![meet()],
            Duration::from_millis(40),
        )],
        &config,
        &options,
    );
    let second = run_sources(
        storage.clone(),
        vec![slow_stub(
            "serial-source",
            vec![meet()],
            Duration::from_millis(40),
        )],
        &config,
        &options,
    );
    let (first, second) = tokio::join!(first, second);
    let (first, second) = (first?, second?);

    // the later caller waits for the per-source lock, then runs
    assert_eq!(first.sources_processed + second.sources_processed, 2);
    assert_eq!(first.sources_failed + second.sources_failed, 0);
    assert!(first.errors.is_empty());
    assert!(second.errors.is_empty());

    let rows = storage
        .events_in_range(date(2026, 1, 1), date(2026, 12, 31))
        .await?;
    assert_eq!(rows.len(), 1, "both runs land on the same stored row");

    let jobs = storage.recent_scrape_jobs(5).await?;
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));

    Ok(())
}

#[tokio::test]
async fn item_errors_carry_the_source_key_exactly_once() -> Result<()> {
    let storage = Arc::new(InMemoryStorage::new());
    let config = test_config();
    let options = year_window();

    let sources = vec![ResolvedSource {
        config: source_config("tag-source"),
        adapter: Some(Box::new(StubSource {
            key: "tag-source".to_string(),
            events: Vec::new(),
            item_errors: vec!["event card without a title link".to_string()],
            fail: false,
            delay: None,
        })),
    }];

    let stats = run_sources(storage.clone(), sources, &config, &options).await?;
    assert_eq!(stats.sources_processed, 1);
    assert_eq!(
        stats.errors,
        vec!["tag-source: event card without a title link".to_string()]
    );

    Ok(())
}

#[tokio::test]
async fn curated_file_flows_end_to_end_through_the_registry() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data_path = dir.path().join("curated.toml");
    std::fs::write(
        &data_path,
        r#"
        [[events]]
        name = "Radwood Austin"
        date = "2026-06-06"
        city = "Austin"
        state = "TX"
        source_url = "https://radwood.com/events/austin-2026"
        event_type = "car-show"

        [[events]]
        name = "Caffeine and Octane Dallas"
        recurrence = "1st Saturday monthly (Apr-Oct)"
        city = "Plano"
        state = "TX"
        source_url = "https://caffeineandoctane.com/dallas"
        event_type = "cars-and-coffee"
        "#,
    )?;

    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
            [[sources]]
            key = "e2e-curated"
            name = "Curated Listings"
            adapter = "curated"
            data_file = "{}"
            "#,
            data_path.display()
        ),
    )?;
    let config = Config::load(&config_path)?;

    let storage = Arc::new(InMemoryStorage::new());
    let stats = run_pipeline(storage.clone(), &config, &year_window(), None).await?;
    assert_eq!(stats.sources_processed, 1);
    assert_eq!(stats.total_discovered, 2);
    // one dated row plus seven first-Saturday expansions
    assert_eq!(stats.total_inserted, 8);

    let rows = storage
        .events_in_range(date(2026, 1, 1), date(2026, 12, 31))
        .await?;
    assert_eq!(rows.len(), 8);
    assert!(rows
        .iter()
        .any(|r| r.slug == "radwood-austin-austin-2026-06-06"));

    let coffee_dates: Vec<NaiveDate> = rows
        .iter()
        .filter(|r| r.source_url == "https://caffeineandoctane.com/dallas")
        .map(|r| r.start_date)
        .collect();
    assert_eq!(coffee_dates.len(), 7);
    assert_eq!(coffee_dates.first(), Some(&date(2026, 4, 4)));
    assert_eq!(coffee_dates.last(), Some(&date(2026, 10, 3)));

    Ok(())
}
