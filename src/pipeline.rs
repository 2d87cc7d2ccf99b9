use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Utc};
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use serde_json::json;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::apis;
use crate::builder::{self, BuildContext};
use crate::config::{Config, SourceConfig};
use crate::dedup;
use crate::domain::{EventRow, ExistingEvent, RunStats, ScrapeJob};
use crate::error::{IngestError, Result};
use crate::storage::Storage;
use crate::types::{EventSource, FetchParams};

/// Knobs for one pipeline invocation, straight from the CLI.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub dry_run: bool,
    pub range_start: Option<NaiveDate>,
    pub range_end: Option<NaiveDate>,
    pub limit_per_source: Option<usize>,
    /// External correlation id stamped into job payloads.
    pub job_id: Option<String>,
}

/// A configured source paired with its adapter. `adapter` is `None` when the
/// config names an implementation the registry does not know; the run records
/// that as a failed job instead of aborting.
pub struct ResolvedSource {
    pub config: SourceConfig,
    pub adapter: Option<Box<dyn EventSource>>,
}

// One scrape per source name at a time within this process; a concurrent
// invocation of the same source waits its turn instead of piling requests
// onto the same upstream.
static SOURCE_LOCKS: Lazy<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn source_lock(key: &str) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = SOURCE_LOCKS.lock().unwrap();
    locks
        .entry(key.to_string())
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone()
}

struct RunContext<'a> {
    params: FetchParams,
    default_timeout_secs: u64,
    dry_run: bool,
    job_id: Option<String>,
    type_ids: &'a HashMap<String, Uuid>,
    other_type_id: Uuid,
    /// Year recurrence descriptors expand into.
    target_year: i32,
}

/// Slugs and conflict keys seen so far in this run: the stored snapshot plus
/// every row built by earlier sources, so slugs stay unique across the whole
/// invocation.
struct SlugLedger {
    existing_slugs: HashSet<String>,
    slug_by_conflict_key: HashMap<(String, NaiveDate), String>,
}

impl SlugLedger {
    fn absorb(&mut self, rows: &[EventRow]) {
        for row in rows {
            self.existing_slugs.insert(row.slug.clone());
            self.slug_by_conflict_key
                .insert(row.conflict_key(), row.slug.clone());
        }
    }
}

struct SourceSummary {
    discovered: usize,
    unique: usize,
    written: usize,
    payload: serde_json::Value,
    item_errors: Vec<String>,
}

/// Resolves sources from config and runs them. The only error that aborts
/// before any source runs is an unresolvable configuration; everything after
/// that is isolated per source.
pub async fn run_pipeline(
    storage: Arc<dyn Storage>,
    config: &Config,
    options: &PipelineOptions,
    source_filter: Option<&[String]>,
) -> Result<RunStats> {
    let sources = config.resolve_sources(source_filter)?;
    let resolved = sources
        .into_iter()
        .map(|source| {
            let adapter = apis::create_adapter(&source, &config.http);
            ResolvedSource {
                config: source,
                adapter,
            }
        })
        .collect();
    run_sources(storage, resolved, config, options).await
}

/// Runs an already-resolved source list. Split from [`run_pipeline`] so tests
/// can inject stub adapters.
#[instrument(skip_all, fields(sources = sources.len(), dry_run = options.dry_run))]
pub async fn run_sources(
    storage: Arc<dyn Storage>,
    sources: Vec<ResolvedSource>,
    config: &Config,
    options: &PipelineOptions,
) -> Result<RunStats> {
    let mut stats = RunStats::default();
    if sources.is_empty() {
        warn!("No sources to process");
        return Ok(stats);
    }

    info!("🚀 Starting ingest run ({} sources)", sources.len());
    println!("🚀 Starting ingest run ({} sources)", sources.len());

    // Shared by every source in the run: the type catalog and a snapshot of
    // stored events inside the window.
    let types = storage.event_types().await?;
    let mut type_ids: HashMap<String, Uuid> = HashMap::new();
    for event_type in &types {
        type_ids.insert(event_type.slug.clone(), event_type.id);
    }
    let Some(other_type_id) = type_ids.get("other").copied() else {
        return Err(IngestError::Config(
            "event type catalog is missing the 'other' fallback".to_string(),
        ));
    };

    let today = Utc::now().date_naive();
    let snapshot_start = options
        .range_start
        .unwrap_or_else(|| today - chrono::Duration::days(config.pipeline.snapshot_past_days));
    let snapshot_end = options
        .range_end
        .unwrap_or_else(|| today + chrono::Duration::days(config.pipeline.snapshot_future_days));
    let snapshot = storage.events_in_range(snapshot_start, snapshot_end).await?;
    info!(
        "Loaded {} existing events between {} and {}",
        snapshot.len(),
        snapshot_start,
        snapshot_end
    );

    let mut ledger = SlugLedger {
        existing_slugs: snapshot.iter().map(|e| e.slug.clone()).collect(),
        slug_by_conflict_key: snapshot
            .iter()
            .map(|e| ((e.source_url.clone(), e.start_date), e.slug.clone()))
            .collect(),
    };

    let ctx = RunContext {
        params: FetchParams {
            limit: options
                .limit_per_source
                .unwrap_or(config.pipeline.limit_per_source),
            range_start: options.range_start,
            range_end: options.range_end,
        },
        default_timeout_secs: config.pipeline.fetch_timeout_secs,
        dry_run: options.dry_run,
        job_id: options.job_id.clone(),
        type_ids: &type_ids,
        other_type_id,
        target_year: options
            .range_start
            .map(|d| d.year())
            .unwrap_or_else(|| today.year()),
    };

    for resolved in sources {
        let key = resolved.config.key.clone();

        let lock = source_lock(&key);
        let _guard = lock.lock().await;

        let mut job = ScrapeJob::started("event-scrape", &key);
        job.payload = json!({
            "kind": "event-scrape",
            "source_id": key,
            "range_start": options.range_start.map(|d| d.to_string()),
            "range_end": options.range_end.map(|d| d.to_string()),
            "limit": ctx.params.limit,
        });
        if let Err(e) = storage.create_scrape_job(&mut job).await {
            error!("Could not create scrape job for {}: {}", key, e);
            stats.errors.push(format!("{key}: {e}"));
            stats.sources_failed += 1;
            continue;
        }
        let job_uuid = job.id.unwrap_or_else(Uuid::new_v4);

        counter!("ingest_source_runs_total", "source" => key.clone()).increment(1);
        let t_source = std::time::Instant::now();

        match scrape_source(&storage, &resolved, &ctx, &snapshot, &mut ledger, job_uuid).await {
            Ok(summary) => {
                stats.total_discovered += summary.discovered;
                stats.total_unique += summary.unique;
                stats.total_inserted += summary.written;
                stats.sources_processed += 1;
                for item_error in &summary.item_errors {
                    stats.errors.push(format!("{key}: {item_error}"));
                }
                job.complete(summary.payload);
                if let Err(e) = storage.update_scrape_job(&job).await {
                    warn!("Could not update scrape job for {}: {}", key, e);
                }
            }
            Err(e) => {
                error!("Scrape failed for {}: {}", key, e);
                println!("❌ Scrape failed for {key}: {e}");
                counter!("ingest_source_failures_total", "source" => key.clone()).increment(1);
                stats.errors.push(format!("{key}: {e}"));
                stats.sources_failed += 1;
                job.fail(e.to_string());
                if let Err(update_err) = storage.update_scrape_job(&job).await {
                    warn!("Could not update scrape job for {}: {}", key, update_err);
                }
            }
        }

        histogram!("ingest_source_duration_seconds", "source" => key.clone())
            .record(t_source.elapsed().as_secs_f64());
    }

    info!(
        "🏁 Run finished: {} discovered, {} unique, {} written, {} sources ok, {} failed",
        stats.total_discovered,
        stats.total_unique,
        stats.total_inserted,
        stats.sources_processed,
        stats.sources_failed
    );
    Ok(stats)
}

/// One source end to end: fetch, validate, dedupe, build, write. Any `Err`
/// marks the job failed; per-item problems ride along in the summary.
#[instrument(skip_all, fields(source = %resolved.config.key))]
async fn scrape_source(
    storage: &Arc<dyn Storage>,
    resolved: &ResolvedSource,
    ctx: &RunContext<'_>,
    snapshot: &[ExistingEvent],
    ledger: &mut SlugLedger,
    job_uuid: Uuid,
) -> Result<SourceSummary> {
    let source = &resolved.config;
    let Some(adapter) = resolved.adapter.as_ref() else {
        return Err(IngestError::adapter(format!(
            "no adapter registered for '{}'",
            source.adapter
        )));
    };

    info!("📡 Fetching events from {}...", source.name);
    println!("📡 Fetching events from {}...", source.name);
    let fetch_timeout = Duration::from_secs(source.timeout_secs.unwrap_or(ctx.default_timeout_secs));
    let t_fetch = std::time::Instant::now();
    let outcome = match timeout(fetch_timeout, adapter.fetch(&ctx.params)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(IngestError::adapter(format!(
                "fetch timed out after {}s",
                fetch_timeout.as_secs()
            )))
        }
    };
    histogram!("ingest_fetch_duration_seconds", "source" => source.key.clone())
        .record(t_fetch.elapsed().as_secs_f64());

    let discovered = outcome.events.len();
    let mut item_errors = outcome.errors;
    info!(
        "✅ Fetched {} raw events ({} item errors)",
        discovered,
        item_errors.len()
    );

    let mut valid = Vec::with_capacity(discovered);
    for event in outcome.events {
        if !event.has_schedule() || !event.has_identity() {
            warn!(
                source = %source.key,
                event = %event.name,
                "dropping event without schedule or identity"
            );
            item_errors.push(format!(
                "'{}' dropped: missing schedule or identity",
                event.name
            ));
            continue;
        }
        valid.push(event);
    }

    let batch = dedup::dedupe_batch(valid);
    let unique = batch.unique.len();
    if discovered > unique {
        info!("🧹 Collapsed {} within-batch duplicates", discovered - unique);
    }

    let matches = dedup::match_existing(&batch.unique, snapshot);
    let by_key = matches.iter().filter(|m| m.by_conflict_key).count();
    info!(
        "🔍 {} of {} unique events match stored rows ({} by link, {} fuzzy)",
        matches.len(),
        unique,
        by_key,
        matches.len() - by_key
    );
    counter!("ingest_existing_matches_total", "source" => source.key.clone())
        .increment(matches.len() as u64);

    let built = {
        let build_ctx = BuildContext {
            source,
            type_ids: ctx.type_ids,
            other_type_id: ctx.other_type_id,
            existing_slugs: &ledger.existing_slugs,
            slug_by_conflict_key: &ledger.slug_by_conflict_key,
            verified_at: Utc::now(),
            scrape_job_id: job_uuid,
            target_year: ctx.target_year,
            range_start: ctx.params.range_start,
            range_end: ctx.params.range_end,
        };
        builder::build_rows(batch.unique, &build_ctx)
    };
    ledger.absorb(&built.rows);
    item_errors.extend(built.skipped.iter().cloned());

    let written = if ctx.dry_run {
        info!(
            "💧 Dry run: {} rows staged for '{}', nothing written",
            built.rows.len(),
            source.key
        );
        println!(
            "💧 Dry run: {} rows staged for '{}', nothing written",
            built.rows.len(),
            source.key
        );
        built.rows.len()
    } else {
        let count = storage.upsert_events(&built.rows).await?;
        counter!("ingest_events_upserted_total", "source" => source.key.clone())
            .increment(count as u64);
        info!("💾 Upserted {} rows for '{}'", count, source.key);
        println!("💾 Upserted {} rows for '{}'", count, source.key);
        count
    };

    let mut payload = json!({
        "kind": "event-scrape",
        "source_id": source.key,
        "source_name": source.name,
        "discovered": discovered,
        "deduplicated": unique,
        "existing_matches": matches.len(),
        "skipped": built.skipped.len(),
        "item_errors": item_errors.len(),
        "finished_at": Utc::now().to_rfc3339(),
    });
    if ctx.dry_run {
        payload["dry_run"] = json!(true);
        payload["would_upsert"] = json!(written);
    } else {
        payload["upserted"] = json!(written);
    }
    if let Some(job_id) = &ctx.job_id {
        payload["job_id"] = json!(job_id);
    }

    Ok(SourceSummary {
        discovered,
        unique,
        written,
        payload,
        item_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_lock_per_source_name() {
        let first = source_lock("lock-test-alpha");
        let again = source_lock("lock-test-alpha");
        let other = source_lock("lock-test-beta");
        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[tokio::test]
    async fn a_held_source_lock_blocks_until_released() {
        let lock = source_lock("lock-test-waiter");
        let guard = lock.lock().await;
        assert!(lock.try_lock().is_err());

        drop(guard);
        assert!(lock.try_lock().is_ok());
    }
}
