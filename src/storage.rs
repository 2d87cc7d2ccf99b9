use crate::domain::{EventRow, EventType, ExistingEvent, ScrapeJob};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Seed taxonomy; the database migration inserts the same set.
pub const DEFAULT_EVENT_TYPES: &[(&str, &str)] = &[
    ("car-show", "Car Show"),
    ("cars-and-coffee", "Cars & Coffee"),
    ("track-day", "Track Day"),
    ("autocross", "Autocross"),
    ("cruise-in", "Cruise-In"),
    ("swap-meet", "Swap Meet"),
    ("rally", "Rally"),
    ("concours", "Concours"),
    ("meet", "Meet"),
    ("other", "Other"),
];

/// Storage trait for the canonical event store and the scrape-job audit log.
#[async_trait]
pub trait Storage: Send + Sync {
    // Event type lookup
    async fn event_types(&self) -> Result<Vec<EventType>>;

    // Event operations
    async fn events_in_range(&self, start: NaiveDate, end: NaiveDate)
        -> Result<Vec<ExistingEvent>>;

    /// Upserts rows on the (source_url, start_date) conflict key. A stored
    /// row keeps its id, slug and created_at; everything else refreshes.
    async fn upsert_events(&self, rows: &[EventRow]) -> Result<usize>;

    // Scrape job operations
    async fn create_scrape_job(&self, job: &mut ScrapeJob) -> Result<()>;
    async fn update_scrape_job(&self, job: &ScrapeJob) -> Result<()>;
    async fn recent_scrape_jobs(&self, limit: usize) -> Result<Vec<ScrapeJob>>;
}

struct StoredEvent {
    id: Uuid,
    row: EventRow,
}

/// In-memory storage implementation for development/testing
pub struct InMemoryStorage {
    event_types: Vec<EventType>,
    events: Arc<Mutex<HashMap<(String, NaiveDate), StoredEvent>>>,
    jobs: Arc<Mutex<HashMap<Uuid, ScrapeJob>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        let event_types = DEFAULT_EVENT_TYPES
            .iter()
            .map(|(slug, name)| EventType {
                id: Uuid::new_v4(),
                slug: slug.to_string(),
                name: name.to_string(),
            })
            .collect();
        Self {
            event_types,
            events: Arc::new(Mutex::new(HashMap::new())),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn event_types(&self) -> Result<Vec<EventType>> {
        Ok(self.event_types.clone())
    }

    async fn events_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExistingEvent>> {
        let events = self.events.lock().unwrap();
        let mut existing: Vec<ExistingEvent> = events
            .values()
            .filter(|stored| stored.row.start_date >= start && stored.row.start_date <= end)
            .map(|stored| ExistingEvent {
                id: stored.id,
                slug: stored.row.slug.clone(),
                name: stored.row.name.clone(),
                source_url: stored.row.source_url.clone(),
                start_date: stored.row.start_date,
                city: Some(stored.row.city.clone()),
                state: stored.row.state.clone(),
            })
            .collect();
        existing.sort_by_key(|e| e.start_date);
        Ok(existing)
    }

    async fn upsert_events(&self, rows: &[EventRow]) -> Result<usize> {
        let mut events = self.events.lock().unwrap();
        for row in rows {
            let key = row.conflict_key();
            match events.get_mut(&key) {
                Some(stored) => {
                    let slug = stored.row.slug.clone();
                    stored.row = row.clone();
                    stored.row.slug = slug;
                }
                None => {
                    events.insert(
                        key,
                        StoredEvent {
                            id: Uuid::new_v4(),
                            row: row.clone(),
                        },
                    );
                }
            }
        }
        debug!("Upserted {} events", rows.len());
        Ok(rows.len())
    }

    async fn create_scrape_job(&self, job: &mut ScrapeJob) -> Result<()> {
        let id = Uuid::new_v4();
        job.id = Some(id);

        let mut jobs = self.jobs.lock().unwrap();
        jobs.insert(id, job.clone());

        debug!("Created scrape job for {} with id {}", job.source_key, id);
        Ok(())
    }

    async fn update_scrape_job(&self, job: &ScrapeJob) -> Result<()> {
        let job_id = job.id.ok_or_else(|| {
            IngestError::database("Cannot update scrape job without ID")
        })?;

        let mut jobs = self.jobs.lock().unwrap();
        jobs.insert(job_id, job.clone());

        debug!("Updated scrape job {} to {}", job_id, job.status.as_str());
        Ok(())
    }

    async fn recent_scrape_jobs(&self, limit: usize) -> Result<Vec<ScrapeJob>> {
        let jobs = self.jobs.lock().unwrap();
        let mut all: Vec<ScrapeJob> = jobs.values().cloned().collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all.truncate(limit);
        Ok(all)
    }
}
