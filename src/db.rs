use crate::domain::{
    EventRow, EventType, ExistingEvent, JobStatus, ScrapeJob,
};
use crate::error::{IngestError, Result};
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use libsql::{Builder, Connection, Database};
use std::env;
use tracing::info;
use uuid::Uuid;

const UPSERT_EVENT_SQL: &str = "\
INSERT INTO events (
    id, slug, name, description, source_url, start_date, end_date,
    start_time, end_time, venue_name, address, city, state, country,
    latitude, longitude, event_type_id, region, scope, is_free, cost_text,
    registration_url, image_url, source_name, last_verified_at,
    scrape_job_id, created_at, updated_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'), datetime('now'))
ON CONFLICT(source_url, start_date) DO UPDATE SET
    name = excluded.name,
    description = excluded.description,
    end_date = excluded.end_date,
    start_time = excluded.start_time,
    end_time = excluded.end_time,
    venue_name = excluded.venue_name,
    address = excluded.address,
    city = excluded.city,
    state = excluded.state,
    country = excluded.country,
    latitude = excluded.latitude,
    longitude = excluded.longitude,
    event_type_id = excluded.event_type_id,
    region = excluded.region,
    scope = excluded.scope,
    is_free = excluded.is_free,
    cost_text = excluded.cost_text,
    registration_url = excluded.registration_url,
    image_url = excluded.image_url,
    source_name = excluded.source_name,
    last_verified_at = excluded.last_verified_at,
    scrape_job_id = excluded.scrape_job_id,
    updated_at = datetime('now')";

/// Turso/libSQL-backed storage. Fields refresh on the conflict key while
/// id, slug and created_at stay untouched, so links into the serving side
/// survive re-ingests.
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    /// Connect to Turso using LIBSQL_URL / LIBSQL_AUTH_TOKEN
    pub async fn connect() -> Result<Self> {
        let url = env::var("LIBSQL_URL").map_err(|_| IngestError::Database {
            message: "LIBSQL_URL environment variable not set".to_string(),
        })?;

        let auth_token = env::var("LIBSQL_AUTH_TOKEN").map_err(|_| IngestError::Database {
            message: "LIBSQL_AUTH_TOKEN environment variable not set".to_string(),
        })?;

        info!("Connecting to Turso database at {}", url);

        let db = Builder::new_remote(url, auth_token)
            .build()
            .await
            .map_err(|e| IngestError::Database {
                message: format!("Failed to connect to database: {e}"),
            })?;

        Ok(Self { db })
    }

    async fn get_connection(&self) -> Result<Connection> {
        self.db.connect().map_err(|e| IngestError::Database {
            message: format!("Failed to get database connection: {e}"),
        })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");

        let conn = self.get_connection().await?;
        let migration_sql = include_str!("../migrations/001_create_events_schema.sql");

        conn.execute_batch(migration_sql)
            .await
            .map_err(|e| IngestError::Database {
                message: format!("Failed to run migrations: {e}"),
            })?;

        info!("Database migrations completed successfully");
        Ok(())
    }
}

#[async_trait]
impl Storage for DatabaseStorage {
    async fn event_types(&self) -> Result<Vec<EventType>> {
        let conn = self.get_connection().await?;

        let mut rows = conn
            .query("SELECT id, slug, name FROM event_types", libsql::params![])
            .await
            .map_err(|e| IngestError::Database {
                message: format!("Failed to query event types: {e}"),
            })?;

        let mut types = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| IngestError::Database {
            message: format!("Failed to read row: {e}"),
        })? {
            let id: String = row.get(0).map_err(|e| IngestError::Database {
                message: format!("Failed to get id: {e}"),
            })?;
            let slug: String = row.get(1).map_err(|e| IngestError::Database {
                message: format!("Failed to get slug: {e}"),
            })?;
            let name: String = row.get(2).map_err(|e| IngestError::Database {
                message: format!("Failed to get name: {e}"),
            })?;
            types.push(EventType {
                id: parse_uuid(&id)?,
                slug,
                name,
            });
        }
        Ok(types)
    }

    async fn events_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExistingEvent>> {
        let conn = self.get_connection().await?;

        let mut rows = conn
            .query(
                "SELECT id, slug, name, source_url, start_date, city, state \
                 FROM events WHERE start_date >= ? AND start_date <= ? \
                 ORDER BY start_date",
                libsql::params![start.to_string(), end.to_string()],
            )
            .await
            .map_err(|e| IngestError::Database {
                message: format!("Failed to query events: {e}"),
            })?;

        let mut existing = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| IngestError::Database {
            message: format!("Failed to read row: {e}"),
        })? {
            let id: String = row.get(0).map_err(|e| IngestError::Database {
                message: format!("Failed to get id: {e}"),
            })?;
            let slug: String = row.get(1).map_err(|e| IngestError::Database {
                message: format!("Failed to get slug: {e}"),
            })?;
            let name: String = row.get(2).map_err(|e| IngestError::Database {
                message: format!("Failed to get name: {e}"),
            })?;
            let source_url: String = row.get(3).map_err(|e| IngestError::Database {
                message: format!("Failed to get source_url: {e}"),
            })?;
            let start_date: String = row.get(4).map_err(|e| IngestError::Database {
                message: format!("Failed to get start_date: {e}"),
            })?;
            let city: Option<String> = row.get(5).ok();
            let state: Option<String> = row.get(6).ok();

            existing.push(ExistingEvent {
                id: parse_uuid(&id)?,
                slug,
                name,
                source_url,
                start_date: parse_date(&start_date)?,
                city,
                state,
            });
        }
        Ok(existing)
    }

    async fn upsert_events(&self, events: &[EventRow]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        let conn = self.get_connection().await?;

        // One transaction per source batch; a failed batch leaves no
        // partial writes behind.
        let tx = conn.transaction().await.map_err(|e| IngestError::Database {
            message: format!("Failed to open transaction: {e}"),
        })?;

        for event in events {
            tx.execute(
                UPSERT_EVENT_SQL,
                libsql::params![
                    Uuid::new_v4().to_string(),
                    event.slug.clone(),
                    event.name.clone(),
                    event.description.clone(),
                    event.source_url.clone(),
                    event.start_date.to_string(),
                    event.end_date.map(|d| d.to_string()),
                    event.start_time.map(format_time),
                    event.end_time.map(format_time),
                    event.venue_name.clone(),
                    event.address.clone(),
                    event.city.clone(),
                    event.state.clone(),
                    event.country.clone(),
                    event.latitude,
                    event.longitude,
                    event.event_type_id.to_string(),
                    event.region.map(|r| r.as_str()),
                    event.scope.as_str(),
                    event.is_free.map(i64::from),
                    event.cost_text.clone(),
                    event.registration_url.clone(),
                    event.image_url.clone(),
                    event.source_name.clone(),
                    event.last_verified_at.to_rfc3339(),
                    event.scrape_job_id.to_string()
                ],
            )
            .await
            .map_err(|e| IngestError::Database {
                message: format!("Failed to upsert event '{}': {e}", event.slug),
            })?;
        }

        tx.commit().await.map_err(|e| IngestError::Database {
            message: format!("Failed to commit upsert batch: {e}"),
        })?;

        Ok(events.len())
    }

    async fn create_scrape_job(&self, job: &mut ScrapeJob) -> Result<()> {
        let id = Uuid::new_v4();
        job.id = Some(id);

        let conn = self.get_connection().await?;
        conn.execute(
            "INSERT INTO scrape_jobs (id, job_type, status, source_key, started_at, completed_at, payload, error_message) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            libsql::params![
                id.to_string(),
                job.job_type.clone(),
                job.status.as_str(),
                job.source_key.clone(),
                job.started_at.to_rfc3339(),
                job.completed_at.map(|t| t.to_rfc3339()),
                serde_json::to_string(&job.payload)?,
                job.error_message.clone()
            ],
        )
        .await
        .map_err(|e| IngestError::Database {
            message: format!("Failed to insert scrape job: {e}"),
        })?;

        Ok(())
    }

    async fn update_scrape_job(&self, job: &ScrapeJob) -> Result<()> {
        let job_id = job.id.ok_or_else(|| {
            IngestError::database("Cannot update scrape job without ID")
        })?;

        let conn = self.get_connection().await?;
        conn.execute(
            "UPDATE scrape_jobs SET status = ?, completed_at = ?, payload = ?, error_message = ? WHERE id = ?",
            libsql::params![
                job.status.as_str(),
                job.completed_at.map(|t| t.to_rfc3339()),
                serde_json::to_string(&job.payload)?,
                job.error_message.clone(),
                job_id.to_string()
            ],
        )
        .await
        .map_err(|e| IngestError::Database {
            message: format!("Failed to update scrape job: {e}"),
        })?;

        Ok(())
    }

    async fn recent_scrape_jobs(&self, limit: usize) -> Result<Vec<ScrapeJob>> {
        let conn = self.get_connection().await?;

        let mut rows = conn
            .query(
                "SELECT id, job_type, status, source_key, started_at, completed_at, payload, error_message \
                 FROM scrape_jobs ORDER BY started_at DESC LIMIT ?",
                libsql::params![limit as i64],
            )
            .await
            .map_err(|e| IngestError::Database {
                message: format!("Failed to query scrape jobs: {e}"),
            })?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| IngestError::Database {
            message: format!("Failed to read row: {e}"),
        })? {
            let id: String = row.get(0).map_err(|e| IngestError::Database {
                message: format!("Failed to get id: {e}"),
            })?;
            let job_type: String = row.get(1).map_err(|e| IngestError::Database {
                message: format!("Failed to get job_type: {e}"),
            })?;
            let status: String = row.get(2).map_err(|e| IngestError::Database {
                message: format!("Failed to get status: {e}"),
            })?;
            let source_key: String = row.get(3).map_err(|e| IngestError::Database {
                message: format!("Failed to get source_key: {e}"),
            })?;
            let started_at: String = row.get(4).map_err(|e| IngestError::Database {
                message: format!("Failed to get started_at: {e}"),
            })?;
            let completed_at: Option<String> = row.get(5).ok();
            let payload: String = row.get(6).map_err(|e| IngestError::Database {
                message: format!("Failed to get payload: {e}"),
            })?;
            let error_message: Option<String> = row.get(7).ok();

            let completed_at = match completed_at {
                Some(ts) => Some(parse_utc(&ts)?),
                None => None,
            };

            jobs.push(ScrapeJob {
                id: Some(parse_uuid(&id)?),
                job_type,
                status: JobStatus::parse(&status).ok_or_else(|| {
                    IngestError::database(format!("unknown job status '{status}'"))
                })?,
                source_key,
                started_at: parse_utc(&started_at)?,
                completed_at,
                payload: serde_json::from_str(&payload)?,
                error_message,
            });
        }
        Ok(jobs)
    }
}

fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| IngestError::Database {
        message: format!("Invalid uuid '{value}': {e}"),
    })
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| IngestError::Database {
        message: format!("Invalid date '{value}': {e}"),
    })
}

fn parse_utc(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| IngestError::Database {
            message: format!("Invalid timestamp '{value}': {e}"),
        })
}
