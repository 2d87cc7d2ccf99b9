use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::region::Region;

/// Geographic reach of an event, used by the serving side for ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventScope {
    Local,
    Regional,
    National,
}

impl EventScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventScope::Local => "local",
            EventScope::Regional => "regional",
            EventScope::National => "national",
        }
    }

    pub fn parse(value: &str) -> Option<EventScope> {
        match value.trim().to_lowercase().as_str() {
            "local" => Some(EventScope::Local),
            "regional" => Some(EventScope::Regional),
            "national" => Some(EventScope::National),
            _ => None,
        }
    }
}

/// Canonical event row, ready for upsert. `(source_url, start_date)` is the
/// unique conflict key; `slug` is globally unique and never rewritten once
/// stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub source_url: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub venue_name: Option<String>,
    pub address: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub event_type_id: Uuid,
    pub region: Option<Region>,
    pub scope: EventScope,
    pub is_free: Option<bool>,
    pub cost_text: Option<String>,
    pub registration_url: Option<String>,
    pub image_url: Option<String>,
    pub source_name: String,
    pub last_verified_at: DateTime<Utc>,
    pub scrape_job_id: Uuid,
}

impl EventRow {
    pub fn conflict_key(&self) -> (String, NaiveDate) {
        (self.source_url.clone(), self.start_date)
    }
}

/// Slice of an already-stored event, loaded once per run for dedup
/// reporting and slug reuse. Never mutated.
#[derive(Debug, Clone)]
pub struct ExistingEvent {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub source_url: String,
    pub start_date: NaiveDate,
    pub city: Option<String>,
    pub state: Option<String>,
}

/// Row of the event type lookup table.
#[derive(Debug, Clone)]
pub struct EventType {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<JobStatus> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Audit-log record for one source within a pipeline invocation. Written in
/// `running` state right before the fetch, then updated exactly once to
/// `completed` or `failed`. Consumed by operational tooling; never retried
/// automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: Option<Uuid>,
    pub job_type: String,
    pub status: JobStatus,
    pub source_key: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
    pub error_message: Option<String>,
}

impl ScrapeJob {
    pub fn started(job_type: &str, source_key: &str) -> Self {
        Self {
            id: None,
            job_type: job_type.to_string(),
            status: JobStatus::Running,
            source_key: source_key.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            payload: serde_json::Value::Null,
            error_message: None,
        }
    }

    pub fn complete(&mut self, payload: serde_json::Value) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.payload = payload;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(message.into());
    }
}

/// Aggregated totals for one pipeline invocation.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunStats {
    pub total_discovered: usize,
    pub total_unique: usize,
    pub total_inserted: usize,
    pub sources_processed: usize,
    pub sources_failed: usize,
    pub errors: Vec<String>,
}
