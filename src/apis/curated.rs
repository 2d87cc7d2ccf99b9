use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::config::SourceConfig;
use crate::domain::EventScope;
use crate::error::{IngestError, Result};
use crate::types::{EventSource, FetchOutcome, FetchParams, RawEvent};

/// Hand-maintained event list. Covers the long tail of club meets and
/// cruise-ins that have a Facebook post instead of an API; most entries
/// carry a recurrence descriptor rather than a concrete date.
pub struct CuratedSource {
    key: String,
    data_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CuratedFile {
    #[serde(default)]
    events: Vec<CuratedEntry>,
}

#[derive(Debug, Deserialize)]
struct CuratedEntry {
    name: String,
    description: Option<String>,
    source_url: Option<String>,
    /// ISO date string, kept as text so a typo fails the entry, not the file.
    date: Option<String>,
    recurrence: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    venue: Option<String>,
    address: Option<String>,
    #[serde(default)]
    city: String,
    state: Option<String>,
    event_type: Option<String>,
    free: Option<bool>,
    cost: Option<String>,
    registration_url: Option<String>,
    scope: Option<EventScope>,
}

impl CuratedSource {
    pub fn new(source: &SourceConfig) -> Self {
        Self {
            key: source.key.clone(),
            data_file: source.data_file.clone(),
        }
    }

    fn build_outcome(&self, file: CuratedFile, params: &FetchParams) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        for entry in file.events {
            if outcome.events.len() >= params.limit {
                break;
            }
            let start_date = match entry.date.as_deref() {
                Some(raw) => match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
                    Ok(date) => Some(date),
                    Err(_) => {
                        outcome.errors.push(format!(
                            "'{}' has unparseable date '{}'",
                            entry.name, raw
                        ));
                        continue;
                    }
                },
                None => None,
            };
            if start_date.is_none() && entry.recurrence.is_none() {
                outcome.errors.push(format!(
                    "'{}' has neither a date nor a recurrence",
                    entry.name
                ));
                continue;
            }
            // Concrete dates respect the run window; recurrence entries are
            // expanded downstream against the same window.
            if let Some(date) = start_date {
                if !params.contains(date) {
                    continue;
                }
            }
            outcome.events.push(self.to_raw_event(entry, start_date));
        }
        outcome
    }

    fn to_raw_event(&self, entry: CuratedEntry, start_date: Option<NaiveDate>) -> RawEvent {
        RawEvent {
            name: entry.name,
            description: entry.description,
            source_url: entry.source_url,
            start_date,
            start_time: entry.start_time.as_deref().and_then(parse_clock),
            end_time: entry.end_time.as_deref().and_then(parse_clock),
            venue_name: entry.venue,
            address: entry.address,
            city: entry.city,
            state: entry.state,
            event_type_hint: entry.event_type,
            is_free: entry.free,
            cost_text: entry.cost,
            registration_url: entry.registration_url,
            recurrence: entry.recurrence,
            scope_hint: entry.scope,
            source_name: self.key.clone(),
            ..Default::default()
        }
    }
}

fn parse_clock(value: &str) -> Option<NaiveTime> {
    let trimmed = value.trim();
    let parsed = NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%I:%M %p"));
    match parsed {
        Ok(time) => Some(time),
        Err(_) => {
            warn!("Ignoring unparseable time '{}'", trimmed);
            None
        }
    }
}

#[async_trait::async_trait]
impl EventSource for CuratedSource {
    fn source_name(&self) -> &str {
        &self.key
    }

    #[instrument(skip(self, params))]
    async fn fetch(&self, params: &FetchParams) -> Result<FetchOutcome> {
        let Some(path) = self.data_file.as_deref() else {
            return Err(IngestError::adapter(format!(
                "no data_file configured for curated source '{}'",
                self.key
            )));
        };

        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            IngestError::adapter(format!("cannot read curated file '{path}': {e}"))
        })?;
        let file: CuratedFile = toml::from_str(&text)?;

        let outcome = self.build_outcome(file, params);
        info!(
            "Loaded {} curated events from {} ({} entry errors)",
            outcome.events.len(),
            path,
            outcome.errors.len()
        );
        Ok(outcome)
    }
}
