use crate::domain::EventScope;
use crate::error::Result;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Normalized event as emitted by a source adapter, before dedup and
/// canonicalization. Field availability varies widely by upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEvent {
    pub name: String,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub start_date: Option<NaiveDate>,
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
    /// Event type slug suggested by the adapter; unresolvable hints fall
    /// back to the catch-all type downstream.
    pub event_type_hint: Option<String>,
    pub is_free: Option<bool>,
    pub cost_text: Option<String>,
    pub registration_url: Option<String>,
    pub image_url: Option<String>,
    /// Human-authored schedule text for recurring series, e.g.
    /// "1st Saturday monthly (Apr-Oct)". Present instead of `start_date`.
    pub recurrence: Option<String>,
    pub scope_hint: Option<EventScope>,
    pub source_name: String,
}

impl RawEvent {
    /// The upsert conflict key. Only events carrying both halves can be
    /// persisted; recurrence-bearing events gain concrete dates when the
    /// row builder expands them.
    pub fn conflict_key(&self) -> Option<(String, NaiveDate)> {
        match (&self.source_url, self.start_date) {
            (Some(url), Some(date)) if !url.is_empty() => Some((url.clone(), date)),
            _ => None,
        }
    }

    /// Whether the event carries something the pipeline can schedule from.
    pub fn has_schedule(&self) -> bool {
        self.start_date.is_some() || self.recurrence.as_deref().is_some_and(|r| !r.is_empty())
    }

    /// Whether the event can be identified, either by canonical link or by
    /// name + city for fuzzy matching.
    pub fn has_identity(&self) -> bool {
        self.source_url.as_deref().is_some_and(|u| !u.is_empty())
            || (!self.name.trim().is_empty() && !self.city.trim().is_empty())
    }

    /// Count of populated optional fields; used to pick the richest
    /// duplicate as group representative.
    pub fn richness(&self) -> usize {
        [
            self.description.is_some(),
            self.source_url.is_some(),
            self.end_date.is_some(),
            self.start_time.is_some(),
            self.end_time.is_some(),
            self.venue_name.is_some(),
            self.address.is_some(),
            self.state.is_some(),
            self.country.is_some(),
            self.latitude.is_some(),
            self.longitude.is_some(),
            self.event_type_hint.is_some(),
            self.is_free.is_some(),
            self.cost_text.is_some(),
            self.registration_url.is_some(),
            self.image_url.is_some(),
        ]
        .iter()
        .filter(|populated| **populated)
        .count()
    }
}

/// Windowing and volume hints passed to every adapter fetch.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchParams {
    /// Upper bound on events returned, not an exact count.
    pub limit: usize,
    pub range_start: Option<NaiveDate>,
    pub range_end: Option<NaiveDate>,
}

impl FetchParams {
    pub fn contains(&self, date: NaiveDate) -> bool {
        if let Some(start) = self.range_start {
            if date < start {
                return false;
            }
        }
        if let Some(end) = self.range_end {
            if date > end {
                return false;
            }
        }
        true
    }
}

/// A completed fetch: the events that parsed plus per-item failures.
/// Item-level problems never abort a fetch.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub events: Vec<RawEvent>,
    pub errors: Vec<String>,
}

/// Core trait that all event data sources must implement.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    /// Identity of this source instance, as configured.
    fn source_name(&self) -> &str;

    /// Fetch events from the upstream. `Err` is reserved for source-fatal
    /// conditions (missing credentials, unreachable endpoint); per-item
    /// parse failures go into `FetchOutcome::errors` instead.
    async fn fetch(&self, params: &FetchParams) -> Result<FetchOutcome>;
}
