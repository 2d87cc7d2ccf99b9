use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::config::{HttpConfig, SourceConfig};
use crate::error::{IngestError, Result};
use crate::types::{EventSource, FetchOutcome, FetchParams, RawEvent};

const DEFAULT_ENDPOINT: &str = "https://api.motorsportreg.com/rest/calendars.json";
const DEFAULT_PAGE_SIZE: usize = 50;
const DEFAULT_DELAY_MS: u64 = 750;

/// MotorsportReg calendar API: paginated JSON, API key from the environment.
/// Covers the motorsport side of the catalog (track days, autocross, rally).
pub struct MotorsportRegApi {
    client: reqwest::Client,
    key: String,
    endpoint: String,
    api_key_env: Option<String>,
    page_size: usize,
    delay_ms: u64,
}

impl MotorsportRegApi {
    pub fn new(source: &SourceConfig, http: &HttpConfig) -> Self {
        Self {
            client: super::build_client(http),
            key: source.key.clone(),
            endpoint: source
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_key_env: source.api_key_env.clone(),
            page_size: source.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            delay_ms: source.delay_ms.unwrap_or(DEFAULT_DELAY_MS),
        }
    }

    fn parse_event(&self, item: &Value) -> Result<RawEvent> {
        let name = item["name"]
            .as_str()
            .ok_or_else(|| IngestError::MissingField("name not found".into()))?;
        let url = item["url"]
            .as_str()
            .ok_or_else(|| IngestError::MissingField("url not found".into()))?;
        let start_str = item["start"]
            .as_str()
            .ok_or_else(|| IngestError::MissingField("start not found".into()))?;
        let start_date = chrono::NaiveDate::parse_from_str(start_str, "%Y-%m-%d")
            .map_err(|e| IngestError::adapter(format!("Failed to parse start date: {e}")))?;
        let end_date = item["end"]
            .as_str()
            .and_then(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .filter(|end| *end != start_date);

        let venue = &item["venue"];
        let city = venue["city"].as_str().unwrap_or("").to_string();

        Ok(RawEvent {
            name: name.to_string(),
            description: item["description"].as_str().map(str::to_string),
            source_url: Some(url.to_string()),
            start_date: Some(start_date),
            end_date,
            venue_name: venue["name"].as_str().map(str::to_string),
            city,
            state: venue["region"].as_str().map(str::to_string),
            country: venue["country"].as_str().map(str::to_string),
            latitude: venue["latitude"].as_f64(),
            longitude: venue["longitude"].as_f64(),
            event_type_hint: item["type"].as_str().and_then(map_category),
            registration_url: item["registration_url"].as_str().map(str::to_string),
            source_name: self.key.clone(),
            ..Default::default()
        })
    }
}

/// Maps MotorsportReg sanctioning categories onto catalog type slugs.
/// Unknown categories return None and resolve to the catch-all type later.
fn map_category(category: &str) -> Option<String> {
    let lower = category.to_lowercase();
    let slug = if lower.contains("track") || lower.contains("hpde") || lower.contains("lapping") {
        "track-day"
    } else if lower.contains("autocross") || lower.contains("solo") || lower.contains("autox") {
        "autocross"
    } else if lower.contains("rally") {
        "rally"
    } else if lower.contains("concours") {
        "concours"
    } else if lower.contains("show") {
        "car-show"
    } else if lower.contains("swap") {
        "swap-meet"
    } else {
        return None;
    };
    Some(slug.to_string())
}

#[async_trait::async_trait]
impl EventSource for MotorsportRegApi {
    fn source_name(&self) -> &str {
        &self.key
    }

    #[instrument(skip(self, params))]
    async fn fetch(&self, params: &FetchParams) -> Result<FetchOutcome> {
        let env_name = self
            .api_key_env
            .as_deref()
            .ok_or_else(|| IngestError::adapter("no api_key_env configured for MotorsportReg"))?;
        let api_key = std::env::var(env_name).map_err(|_| {
            IngestError::adapter(format!("{env_name} is not set; cannot authenticate"))
        })?;

        let mut outcome = FetchOutcome::default();
        let mut page = 1usize;
        loop {
            let mut request = self
                .client
                .get(&self.endpoint)
                .bearer_auth(&api_key)
                .query(&[
                    ("page", page.to_string()),
                    ("pageSize", self.page_size.to_string()),
                ]);
            if let Some(start) = params.range_start {
                request = request.query(&[("start", start.to_string())]);
            }
            if let Some(end) = params.range_end {
                request = request.query(&[("end", end.to_string())]);
            }

            let response = request.send().await?.error_for_status()?;
            let data: Value = response.json().await?;
            let items = data["events"]
                .as_array()
                .ok_or_else(|| IngestError::MissingField("events array not found".into()))?;
            debug!("Page {} returned {} items", page, items.len());

            for item in items {
                if outcome.events.len() >= params.limit {
                    break;
                }
                match self.parse_event(item) {
                    Ok(event) => {
                        // the upstream filters by range too; this guards
                        // against servers that ignore the query params
                        let in_window = event.start_date.map_or(true, |d| params.contains(d));
                        if in_window {
                            outcome.events.push(event);
                        }
                    }
                    Err(e) => outcome.errors.push(e.to_string()),
                }
            }

            if items.len() < self.page_size || outcome.events.len() >= params.limit {
                break;
            }
            page += 1;
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        info!(
            "Fetched {} events from MotorsportReg across {} page(s)",
            outcome.events.len(),
            page
        );
        Ok(outcome)
    }
}
