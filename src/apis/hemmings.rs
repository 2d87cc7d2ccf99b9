use scraper::{Html, Selector};
use tracing::{info, instrument};

use crate::config::{HttpConfig, SourceConfig};
use crate::error::Result;
use crate::types::{EventSource, FetchOutcome, FetchParams, RawEvent};

const DEFAULT_ENDPOINT: &str = "https://www.hemmings.com/calendar";
const BASE_URL: &str = "https://www.hemmings.com";

const DATE_FORMATS: &[&str] = &["%B %d, %Y", "%b %d, %Y", "%m/%d/%Y"];

/// Hemmings events calendar crawler. Server-rendered listing pages, one
/// card per event; covers the collector side of the catalog (shows, swap
/// meets, concours, cruise-ins).
pub struct HemmingsCrawler {
    client: reqwest::Client,
    key: String,
    endpoint: String,
}

impl HemmingsCrawler {
    pub fn new(source: &SourceConfig, http: &HttpConfig) -> Self {
        Self {
            client: super::build_client(http),
            key: source.key.clone(),
            endpoint: source
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
        }
    }

    fn parse_document(&self, html: &str, params: &FetchParams) -> FetchOutcome {
        let document = Html::parse_document(html);
        let card_sel = Selector::parse("div.event-card").unwrap();
        let title_sel = Selector::parse("h3.event-card__title a").unwrap();
        let date_sel = Selector::parse("span.event-card__date").unwrap();
        let location_sel = Selector::parse("span.event-card__location").unwrap();
        let summary_sel = Selector::parse("p.event-card__summary").unwrap();

        let mut outcome = FetchOutcome::default();
        for card in document.select(&card_sel) {
            if outcome.events.len() >= params.limit {
                break;
            }

            let Some(title_el) = card.select(&title_sel).next() else {
                outcome
                    .errors
                    .push("event card without a title link".to_string());
                continue;
            };
            let name = title_el.text().collect::<String>().trim().to_string();
            let source_url = title_el.value().attr("href").map(absolute_url);

            let date_text = card
                .select(&date_sel)
                .next()
                .map(|el| el.text().collect::<String>())
                .unwrap_or_default();
            let Some(start_date) = parse_card_date(&date_text) else {
                outcome.errors.push(format!(
                    "could not parse date '{}' for '{}'",
                    date_text.trim(),
                    name
                ));
                continue;
            };
            if !params.contains(start_date) {
                continue;
            }

            let location_text = card
                .select(&location_sel)
                .next()
                .map(|el| el.text().collect::<String>())
                .unwrap_or_default();
            let (city, state) = split_location(&location_text);

            let description = card
                .select(&summary_sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|text| !text.is_empty());

            outcome.events.push(RawEvent {
                name: name.clone(),
                description,
                source_url,
                start_date: Some(start_date),
                city,
                state,
                event_type_hint: infer_type(&name),
                source_name: self.key.clone(),
                ..Default::default()
            });
        }
        outcome
    }
}

fn absolute_url(href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{}{}", BASE_URL, href)
    }
}

fn parse_card_date(text: &str) -> Option<chrono::NaiveDate> {
    let cleaned = text.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(cleaned, format) {
            return Some(date);
        }
    }
    None
}

/// Splits a "City, ST" tail. Anything that does not end in a two-letter
/// code keeps the whole text as the city.
fn split_location(text: &str) -> (String, Option<String>) {
    let cleaned = text.trim();
    if let Some((city, state)) = cleaned.rsplit_once(',') {
        let state = state.trim();
        if state.len() == 2 && state.chars().all(|c| c.is_ascii_alphabetic()) {
            return (city.trim().to_string(), Some(state.to_uppercase()));
        }
    }
    (cleaned.to_string(), None)
}

fn infer_type(title: &str) -> Option<String> {
    let lower = title.to_lowercase();
    let slug = if lower.contains("swap") {
        "swap-meet"
    } else if lower.contains("cars & coffee") || lower.contains("cars and coffee") {
        "cars-and-coffee"
    } else if lower.contains("concours") {
        "concours"
    } else if lower.contains("cruise") {
        "cruise-in"
    } else if lower.contains("show") {
        "car-show"
    } else {
        return None;
    };
    Some(slug.to_string())
}

#[async_trait::async_trait]
impl EventSource for HemmingsCrawler {
    fn source_name(&self) -> &str {
        &self.key
    }

    #[instrument(skip(self, params))]
    async fn fetch(&self, params: &FetchParams) -> Result<FetchOutcome> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?;
        let html = response.text().await?;

        let outcome = self.parse_document(&html, params);
        info!(
            "Fetched {} events from Hemmings ({} item errors)",
            outcome.events.len(),
            outcome.errors.len()
        );
        Ok(outcome)
    }
}
