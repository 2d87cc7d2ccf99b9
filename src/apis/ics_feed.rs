use chrono::{NaiveDate, NaiveTime};
use tracing::{info, instrument};

use crate::config::{HttpConfig, SourceConfig};
use crate::error::{IngestError, Result};
use crate::types::{EventSource, FetchOutcome, FetchParams, RawEvent};

/// Generic iCalendar feed adapter. Car clubs publish Google/Outlook
/// calendar exports; one config row per feed reuses this implementation,
/// so the identity comes from the config key rather than the code.
pub struct IcsFeedSource {
    client: reqwest::Client,
    key: String,
    endpoint: Option<String>,
    default_city: Option<String>,
    default_state: Option<String>,
}

#[derive(Default)]
struct Vevent {
    summary: Option<String>,
    description: Option<String>,
    dtstart: Option<String>,
    dtend: Option<String>,
    location: Option<String>,
    url: Option<String>,
    uid: Option<String>,
}

impl IcsFeedSource {
    pub fn new(source: &SourceConfig, http: &HttpConfig) -> Self {
        Self {
            client: super::build_client(http),
            key: source.key.clone(),
            endpoint: source.endpoint.clone(),
            default_city: source.default_city.clone(),
            default_state: source.default_state.clone(),
        }
    }

    fn parse_calendar(&self, text: &str, params: &FetchParams) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        let mut current: Option<Vevent> = None;

        for line in unfold_lines(text) {
            if line.eq_ignore_ascii_case("BEGIN:VEVENT") {
                current = Some(Vevent::default());
                continue;
            }
            if line.eq_ignore_ascii_case("END:VEVENT") {
                if outcome.events.len() >= params.limit {
                    break;
                }
                if let Some(vevent) = current.take() {
                    match self.build_event(vevent, params) {
                        Ok(Some(event)) => outcome.events.push(event),
                        // outside the requested window
                        Ok(None) => {}
                        Err(message) => outcome.errors.push(message),
                    }
                }
                continue;
            }

            let Some(event) = current.as_mut() else {
                continue;
            };
            let Some((prop, value)) = line.split_once(':') else {
                continue;
            };
            let name = prop.split(';').next().unwrap_or(prop).to_uppercase();
            match name.as_str() {
                "SUMMARY" => event.summary = Some(unescape_text(value)),
                "DESCRIPTION" => event.description = Some(unescape_text(value)),
                "DTSTART" => event.dtstart = Some(value.trim().to_string()),
                "DTEND" => event.dtend = Some(value.trim().to_string()),
                "LOCATION" => event.location = Some(unescape_text(value)),
                "URL" => event.url = Some(value.trim().to_string()),
                "UID" => event.uid = Some(value.trim().to_string()),
                _ => {}
            }
        }
        outcome
    }

    fn build_event(
        &self,
        vevent: Vevent,
        params: &FetchParams,
    ) -> std::result::Result<Option<RawEvent>, String> {
        let Some(summary) = vevent.summary.filter(|s| !s.is_empty()) else {
            return Err("VEVENT missing SUMMARY".to_string());
        };
        let Some(dtstart) = vevent.dtstart else {
            return Err(format!("'{summary}' missing DTSTART"));
        };
        let Some((start_date, start_time)) = parse_ics_datetime(&dtstart) else {
            return Err(format!(
                "'{summary}' has unparseable DTSTART '{dtstart}'"
            ));
        };
        if !params.contains(start_date) {
            return Ok(None);
        }

        let (end_date, end_time) = match vevent.dtend.as_deref().and_then(parse_ics_datetime) {
            Some((date, time)) => (Some(date).filter(|d| *d != start_date), time),
            None => (None, None),
        };

        // Feeds often omit URL; a feed-scoped substitute keeps the event
        // addressable by the conflict key.
        let source_url = vevent.url.or_else(|| {
            match (self.endpoint.as_deref(), vevent.uid.as_deref()) {
                (Some(endpoint), Some(uid)) => Some(format!("{endpoint}#{uid}")),
                _ => None,
            }
        });

        let (venue_name, city, state) = self.locate(vevent.location.as_deref());

        Ok(Some(RawEvent {
            name: summary,
            description: vevent.description,
            source_url,
            start_date: Some(start_date),
            end_date,
            start_time,
            end_time,
            venue_name,
            city,
            state,
            source_name: self.key.clone(),
            ..Default::default()
        }))
    }

    /// Pulls a trailing "City, ST" pair out of an ICS LOCATION, falling back
    /// to the feed's configured home locality.
    fn locate(&self, location: Option<&str>) -> (Option<String>, String, Option<String>) {
        let fallback_city = self.default_city.clone().unwrap_or_default();
        let fallback_state = self.default_state.clone();

        let Some(location) = location.map(str::trim).filter(|l| !l.is_empty()) else {
            return (None, fallback_city, fallback_state);
        };

        let parts: Vec<&str> = location.split(',').map(str::trim).collect();
        let mut idx = parts.len();

        let mut state = None;
        if idx > 0 {
            let token = parts[idx - 1].split_whitespace().next().unwrap_or("");
            if token.len() == 2 && token.chars().all(|c| c.is_ascii_alphabetic()) {
                state = Some(token.to_uppercase());
                idx -= 1;
            }
        }

        let mut city = None;
        if idx > 0 && (state.is_some() || idx >= 2) {
            city = Some(parts[idx - 1].to_string());
            idx -= 1;
        }

        let venue_name = if idx > 0 {
            Some(parts[..idx].join(", "))
        } else {
            None
        };

        (
            venue_name,
            city.unwrap_or(fallback_city),
            state.or(fallback_state),
        )
    }
}

fn unfold_lines(text: &str) -> Vec<String> {
    let mut unfolded: Vec<String> = Vec::new();
    for line in text.lines() {
        if (line.starts_with(' ') || line.starts_with('\t')) && !unfolded.is_empty() {
            if let Some(last) = unfolded.last_mut() {
                last.push_str(&line[1..]);
            }
        } else {
            unfolded.push(line.to_string());
        }
    }
    unfolded
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') | Some('N') => out.push(' '),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out.trim().to_string()
}

/// Accepts `YYYYMMDD` and `YYYYMMDDTHHMMSS[Z]`. Times with a TZID are read
/// as wall-clock; the pipeline stores naive times.
fn parse_ics_datetime(raw: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let digits = raw.trim().trim_end_matches('Z');
    if digits.len() == 8 {
        let date = NaiveDate::parse_from_str(digits, "%Y%m%d").ok()?;
        return Some((date, None));
    }
    if digits.len() >= 15 && digits.as_bytes()[8] == b'T' {
        // untrusted bytes; the offsets may not be char boundaries
        let date = NaiveDate::parse_from_str(digits.get(..8)?, "%Y%m%d").ok()?;
        let time = digits
            .get(9..15)
            .and_then(|t| NaiveTime::parse_from_str(t, "%H%M%S").ok());
        return Some((date, time));
    }
    None
}

#[async_trait::async_trait]
impl EventSource for IcsFeedSource {
    fn source_name(&self) -> &str {
        &self.key
    }

    #[instrument(skip(self, params))]
    async fn fetch(&self, params: &FetchParams) -> Result<FetchOutcome> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Err(IngestError::adapter(format!(
                "no endpoint configured for calendar feed '{}'",
                self.key
            )));
        };

        let response = self
            .client
            .get(endpoint)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;

        let outcome = self.parse_calendar(&body, params);
        info!(
            "Parsed {} events from calendar feed '{}' ({} item errors)",
            outcome.events.len(),
            self.key,
            outcome.errors.len()
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_source() -> IcsFeedSource {
        let source = SourceConfig {
            key: "pnw-cruisers".to_string(),
            name: "PNW Cruisers Calendar".to_string(),
            adapter: "ics_feed".to_string(),
            enabled: true,
            endpoint: Some("https://pnwcruisers.example.com/events.ics".to_string()),
            api_key_env: None,
            delay_ms: None,
            page_size: None,
            timeout_secs: None,
            data_file: None,
            default_city: Some("Tacoma".to_string()),
            default_state: Some("WA".to_string()),
            scope: None,
        };
        IcsFeedSource::new(&source, &HttpConfig::default())
    }

    const FEED: &str = r#"BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//PNW Cruisers//Events//EN
BEGIN:VEVENT
UID:evt-001@pnwcruisers
SUMMARY:Saturday Morning Caffeine and Gaso
 line
DTSTART;VALUE=DATE:20260613
LOCATION:Griot's Garage\, Flagship Store, Tacoma, WA
URL:https://pnwcruisers.example.com/events/caffeine-gasoline
END:VEVENT
BEGIN:VEVENT
UID:evt-002@pnwcruisers
SUMMARY:Spring Tune-Up Cruise
DTSTART:20260418T090000Z
DTEND:20260418T120000Z
DESCRIPTION:Meet at the north lot.\nDeparture at 9:30.
END:VEVENT
BEGIN:VEVENT
UID:evt-003@pnwcruisers
DTSTART;VALUE=DATE:20260704
END:VEVENT
END:VCALENDAR"#;

    #[test]
    fn parses_folded_escaped_and_date_only_events() {
        let params = FetchParams {
            limit: 50,
            ..Default::default()
        };
        let outcome = feed_source().parse_calendar(FEED, &params);

        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        // bare message; the orchestrator prepends the source key
        assert_eq!(outcome.errors[0], "VEVENT missing SUMMARY");

        let first = &outcome.events[0];
        assert_eq!(first.name, "Saturday Morning Caffeine and Gasoline");
        assert_eq!(first.start_date, NaiveDate::from_ymd_opt(2026, 6, 13));
        assert!(first.start_time.is_none());
        assert_eq!(
            first.venue_name.as_deref(),
            Some("Griot's Garage, Flagship Store")
        );
        assert_eq!(first.city, "Tacoma");
        assert_eq!(first.state.as_deref(), Some("WA"));
        assert_eq!(
            first.source_url.as_deref(),
            Some("https://pnwcruisers.example.com/events/caffeine-gasoline")
        );
    }

    #[test]
    fn url_less_events_get_a_feed_scoped_substitute() {
        let params = FetchParams {
            limit: 50,
            ..Default::default()
        };
        let outcome = feed_source().parse_calendar(FEED, &params);

        let cruise = &outcome.events[1];
        assert_eq!(cruise.name, "Spring Tune-Up Cruise");
        assert_eq!(
            cruise.source_url.as_deref(),
            Some("https://pnwcruisers.example.com/events.ics#evt-002@pnwcruisers")
        );
        assert_eq!(cruise.start_date, NaiveDate::from_ymd_opt(2026, 4, 18));
        assert_eq!(cruise.start_time, NaiveTime::from_hms_opt(9, 0, 0));
        assert_eq!(cruise.end_time, NaiveTime::from_hms_opt(12, 0, 0));
        assert!(cruise.end_date.is_none());
        // no LOCATION, so the feed's home locality fills in
        assert_eq!(cruise.city, "Tacoma");
        assert_eq!(cruise.state.as_deref(), Some("WA"));
        assert_eq!(
            cruise.description.as_deref(),
            Some("Meet at the north lot. Departure at 9:30.")
        );
    }

    #[test]
    fn window_excludes_out_of_range_events() {
        let params = FetchParams {
            limit: 50,
            range_start: NaiveDate::from_ymd_opt(2026, 4, 1),
            range_end: NaiveDate::from_ymd_opt(2026, 4, 30),
        };
        let outcome = feed_source().parse_calendar(FEED, &params);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].name, "Spring Tune-Up Cruise");
    }

    #[test]
    fn datetime_parsing_accepts_both_forms() {
        assert_eq!(
            parse_ics_datetime("20260613"),
            Some((NaiveDate::from_ymd_opt(2026, 6, 13).unwrap(), None))
        );
        let (date, time) = parse_ics_datetime("20260418T193000Z").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 4, 18).unwrap());
        assert_eq!(time, NaiveTime::from_hms_opt(19, 30, 0));
        assert_eq!(parse_ics_datetime("next saturday"), None);
    }

    #[test]
    fn datetime_parsing_tolerates_multibyte_garbage() {
        let (date, time) = parse_ics_datetime("20260418T09000é").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 4, 18).unwrap());
        assert!(time.is_none());

        assert_eq!(parse_ics_datetime("202é0418T090000"), None);
    }
}
