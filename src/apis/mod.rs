pub mod curated;
pub mod hemmings;
pub mod ics_feed;
pub mod motorsport_reg;

use std::time::Duration;

use crate::config::{HttpConfig, SourceConfig};
use crate::types::EventSource;

/// Static adapter registry: maps a config row's adapter identity onto an
/// implementation. The orchestrator never branches on source identity
/// anywhere else.
pub fn create_adapter(source: &SourceConfig, http: &HttpConfig) -> Option<Box<dyn EventSource>> {
    match source.adapter.as_str() {
        "motorsport_reg" => Some(Box::new(motorsport_reg::MotorsportRegApi::new(source, http))),
        "hemmings" => Some(Box::new(hemmings::HemmingsCrawler::new(source, http))),
        "ics_feed" => Some(Box::new(ics_feed::IcsFeedSource::new(source, http))),
        "curated" => Some(Box::new(curated::CuratedSource::new(source))),
        _ => None,
    }
}

pub(crate) fn build_client(http: &HttpConfig) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(http.user_agent.clone())
        .timeout(Duration::from_secs(http.timeout_seconds))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
