use crate::domain::EventScope;
use crate::error::{IngestError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineDefaults,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineDefaults {
    pub limit_per_source: usize,
    pub fetch_timeout_secs: u64,
    /// Existing-event snapshot window when the run has no explicit range.
    pub snapshot_past_days: i64,
    pub snapshot_future_days: i64,
}

impl Default for PipelineDefaults {
    fn default() -> Self {
        Self {
            limit_per_source: 200,
            fetch_timeout_secs: 120,
            snapshot_past_days: 60,
            snapshot_future_days: 730,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "MotorMeetBot/0.1 (+https://motormeet.app/bot)".to_string(),
            timeout_seconds: 30,
        }
    }
}

/// One upstream source. `key` is the stable identifier jobs and CLI filters
/// use; `adapter` picks the implementation from the registry. The remaining
/// fields are per-source hints and only some adapters read each of them.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub key: String,
    pub name: String,
    pub adapter: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub endpoint: Option<String>,
    /// Name of the environment variable holding the API key. The secret
    /// itself never lives in this file.
    pub api_key_env: Option<String>,
    pub delay_ms: Option<u64>,
    pub page_size: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub data_file: Option<String>,
    pub default_city: Option<String>,
    pub default_state: Option<String>,
    pub scope: Option<EventScope>,
}

fn default_enabled() -> bool {
    true
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Resolves which sources a run should process. Without a filter, every
    /// enabled source in file order. With a filter, each name must match a
    /// configured key (case-insensitive) or the run aborts before any fetch;
    /// naming a disabled source explicitly forces it to run.
    pub fn resolve_sources(&self, filter: Option<&[String]>) -> Result<Vec<SourceConfig>> {
        let Some(names) = filter else {
            return Ok(self.sources.iter().filter(|s| s.enabled).cloned().collect());
        };

        let mut picked: Vec<SourceConfig> = Vec::new();
        for raw in names {
            let want = raw.trim();
            if want.is_empty() {
                continue;
            }
            if picked.iter().any(|s| s.key.eq_ignore_ascii_case(want)) {
                continue;
            }
            match self
                .sources
                .iter()
                .find(|s| s.key.eq_ignore_ascii_case(want))
            {
                Some(source) => picked.push(source.clone()),
                None => {
                    return Err(IngestError::Config(format!(
                        "no source configured with key '{want}'"
                    )))
                }
            }
        }
        Ok(picked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [pipeline]
        limit_per_source = 50

        [[sources]]
        key = "motorsportreg"
        name = "MotorsportReg"
        adapter = "motorsport_reg"
        api_key_env = "MOTORSPORTREG_API_KEY"
        delay_ms = 750

        [[sources]]
        key = "hemmings"
        name = "Hemmings Calendar"
        adapter = "hemmings"
        enabled = false
    "#;

    #[test]
    fn parses_sources_and_defaults() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.pipeline.limit_per_source, 50);
        assert_eq!(config.pipeline.fetch_timeout_secs, 120);
        assert_eq!(config.sources.len(), 2);
        assert!(config.sources[0].enabled);
        assert!(!config.sources[1].enabled);
        assert_eq!(
            config.sources[0].api_key_env.as_deref(),
            Some("MOTORSPORTREG_API_KEY")
        );
    }

    #[test]
    fn all_mode_skips_disabled_sources() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let resolved = config.resolve_sources(None).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].key, "motorsportreg");
    }

    #[test]
    fn explicit_filter_is_case_insensitive_and_forces_disabled() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let filter = vec!["HEMMINGS".to_string()];
        let resolved = config.resolve_sources(Some(&filter)).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].key, "hemmings");
    }

    #[test]
    fn unknown_filter_name_is_a_config_error() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let filter = vec!["craigslist".to_string()];
        let err = config.resolve_sources(Some(&filter)).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }
}
