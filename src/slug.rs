use chrono::NaiveDate;
use sha2::{Digest, Sha256};

/// Builds the canonical event slug: normalized name and city with the ISO
/// start date appended. The date suffix keeps instances of a recurring
/// series distinct without any counter bookkeeping.
pub fn build_event_slug(name: &str, city: &str, start_date: NaiveDate) -> String {
    let mut parts: Vec<String> = Vec::new();
    let name_part = normalize_part(name);
    if !name_part.is_empty() {
        parts.push(name_part);
    }
    let city_part = normalize_part(city);
    if !city_part.is_empty() {
        parts.push(city_part);
    }
    parts.push(start_date.format("%Y-%m-%d").to_string());
    parts.join("-")
}

/// Short disambiguation suffix for the rare slug collision, derived from the
/// canonical source link so repeated runs assign the same slug.
pub fn collision_suffix(source_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_url.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..6].to_string()
}

fn normalize_part(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}
