use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::domain::ExistingEvent;
use crate::types::RawEvent;

/// Result of the within-batch pass: surviving events in first-seen order,
/// plus a human-readable note per merged duplicate so merges are visible in
/// job payloads rather than silently eaten.
#[derive(Debug, Default)]
pub struct BatchDedup {
    pub unique: Vec<RawEvent>,
    pub merged: Vec<String>,
}

/// A batch event that matches an already-stored row. Reporting only; the
/// event stays in the write set so the upsert refreshes provenance.
#[derive(Debug)]
pub struct ExistingMatch {
    pub event_name: String,
    pub existing_slug: String,
    pub by_conflict_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Conflict(String, NaiveDate),
    // normalized name, city, state, schedule token (date or descriptor)
    Fuzzy(String, String, String, String),
}

/// Collapses duplicates within one fetched batch. Events with a canonical
/// link group on the conflict key; the rest group on normalized
/// name + locality + schedule. The representative is the item with a link,
/// then the most populated one, then the first seen.
pub fn dedupe_batch(events: Vec<RawEvent>) -> BatchDedup {
    let mut order: Vec<GroupKey> = Vec::new();
    let mut groups: HashMap<GroupKey, Vec<RawEvent>> = HashMap::new();

    for event in events {
        let key = group_key(&event);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(event);
    }

    let mut result = BatchDedup::default();
    for key in order {
        let Some(mut group) = groups.remove(&key) else {
            continue;
        };
        let mut best = 0;
        for idx in 1..group.len() {
            if outranks(&group[idx], &group[best]) {
                best = idx;
            }
        }
        let representative = group.swap_remove(best);
        for loser in group {
            debug!(
                source = %loser.source_name,
                kept = %representative.name,
                dropped = %loser.name,
                "merged within-batch duplicate"
            );
            result.merged.push(format!(
                "{}: '{}' merged into '{}'",
                loser.source_name, loser.name, representative.name
            ));
        }
        result.unique.push(representative);
    }
    result
}

/// Reports which batch events already exist in the store, matching on the
/// conflict key first and otherwise on normalized name + locality + date.
pub fn match_existing(unique: &[RawEvent], snapshot: &[ExistingEvent]) -> Vec<ExistingMatch> {
    let mut by_conflict: HashMap<(String, NaiveDate), &ExistingEvent> = HashMap::new();
    let mut by_fuzzy: HashMap<(String, String, String, NaiveDate), &ExistingEvent> = HashMap::new();
    for existing in snapshot {
        by_conflict.insert(
            (existing.source_url.clone(), existing.start_date),
            existing,
        );
        by_fuzzy.insert(
            (
                normalize_fragment(&existing.name),
                normalize_fragment(existing.city.as_deref().unwrap_or("")),
                normalize_fragment(existing.state.as_deref().unwrap_or("")),
                existing.start_date,
            ),
            existing,
        );
    }

    let mut matches = Vec::new();
    for event in unique {
        if let Some(key) = event.conflict_key() {
            if let Some(existing) = by_conflict.get(&key) {
                matches.push(ExistingMatch {
                    event_name: event.name.clone(),
                    existing_slug: existing.slug.clone(),
                    by_conflict_key: true,
                });
                continue;
            }
        }
        if let Some(date) = event.start_date {
            let fuzzy_key = (
                normalize_fragment(&event.name),
                normalize_fragment(&event.city),
                normalize_fragment(event.state.as_deref().unwrap_or("")),
                date,
            );
            if let Some(existing) = by_fuzzy.get(&fuzzy_key) {
                matches.push(ExistingMatch {
                    event_name: event.name.clone(),
                    existing_slug: existing.slug.clone(),
                    by_conflict_key: false,
                });
            }
        }
    }
    matches
}

fn group_key(event: &RawEvent) -> GroupKey {
    if let Some((url, date)) = event.conflict_key() {
        return GroupKey::Conflict(url, date);
    }
    let schedule = match event.start_date {
        Some(date) => date.to_string(),
        None => normalize_fragment(event.recurrence.as_deref().unwrap_or("")),
    };
    GroupKey::Fuzzy(
        normalize_fragment(&event.name),
        normalize_fragment(&event.city),
        normalize_fragment(event.state.as_deref().unwrap_or("")),
        schedule,
    )
}

fn outranks(candidate: &RawEvent, incumbent: &RawEvent) -> bool {
    let cand = (candidate.source_url.is_some(), candidate.richness());
    let inc = (incumbent.source_url.is_some(), incumbent.richness());
    cand > inc
}

fn normalize_fragment(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn mk(name: &str, city: &str, url: Option<&str>, day: Option<NaiveDate>) -> RawEvent {
        RawEvent {
            name: name.to_string(),
            city: city.to_string(),
            source_url: url.map(str::to_string),
            start_date: day,
            source_name: "test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn conflict_key_duplicates_collapse_to_richest() {
        let plain = mk(
            "Radwood ATX",
            "Austin",
            Some("https://radwood.com/atx"),
            Some(date(2026, 6, 6)),
        );
        let mut rich = plain.clone();
        rich.venue_name = Some("Circuit of the Americas".to_string());
        rich.description = Some("80s and 90s only".to_string());

        let result = dedupe_batch(vec![plain, rich]);
        assert_eq!(result.unique.len(), 1);
        assert_eq!(result.merged.len(), 1);
        assert!(result.unique[0].venue_name.is_some());
    }

    #[test]
    fn url_less_duplicates_collapse_on_normalized_identity() {
        let a = mk("Cars & Coffee Plano", "Plano", None, Some(date(2026, 4, 4)));
        let mut b = mk("cars   coffee plano!!", "PLANO", None, Some(date(2026, 4, 4)));
        b.venue_name = Some("Legacy West".to_string());

        let result = dedupe_batch(vec![a, b]);
        assert_eq!(result.unique.len(), 1);
        // richer copy wins even though it arrived second
        assert_eq!(result.unique[0].venue_name.as_deref(), Some("Legacy West"));
    }

    #[test]
    fn same_series_different_dates_never_merge() {
        let a = mk("Cars & Coffee Plano", "Plano", None, Some(date(2026, 4, 4)));
        let b = mk("Cars & Coffee Plano", "Plano", None, Some(date(2026, 5, 2)));

        let result = dedupe_batch(vec![a, b]);
        assert_eq!(result.unique.len(), 2);
        assert!(result.merged.is_empty());
    }

    #[test]
    fn link_bearing_copy_outranks_richer_link_less_copy() {
        // date-less series items land in the same fuzzy group whether or not
        // they carry a link, and the linked copy must win
        let mut rich = mk("Hill Country Cruise", "Fredericksburg", None, None);
        rich.recurrence = Some("2nd Sunday monthly (Mar-Nov)".to_string());
        rich.venue_name = Some("Marktplatz".to_string());
        rich.description = Some("Scenic drive".to_string());
        rich.cost_text = Some("$45".to_string());

        let mut linked = mk(
            "Hill Country Cruise",
            "Fredericksburg",
            Some("https://hcc.example.com/series"),
            None,
        );
        linked.recurrence = Some("2nd Sunday monthly (Mar-Nov)".to_string());

        let mut result = dedupe_batch(vec![rich, linked]);
        assert_eq!(result.unique.len(), 1);
        assert_eq!(result.merged.len(), 1);
        let survivor = result.unique.pop().unwrap();
        assert!(survivor.source_url.is_some());
    }

    #[test]
    fn recurrence_series_group_on_descriptor() {
        let mut a = mk("Caffeine & Chrome", "Plano", None, None);
        a.recurrence = Some("1st Saturday monthly (Apr-Oct)".to_string());
        let mut b = mk("Caffeine and Chrome", "Plano", None, None);
        b.recurrence = Some("1st Saturday monthly (Apr-Oct)".to_string());
        let mut c = mk("Caffeine & Chrome", "Plano", None, None);
        c.recurrence = Some("Every Saturday (May-Oct)".to_string());

        let result = dedupe_batch(vec![a, b, c]);
        // "&" and "and" normalize differently, so the first two stay apart;
        // the third differs by descriptor
        assert_eq!(result.unique.len(), 3);
    }

    #[test]
    fn existing_matches_are_reported_without_touching_the_batch() {
        let snapshot = vec![
            ExistingEvent {
                id: Uuid::new_v4(),
                slug: "radwood-atx-austin-2026-06-06".to_string(),
                name: "Radwood ATX".to_string(),
                source_url: "https://radwood.com/atx".to_string(),
                start_date: date(2026, 6, 6),
                city: Some("Austin".to_string()),
                state: Some("TX".to_string()),
            },
            ExistingEvent {
                id: Uuid::new_v4(),
                slug: "cars-coffee-plano-plano-2026-04-04".to_string(),
                name: "Cars & Coffee Plano".to_string(),
                source_url: "https://other.example.com/cc".to_string(),
                start_date: date(2026, 4, 4),
                city: Some("Plano".to_string()),
                state: Some("TX".to_string()),
            },
        ];

        let by_key = mk(
            "Radwood ATX",
            "Austin",
            Some("https://radwood.com/atx"),
            Some(date(2026, 6, 6)),
        );
        let mut fuzzy = mk(
            "CARS & COFFEE PLANO",
            "Plano",
            Some("https://somewhere-else.example.com"),
            Some(date(2026, 4, 4)),
        );
        fuzzy.state = Some("TX".to_string());
        let fresh = mk("New Meet", "Reno", None, Some(date(2026, 8, 8)));

        let batch = vec![by_key, fuzzy, fresh];
        let matches = match_existing(&batch, &snapshot);
        assert_eq!(matches.len(), 2);
        assert!(matches[0].by_conflict_key);
        assert!(!matches[1].by_conflict_key);
        assert_eq!(batch.len(), 3);
    }
}
