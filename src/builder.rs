use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::config::SourceConfig;
use crate::domain::{EventRow, EventScope};
use crate::recurrence;
use crate::region::map_region;
use crate::slug::{build_event_slug, collision_suffix};
use crate::types::RawEvent;

/// Lookup tables and provenance for one source's build step, precomputed by
/// the orchestrator. The builder itself performs no I/O.
pub struct BuildContext<'a> {
    pub source: &'a SourceConfig,
    pub type_ids: &'a HashMap<String, Uuid>,
    pub other_type_id: Uuid,
    pub existing_slugs: &'a HashSet<String>,
    pub slug_by_conflict_key: &'a HashMap<(String, NaiveDate), String>,
    pub verified_at: DateTime<Utc>,
    pub scrape_job_id: Uuid,
    /// Year recurrence descriptors expand into.
    pub target_year: i32,
    pub range_start: Option<NaiveDate>,
    pub range_end: Option<NaiveDate>,
}

#[derive(Debug, Default)]
pub struct BuildOutcome {
    pub rows: Vec<EventRow>,
    pub skipped: Vec<String>,
}

/// Turns deduplicated raw events into canonical rows. Recurrence-bearing
/// events fan out into one row per concrete date; events that cannot form a
/// conflict key are skipped with a warning and never reach persistence.
pub fn build_rows(events: Vec<RawEvent>, ctx: &BuildContext) -> BuildOutcome {
    let mut outcome = BuildOutcome::default();
    // slugs taken earlier in this pass, so rows in one batch never collide
    let mut assigned: HashSet<String> = HashSet::new();

    for event in events {
        let Some(source_url) = event.source_url.clone().filter(|u| !u.is_empty()) else {
            warn!(
                source = %event.source_name,
                event = %event.name,
                "event has no canonical link; skipping"
            );
            outcome.skipped.push(format!(
                "{}: '{}' has no canonical link",
                event.source_name, event.name
            ));
            continue;
        };

        let dates: Vec<NaiveDate> = if let Some(day) = event.start_date {
            vec![day]
        } else if let Some(descriptor) = event.recurrence.as_deref() {
            let expanded = recurrence::expand(descriptor, ctx.target_year);
            if expanded.is_empty() {
                warn!(
                    source = %event.source_name,
                    event = %event.name,
                    descriptor,
                    "unrecognized recurrence descriptor; skipping"
                );
                outcome.skipped.push(format!(
                    "{}: '{}' has unrecognized recurrence descriptor '{}'",
                    event.source_name, event.name, descriptor
                ));
                continue;
            }
            expanded
                .into_iter()
                .filter(|day| in_window(ctx, *day))
                .collect()
        } else {
            Vec::new()
        };

        if dates.is_empty() {
            warn!(
                source = %event.source_name,
                event = %event.name,
                "no usable start date inside the run window; skipping"
            );
            outcome.skipped.push(format!(
                "{}: '{}' has no usable start date inside the run window",
                event.source_name, event.name
            ));
            continue;
        }

        for day in dates {
            let row = assemble_row(&event, &source_url, day, ctx, &mut assigned);
            outcome.rows.push(row);
        }
    }
    outcome
}

fn assemble_row(
    event: &RawEvent,
    source_url: &str,
    day: NaiveDate,
    ctx: &BuildContext,
    assigned: &mut HashSet<String>,
) -> EventRow {
    let event_type_id = event
        .event_type_hint
        .as_deref()
        .map(|hint| hint.trim().to_lowercase())
        .and_then(|hint| ctx.type_ids.get(&hint).copied())
        .unwrap_or(ctx.other_type_id);

    let region = event.state.as_deref().and_then(map_region);
    let scope = event
        .scope_hint
        .or(ctx.source.scope)
        .unwrap_or(if event.state.is_some() {
            EventScope::Regional
        } else {
            EventScope::National
        });

    let conflict_key = (source_url.to_string(), day);
    let slug = match ctx.slug_by_conflict_key.get(&conflict_key) {
        // the row already exists; keep its slug stable across re-ingests
        Some(existing) => {
            assigned.insert(existing.clone());
            existing.clone()
        }
        None => {
            let base = build_event_slug(&event.name, &event.city, day);
            let mut candidate = base.clone();
            if ctx.existing_slugs.contains(&candidate) || assigned.contains(&candidate) {
                candidate = format!("{}-{}", base, collision_suffix(source_url));
            }
            let mut bump = 2u32;
            while ctx.existing_slugs.contains(&candidate) || assigned.contains(&candidate) {
                candidate = format!("{}-{}-{}", base, collision_suffix(source_url), bump);
                bump += 1;
            }
            assigned.insert(candidate.clone());
            candidate
        }
    };

    // end dates only make sense next to the discrete date they came with
    let end_date = if event.start_date.is_some() {
        event.end_date
    } else {
        None
    };

    EventRow {
        slug,
        name: event.name.clone(),
        description: event.description.clone(),
        source_url: source_url.to_string(),
        start_date: day,
        end_date,
        start_time: event.start_time,
        end_time: event.end_time,
        venue_name: event.venue_name.clone(),
        address: event.address.clone(),
        city: event.city.clone(),
        state: event.state.clone(),
        country: event.country.clone(),
        latitude: event.latitude,
        longitude: event.longitude,
        event_type_id,
        region,
        scope,
        is_free: event.is_free,
        cost_text: event.cost_text.clone(),
        registration_url: event.registration_url.clone(),
        image_url: event.image_url.clone(),
        source_name: event.source_name.clone(),
        last_verified_at: ctx.verified_at,
        scrape_job_id: ctx.scrape_job_id,
    }
}

fn in_window(ctx: &BuildContext, day: NaiveDate) -> bool {
    if let Some(start) = ctx.range_start {
        if day < start {
            return false;
        }
    }
    if let Some(end) = ctx.range_end {
        if day > end {
            return false;
        }
    }
    true
}
