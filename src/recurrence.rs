use chrono::{Datelike, NaiveDate, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;

// "1st Saturday monthly (Apr-Oct)" / "Last Friday monthly (January-March)"
static NTH_WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(1st|2nd|3rd|4th|last)\s+([a-z]+)\s+monthly\s*\(\s*([a-z]+)\s*-\s*([a-z]+)\s*\)$")
        .unwrap()
});

// "Every Saturday (May-Oct)"
static EVERY_WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^every\s+([a-z]+)\s*\(\s*([a-z]+)\s*-\s*([a-z]+)\s*\)$").unwrap()
});

const DAY_NAMES: &[(&str, Weekday)] = &[
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sunday", Weekday::Sun),
];

const MONTH_NAMES: &[&str] = &[
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

enum Ordinal {
    Nth(u8),
    Last,
}

/// Expands a human-authored recurrence descriptor into every concrete date
/// it denotes within `year`, ascending. Exactly two grammars are accepted:
///
/// - `"<1st|2nd|3rd|4th|Last> <Weekday> monthly (<MonStart>-<MonEnd>)"`
/// - `"Every <Weekday> (<MonStart>-<MonEnd>)"`
///
/// Month ranges are inclusive and must not wrap the year boundary. Anything
/// the grammars do not cover returns an empty vec for the caller to log and
/// skip; no input panics.
pub fn expand(descriptor: &str, year: i32) -> Vec<NaiveDate> {
    let text = descriptor.trim();

    if let Some(caps) = NTH_WEEKDAY.captures(text) {
        let parsed = (
            parse_ordinal(&caps[1]),
            parse_weekday(&caps[2]),
            parse_month(&caps[3]),
            parse_month(&caps[4]),
        );
        if let (Some(ordinal), Some(weekday), Some(first), Some(last)) = parsed {
            return expand_nth(year, weekday, ordinal, first, last);
        }
        return Vec::new();
    }

    if let Some(caps) = EVERY_WEEKDAY.captures(text) {
        let parsed = (
            parse_weekday(&caps[1]),
            parse_month(&caps[2]),
            parse_month(&caps[3]),
        );
        if let (Some(weekday), Some(first), Some(last)) = parsed {
            return expand_every(year, weekday, first, last);
        }
        return Vec::new();
    }

    Vec::new()
}

fn expand_nth(year: i32, weekday: Weekday, ordinal: Ordinal, first: u32, last: u32) -> Vec<NaiveDate> {
    if last < first {
        return Vec::new();
    }
    let mut dates = Vec::new();
    for month in first..=last {
        let date = match ordinal {
            Ordinal::Nth(n) => NaiveDate::from_weekday_of_month_opt(year, month, weekday, n),
            Ordinal::Last => last_weekday_of_month(year, month, weekday),
        };
        // None means the nth occurrence does not exist in this month
        if let Some(d) = date {
            dates.push(d);
        }
    }
    dates
}

fn expand_every(year: i32, weekday: Weekday, first: u32, last: u32) -> Vec<NaiveDate> {
    if last < first {
        return Vec::new();
    }
    let Some(jan_first) = NaiveDate::from_ymd_opt(year, 1, 1) else {
        return Vec::new();
    };
    jan_first
        .iter_days()
        .take_while(|d| d.year() == year)
        .filter(|d| d.weekday() == weekday && (first..=last).contains(&d.month()))
        .collect()
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }?;
    let mut day = first_of_next.pred_opt()?;
    while day.weekday() != weekday {
        day = day.pred_opt()?;
    }
    Some(day)
}

fn parse_ordinal(input: &str) -> Option<Ordinal> {
    match input.to_lowercase().as_str() {
        "1st" => Some(Ordinal::Nth(1)),
        "2nd" => Some(Ordinal::Nth(2)),
        "3rd" => Some(Ordinal::Nth(3)),
        "4th" => Some(Ordinal::Nth(4)),
        "last" => Some(Ordinal::Last),
        _ => None,
    }
}

fn parse_weekday(input: &str) -> Option<Weekday> {
    let key = input.trim().to_lowercase();
    for (name, day) in DAY_NAMES {
        if key == *name || key == name[..3] {
            return Some(*day);
        }
    }
    None
}

fn parse_month(input: &str) -> Option<u32> {
    let key = input.trim().to_lowercase();
    MONTH_NAMES
        .iter()
        .position(|name| key == *name || key == &name[..3])
        .map(|idx| idx as u32 + 1)
}
