use serde::{Deserialize, Serialize};

/// Coarse US region bucket derived from a state code. The serving side
/// filters and groups on exactly these five values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Northeast,
    Southeast,
    Midwest,
    Southwest,
    West,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Northeast => "northeast",
            Region::Southeast => "southeast",
            Region::Midwest => "midwest",
            Region::Southwest => "southwest",
            Region::West => "west",
        }
    }

    pub fn parse(value: &str) -> Option<Region> {
        match value.trim().to_lowercase().as_str() {
            "northeast" => Some(Region::Northeast),
            "southeast" => Some(Region::Southeast),
            "midwest" => Some(Region::Midwest),
            "southwest" => Some(Region::Southwest),
            "west" => Some(Region::West),
            _ => None,
        }
    }
}

const NORTHEAST: &[&str] = &[
    "CT", "DC", "DE", "MA", "MD", "ME", "NH", "NJ", "NY", "PA", "RI", "VT",
];
const SOUTHEAST: &[&str] = &[
    "AL", "AR", "FL", "GA", "KY", "LA", "MS", "NC", "SC", "TN", "VA", "WV",
];
const MIDWEST: &[&str] = &[
    "IA", "IL", "IN", "KS", "MI", "MN", "MO", "ND", "NE", "OH", "SD", "WI",
];
const SOUTHWEST: &[&str] = &["AZ", "NM", "OK", "TX"];
const WEST: &[&str] = &[
    "AK", "CA", "CO", "HI", "ID", "MT", "NV", "OR", "UT", "WA", "WY",
];

/// Maps a two-letter US state code (plus DC) onto its region. Unknown and
/// non-US codes return `None`; the caller stores the absence rather than
/// guessing.
pub fn map_region(state: &str) -> Option<Region> {
    let code = state.trim().to_uppercase();
    let code = code.as_str();
    if NORTHEAST.contains(&code) {
        Some(Region::Northeast)
    } else if SOUTHEAST.contains(&code) {
        Some(Region::Southeast)
    } else if MIDWEST.contains(&code) {
        Some(Region::Midwest)
    } else if SOUTHWEST.contains(&code) {
        Some(Region::Southwest)
    } else if WEST.contains(&code) {
        Some(Region::West)
    } else {
        None
    }
}
