//! US state lookups by FIPS code, USPS abbreviation, and full name.
//!
//! Geocoder context breadcrumbs report a state either as a full name
//! (`"Massachusetts"`) or as an ISO short code (`"US-MA"`), and tract
//! GEOIDs carry the state FIPS prefix. [`same_state`] compares any two of
//! these spellings.

/// A US state (or DC) row: `(fips, abbreviation, name)`.
pub type StateRow = (&'static str, &'static str, &'static str);

/// The 50 US states plus DC.
pub const STATES: &[StateRow] = &[
    ("01", "AL", "Alabama"),
    ("02", "AK", "Alaska"),
    ("04", "AZ", "Arizona"),
    ("05", "AR", "Arkansas"),
    ("06", "CA", "California"),
    ("08", "CO", "Colorado"),
    ("09", "CT", "Connecticut"),
    ("10", "DE", "Delaware"),
    ("11", "DC", "District of Columbia"),
    ("12", "FL", "Florida"),
    ("13", "GA", "Georgia"),
    ("15", "HI", "Hawaii"),
    ("16", "ID", "Idaho"),
    ("17", "IL", "Illinois"),
    ("18", "IN", "Indiana"),
    ("19", "IA", "Iowa"),
    ("20", "KS", "Kansas"),
    ("21", "KY", "Kentucky"),
    ("22", "LA", "Louisiana"),
    ("23", "ME", "Maine"),
    ("24", "MD", "Maryland"),
    ("25", "MA", "Massachusetts"),
    ("26", "MI", "Michigan"),
    ("27", "MN", "Minnesota"),
    ("28", "MS", "Mississippi"),
    ("29", "MO", "Missouri"),
    ("30", "MT", "Montana"),
    ("31", "NE", "Nebraska"),
    ("32", "NV", "Nevada"),
    ("33", "NH", "New Hampshire"),
    ("34", "NJ", "New Jersey"),
    ("35", "NM", "New Mexico"),
    ("36", "NY", "New York"),
    ("37", "NC", "North Carolina"),
    ("38", "ND", "North Dakota"),
    ("39", "OH", "Ohio"),
    ("40", "OK", "Oklahoma"),
    ("41", "OR", "Oregon"),
    ("42", "PA", "Pennsylvania"),
    ("44", "RI", "Rhode Island"),
    ("45", "SC", "South Carolina"),
    ("46", "SD", "South Dakota"),
    ("47", "TN", "Tennessee"),
    ("48", "TX", "Texas"),
    ("49", "UT", "Utah"),
    ("50", "VT", "Vermont"),
    ("51", "VA", "Virginia"),
    ("53", "WA", "Washington"),
    ("54", "WV", "West Virginia"),
    ("55", "WI", "Wisconsin"),
    ("56", "WY", "Wyoming"),
];

/// Finds a state by FIPS code, abbreviation, ISO short code (`US-MA`),
/// or full name. Matching is case-insensitive.
#[must_use]
pub fn lookup(value: &str) -> Option<StateRow> {
    let value = value.trim();
    let value = value
        .strip_prefix("US-")
        .or_else(|| value.strip_prefix("us-"))
        .unwrap_or(value);

    STATES.iter().copied().find(|(fips, abbr, name)| {
        *fips == value || abbr.eq_ignore_ascii_case(value) || name.eq_ignore_ascii_case(value)
    })
}

/// Returns the USPS abbreviation for any recognized state spelling.
#[must_use]
pub fn abbreviation(value: &str) -> Option<&'static str> {
    lookup(value).map(|(_, abbr, _)| abbr)
}

/// Returns the state abbreviation encoded in a tract GEOID's FIPS prefix.
#[must_use]
pub fn abbreviation_for_geoid(geoid: &str) -> Option<&'static str> {
    geoid
        .get(..2)
        .and_then(|fips| STATES.iter().find(|(f, _, _)| *f == fips))
        .map(|(_, abbr, _)| *abbr)
}

/// Whether two state spellings refer to the same state.
///
/// Unrecognized spellings fall back to a case-insensitive string
/// comparison.
#[must_use]
pub fn same_state(a: &str, b: &str) -> bool {
    match (lookup(a), lookup(b)) {
        (Some((fa, _, _)), Some((fb, _, _))) => fa == fb,
        _ => a.trim().eq_ignore_ascii_case(b.trim()),
    }
}
