//! Location descriptor screening and shape detection.
//!
//! Users type locations in many forms:
//! - Street addresses: `"123 Main St, Boston, MA"`
//! - Bare ZIP codes: `"01103"`, `"01103-2345"`
//! - Neighborhood picks: `"Downtown, Springfield, 01103"`
//! - Garbage: `"idk"`, `"asdkjasd"`, `"test"`
//!
//! [`prefilter`] rejects garbage before any network call, and
//! [`LocationQuery::parse`] tags the rest with a [`QueryShape`] that picks
//! the resolution strategy.

use std::sync::LazyLock;

use regex::Regex;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

/// Descriptors shorter than this (in characters, after trimming) are
/// rejected without a network call.
pub const MIN_DESCRIPTOR_LEN: usize = 5;

/// Regex for a 5-digit ZIP or ZIP+4. ASCII digits only.
static ZIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{5}(?:-[0-9]{4})?$").expect("valid regex"));

/// Tokens that mark a descriptor as placeholder text.
static PLACEHOLDER_TOKENS: &[&str] = &[
    "idk",
    "test",
    "n/a",
    "na",
    "none",
    "unknown",
    "tbd",
    "xxx",
    "asdf",
    "placeholder",
];

/// Keyboard-mash runs. A token starting with one of these is not a place
/// name.
static MASH_PREFIXES: &[&str] = &["asd", "qwe", "zxc", "sdf", "jkl"];

/// Why a descriptor was rejected before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Fewer than [`MIN_DESCRIPTOR_LEN`] characters.
    #[error("descriptor shorter than 5 characters")]
    TooShort,
    /// Contains placeholder or keyboard-mash text.
    #[error("descriptor contains placeholder token '{0}'")]
    Placeholder(String),
}

/// Screens a raw descriptor.
///
/// # Errors
///
/// Returns the [`Rejection`] reason when the descriptor is too short or
/// contains placeholder text.
pub fn prefilter(raw: &str) -> Result<(), Rejection> {
    let trimmed = raw.trim();

    if trimmed.chars().count() < MIN_DESCRIPTOR_LEN {
        return Err(Rejection::TooShort);
    }

    let lowered = trimmed.to_lowercase();
    for token in lowered
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(|t| t.trim_matches(|c: char| c == '.' || c == '\'' || c == '"'))
        .filter(|t| !t.is_empty())
    {
        if PLACEHOLDER_TOKENS.contains(&token)
            || MASH_PREFIXES.iter().any(|prefix| token.starts_with(prefix))
        {
            return Err(Rejection::Placeholder(token.to_string()));
        }
    }

    Ok(())
}

/// Whether `segment` is a 5-digit ZIP or ZIP+4.
#[must_use]
pub fn is_zip(segment: &str) -> bool {
    ZIP_RE.is_match(segment.trim())
}

/// Inferred structure of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum QueryShape {
    /// Anything not ending in a ZIP segment.
    PlainAddress,
    /// A bare ZIP code.
    ZipOnly,
    /// `"neighborhood[, town], ZIP"`.
    NeighborhoodTownZip,
}

/// The pieces of a `neighborhood[, town], ZIP` descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborhoodParts<'a> {
    /// Leading segment.
    pub neighborhood: &'a str,
    /// Second segment, when the descriptor has three or more.
    pub town: Option<&'a str>,
    /// Trailing ZIP segment.
    pub zip: &'a str,
}

/// A raw descriptor plus its inferred shape. Created per resolution
/// attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationQuery {
    raw: String,
    segments: Vec<String>,
    shape: QueryShape,
}

impl LocationQuery {
    /// Splits `raw` on commas and infers its shape from the final segment.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let segments: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let shape = match segments.as_slice() {
            [only] if is_zip(only) => QueryShape::ZipOnly,
            [_, .., last] if is_zip(last) => QueryShape::NeighborhoodTownZip,
            _ => QueryShape::PlainAddress,
        };

        Self {
            raw: raw.trim().to_string(),
            segments,
            shape,
        }
    }

    /// The descriptor as typed (trimmed).
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub const fn shape(&self) -> QueryShape {
        self.shape
    }

    /// Neighborhood/town/ZIP pieces for [`QueryShape::NeighborhoodTownZip`]
    /// queries.
    #[must_use]
    pub fn neighborhood_parts(&self) -> Option<NeighborhoodParts<'_>> {
        if self.shape != QueryShape::NeighborhoodTownZip {
            return None;
        }

        let (zip, rest) = self.segments.split_last()?;
        let neighborhood = rest.first()?;
        let town = if rest.len() >= 2 {
            Some(rest[1].as_str())
        } else {
            None
        };

        Some(NeighborhoodParts {
            neighborhood,
            town,
            zip,
        })
    }
}
