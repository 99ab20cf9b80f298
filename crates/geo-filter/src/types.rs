//! Core data types for author classification and feed filtering.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::classify;

/// Opaque, session-stable identifier of a feed item's author.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorId(String);

impl AuthorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Two-letter country code, always stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountryCode(String);

impl CountryCode {
    /// Build a code from user or store input. Returns `None` unless the input
    /// is exactly two ASCII letters.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(Self(trimmed.to_ascii_uppercase()))
        } else {
            None
        }
    }

    pub(crate) fn from_static(code: &'static str) -> Self {
        Self(code.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cached geographic classification of an author. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoClassification {
    pub country_code: Option<CountryCode>,
    pub raw_location_text: String,
    pub resolved_at: DateTime<Utc>,
}

impl GeoClassification {
    /// Classify raw location text into a new entry stamped `resolved_at`.
    pub fn from_location_text(raw: impl Into<String>, resolved_at: DateTime<Utc>) -> Self {
        let raw_location_text = raw.into();
        Self {
            country_code: classify(&raw_location_text),
            raw_location_text,
            resolved_at,
        }
    }
}

/// How blocked items are presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    #[default]
    Hide,
    Overlay,
}

impl DisplayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hide => "hide",
            Self::Overlay => "overlay",
        }
    }
}

impl std::str::FromStr for DisplayMode {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hide" => Ok(Self::Hide),
            "overlay" => Ok(Self::Overlay),
            other => Err(FilterError::InvalidInput(format!(
                "Unknown display mode: {other}. Use 'hide' or 'overlay'."
            ))),
        }
    }
}

/// Set of blocked country codes.
pub type BlockedSet = BTreeSet<CountryCode>;

/// Outcome of the visibility policy for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Show,
    Hide,
    Overlay,
}

/// Errors that can occur in the geo-filter library.
#[derive(thiserror::Error, Debug)]
pub enum FilterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown country code: {0}")]
    UnknownCountry(String),
}

/// Convenience result type.
pub type FilterResult<T> = Result<T, FilterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_code_parse() {
        assert_eq!(CountryCode::parse(" de ").unwrap().as_str(), "DE");
        assert!(CountryCode::parse("DEU").is_none());
        assert!(CountryCode::parse("1A").is_none());
        assert!(CountryCode::parse("").is_none());
    }

    #[test]
    fn test_classification_json_shape() {
        let resolved_at = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let entry = GeoClassification::from_location_text("Berlin, Germany", resolved_at);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["countryCode"], "DE");
        assert_eq!(json["rawLocationText"], "Berlin, Germany");

        let parsed: GeoClassification = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_display_mode_from_str() {
        assert_eq!("Overlay".parse::<DisplayMode>().unwrap(), DisplayMode::Overlay);
        assert_eq!("hide".parse::<DisplayMode>().unwrap(), DisplayMode::Hide);
        assert!("blur".parse::<DisplayMode>().is_err());
    }
}
