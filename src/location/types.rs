//! Core types for the location subsystem.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A gazetteer record: a country, US state, US county or city.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoEntity {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    /// ISO 3166-1 alpha-2 country code (e.g. "FR", "US")
    pub country_code: String,
    /// State abbreviation. Only meaningful for US entities.
    pub region_code: Option<String>,
}

/// A successful lookup as stored in the search cache.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMatch {
    pub lat: f64,
    pub lng: f64,
    pub country_code: String,
    /// GeoNames `adminCode1`; may be empty outside the US.
    pub region_code: String,
}

impl GeoMatch {
    pub fn is_us(&self) -> bool {
        self.country_code == "US"
    }
}

/// The memoised outcome of a name lookup.
///
/// `NoMatch` means "queried before and nothing usable came back", which is
/// different from the name being absent from the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    Found(GeoMatch),
    NoMatch,
}

impl CacheEntry {
    pub fn as_match(&self) -> Option<&GeoMatch> {
        match self {
            Self::Found(m) => Some(m),
            Self::NoMatch => None,
        }
    }
}

/// Per-row scope hint used to pick a cache tier and restrict provider queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bias {
    /// Restricts results to one country (GeoNames `country`).
    pub country: Option<String>,
    /// Restricts US results to one state (GeoNames `adminCode1`).
    pub region: Option<String>,
    /// Soft preference only (GeoNames `countryBias`). Never selects a cache tier.
    pub country_bias: Option<String>,
}

impl Bias {
    /// No scope or hint of any kind has been set for this row.
    pub fn is_unset(&self) -> bool {
        self.country.is_none() && self.region.is_none() && self.country_bias.is_none()
    }

    pub fn scope_to_state(&mut self, region: &str) {
        self.country = Some("US".to_string());
        self.region = Some(region.to_string());
    }

    pub fn scope_to_country(&mut self, country: &str) {
        self.country = Some(country.to_string());
    }
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.country, &self.region, &self.country_bias) {
            (Some(c), Some(r), _) => write!(f, "{}/{}", c, r),
            (Some(c), None, _) => write!(f, "{}", c),
            (None, _, Some(b)) => write!(f, "~{}", b),
            _ => write!(f, "global"),
        }
    }
}

/// The best-known coordinates for one row and the component they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RowResolution {
    pub lat: f64,
    pub lng: f64,
    pub source: String,
}

/// Location resolution errors.
///
/// Per-name failures never surface here; they are absorbed by the cache.
/// Everything in this enum aborts the batch.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered with an explicit error payload.
    #[error("GeoNames error: {0}")]
    Provider(String),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    #[error("Failed to read {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Bad record in {} (line {line}): {reason}", .path.display())]
    BadRecord {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bias_unset() {
        let mut bias = Bias::default();
        assert!(bias.is_unset());
        bias.country_bias = Some("FR".into());
        assert!(!bias.is_unset());
    }

    #[test]
    fn test_bias_scope_to_state() {
        let mut bias = Bias::default();
        bias.scope_to_state("IL");
        assert_eq!(bias.country.as_deref(), Some("US"));
        assert_eq!(bias.region.as_deref(), Some("IL"));
        assert_eq!(bias.to_string(), "US/IL");
    }

    #[test]
    fn test_cache_entry_accessors() {
        let found = CacheEntry::Found(GeoMatch {
            lat: 1.0,
            lng: 2.0,
            country_code: "US".into(),
            region_code: "TX".into(),
        });
        assert!(found.as_match().unwrap().is_us());
        assert!(CacheEntry::NoMatch.as_match().is_none());
    }

    #[test]
    fn test_provider_error_message() {
        let err = LocationError::Provider("user account not enabled".into());
        assert_eq!(err.to_string(), "GeoNames error: user account not enabled");
    }
}
