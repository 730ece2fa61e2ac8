//! External geocoding: the `Geocoder` seam and the GeoNames client.

use super::types::{Bias, CacheEntry, GeoMatch, LocationError};
use crate::config::GeoNamesConfig;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// A single bias-aware lookup against an external provider.
///
/// `Ok(CacheEntry::NoMatch)` is an ordinary outcome. `Err` means the provider
/// itself failed and the batch has to stop.
pub trait Geocoder {
    fn search(&mut self, name: &str, bias: &Bias) -> Result<CacheEntry, LocationError>;
}

impl<G: Geocoder + ?Sized> Geocoder for &mut G {
    fn search(&mut self, name: &str, bias: &Bias) -> Result<CacheEntry, LocationError> {
        (**self).search(name, bias)
    }
}

// ─── GeoNames ───────────────────────────────────────────────────

/// One ranked candidate from `searchJSON`. Only the fields we need.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct GeoNamesRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub lat: Option<String>,
    #[serde(default)]
    pub lng: Option<String>,
    #[serde(default, rename = "countryCode")]
    pub country_code: Option<String>,
    #[serde(default, rename = "adminCode1")]
    pub admin_code1: Option<String>,
}

impl GeoNamesRecord {
    /// The record as a cache fragment, if it carries all four fields.
    pub fn to_match(&self) -> Option<GeoMatch> {
        let lat = self.lat.as_deref()?.trim().parse::<f64>().ok()?;
        let lng = self.lng.as_deref()?.trim().parse::<f64>().ok()?;
        let country_code = self.country_code.as_deref().filter(|c| !c.is_empty())?;
        let region_code = self.admin_code1.as_deref()?;
        Some(GeoMatch {
            lat,
            lng,
            country_code: country_code.to_string(),
            region_code: region_code.to_string(),
        })
    }
}

#[derive(Deserialize, Debug)]
struct SearchResponse {
    #[serde(default)]
    geonames: Option<Vec<Value>>,
    #[serde(default)]
    status: Option<ProviderStatus>,
}

#[derive(Deserialize, Debug)]
struct ProviderStatus {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    value: Option<i64>,
}

/// Turn a `searchJSON` body into a lookup result.
///
/// A `status` member is a provider error. Otherwise the first candidate, in
/// ranked order, carrying lat, lng, countryCode and adminCode1 wins; running out
/// of candidates is a NoMatch.
pub fn interpret_response(body: Value) -> Result<CacheEntry, LocationError> {
    let response: SearchResponse =
        serde_json::from_value(body).map_err(|e| LocationError::InvalidResponse(e.to_string()))?;

    if let Some(status) = response.status {
        let message = status.message.unwrap_or_else(|| "unknown error".into());
        return Err(LocationError::Provider(match status.value {
            Some(code) => format!("{} (code {})", message, code),
            None => message,
        }));
    }

    let candidates = response
        .geonames
        .ok_or_else(|| LocationError::InvalidResponse("missing 'geonames' member".into()))?;

    Ok(select_candidate(&candidates))
}

fn select_candidate(candidates: &[Value]) -> CacheEntry {
    candidates
        .iter()
        .filter_map(|c| serde_json::from_value::<GeoNamesRecord>(c.clone()).ok())
        .find_map(|r| r.to_match())
        .map(CacheEntry::Found)
        .unwrap_or(CacheEntry::NoMatch)
}

/// Query string for one search, in request order.
pub fn query_params(
    name: &str,
    bias: &Bias,
    config: &GeoNamesConfig,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("q", name.to_string()),
        ("username", config.username.clone().unwrap_or_default()),
        ("maxRows", config.max_rows.to_string()),
    ];
    if let Some(country) = &bias.country {
        params.push(("country", country.clone()));
    }
    if let Some(region) = &bias.region {
        params.push(("adminCode1", region.clone()));
    }
    if let Some(hint) = &bias.country_bias {
        params.push(("countryBias", hint.clone()));
    }
    params
}

/// Blocking GeoNames `searchJSON` client. One request at a time.
pub struct GeoNamesClient {
    agent: ureq::Agent,
    config: GeoNamesConfig,
}

impl GeoNamesClient {
    pub fn new(config: GeoNamesConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self { agent, config }
    }
}

impl Geocoder for GeoNamesClient {
    fn search(&mut self, name: &str, bias: &Bias) -> Result<CacheEntry, LocationError> {
        let mut request = self
            .agent
            .get(&self.config.base_url)
            .set("User-Agent", &self.config.user_agent);
        for (key, value) in query_params(name, bias, &self.config) {
            request = request.query(key, &value);
        }
        debug!("GeoNames search '{}' ({})", name, bias);

        let body: Value = match request.call() {
            Ok(response) => response
                .into_json()
                .map_err(|e| LocationError::InvalidResponse(e.to_string()))?,
            // GeoNames may send its status payload with a non-2xx code
            Err(ureq::Error::Status(code, response)) => match response.into_json::<Value>() {
                Ok(body) if body.get("status").is_some() => body,
                _ => return Err(LocationError::Network(format!("HTTP {}", code))),
            },
            Err(e) => return Err(LocationError::Network(e.to_string())),
        };

        interpret_response(body)
    }
}
