//! Location resolver — walks one location string from broad to specific.
//!
//! Components are taken from the right ("Springfield, IL, USA" → "USA" first).
//!
//! Flow:  US state → county of that state → city of that state
//!        country  → city of that country
//!        anything else → search cache → GeoNames
//!
//! Every match overwrites the row's coordinates, so the last (finest) one wins.
//! A city match ends the row. A state or country match narrows the scope of all
//! later cache lookups and provider queries for the row.

use super::cache::SearchCache;
use super::gazetteer::{Gazetteer, Places};
use super::parser::{is_noise, parse_components};
use super::providers::Geocoder;
use super::types::{Bias, CacheEntry, LocationError, RowResolution};
use tracing::debug;

/// Which reference set the current component is tested against.
#[derive(Debug, Clone, Copy)]
enum Step<'g> {
    /// Rows start here.
    MatchState,
    MatchCountry,
    MatchCounty { region: &'g str },
    MatchCity { cities: Option<&'g Places> },
    SearchCache,
    Done,
}

/// The resolution engine.
pub struct LocationResolver<'g, G> {
    gazetteer: &'g Gazetteer,
    geocoder: G,
    offline: bool,
    searches: usize,
}

impl<'g, G: Geocoder> LocationResolver<'g, G> {
    pub fn new(gazetteer: &'g Gazetteer, geocoder: G) -> Self {
        Self {
            gazetteer,
            geocoder,
            offline: false,
            searches: 0,
        }
    }

    /// Set offline mode — never call the provider.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Provider searches issued so far.
    pub fn searches(&self) -> usize {
        self.searches
    }

    /// Resolve one raw location string.
    ///
    /// `Ok(None)` when no component matched anything. `Err` only for provider
    /// failures, which must stop the batch.
    pub fn resolve(
        &mut self,
        cache: &mut SearchCache,
        raw: &str,
    ) -> Result<Option<RowResolution>, LocationError> {
        let gazetteer = self.gazetteer;
        let mut pending = parse_components(raw);
        let mut bias = Bias::default();
        let mut resolution = None;
        let mut step = Step::MatchState;
        let mut current = String::new();
        let mut advance = true;

        loop {
            if advance {
                match pending.pop() {
                    Some(next) => current = next,
                    None => break,
                }
            }
            if is_noise(&current) {
                advance = true;
                continue;
            }
            let name = current.as_str();

            (step, advance) = match step {
                Step::MatchState => match gazetteer.state(name) {
                    Some(state) => {
                        let region = state.region_code.as_deref().unwrap_or_default();
                        set_match(&mut resolution, state.lat, state.lng, name);
                        bias.scope_to_state(region);
                        (Step::MatchCounty { region }, true)
                    }
                    None => (Step::MatchCountry, false),
                },
                Step::MatchCountry => match gazetteer.country(name) {
                    Some(country) => {
                        set_match(&mut resolution, country.lat, country.lng, name);
                        bias.scope_to_country(&country.country_code);
                        let cities = gazetteer.cities_in_country(&country.country_code);
                        (Step::MatchCity { cities }, true)
                    }
                    None => (Step::SearchCache, false),
                },
                Step::MatchCounty { region } => {
                    let county = gazetteer.counties_in_state(region).and_then(|c| c.get(name));
                    if let Some(county) = county {
                        set_match(&mut resolution, county.lat, county.lng, name);
                    }
                    let cities = gazetteer.cities_in_state(region);
                    (Step::MatchCity { cities }, county.is_some())
                }
                Step::MatchCity { cities } => match cities.and_then(|c| c.get(name)) {
                    Some(city) => {
                        set_match(&mut resolution, city.lat, city.lng, name);
                        (Step::Done, true)
                    }
                    None => (Step::SearchCache, false),
                },
                Step::SearchCache => {
                    self.search_cache(cache, &mut bias, &mut resolution, name)?;
                    (Step::SearchCache, true)
                }
                Step::Done => (Step::Done, true),
            };

            // city precision is enough; drop whatever is left
            if let Step::Done = step {
                break;
            }
        }

        debug!("'{}' → {:?}", raw, resolution);
        Ok(resolution)
    }

    fn search_cache(
        &mut self,
        cache: &mut SearchCache,
        bias: &mut Bias,
        resolution: &mut Option<RowResolution>,
        name: &str,
    ) -> Result<(), LocationError> {
        match cache.lookup(bias, name) {
            Some(CacheEntry::NoMatch) => {
                debug!("'{}' has no match under {}, skipped", name, bias);
            }
            Some(CacheEntry::Found(m)) => {
                if bias.is_unset() {
                    bias.country_bias = Some(m.country_code.clone());
                }
                set_match(resolution, m.lat, m.lng, name);
            }
            None if cache.is_known(name) => {
                debug!("'{}' was resolved outside {}, skipped", name, bias);
            }
            None if self.offline => {
                debug!("'{}' not cached, offline", name);
            }
            None => {
                let result = self.geocoder.search(name, bias)?;
                self.searches += 1;
                cache.record(name, &result, bias);
                if let CacheEntry::Found(m) = &result {
                    set_match(resolution, m.lat, m.lng, name);
                }
            }
        }
        Ok(())
    }
}

fn set_match(resolution: &mut Option<RowResolution>, lat: f64, lng: f64, name: &str) {
    *resolution = Some(RowResolution {
        lat,
        lng,
        source: name.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::gazetteer::tests::sample;
    use crate::location::providers::tests::ScriptedGeocoder;
    use crate::location::types::GeoMatch;
    use approx::assert_relative_eq;

    fn resolve(
        gazetteer: &Gazetteer,
        geocoder: &mut ScriptedGeocoder,
        cache: &mut SearchCache,
        raw: &str,
    ) -> Option<RowResolution> {
        LocationResolver::new(gazetteer, geocoder).resolve(cache, raw).unwrap()
    }

    #[test]
    fn test_paris_france() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default();
        let mut cache = SearchCache::in_memory();

        let r = resolve(&g, &mut geo, &mut cache, "Paris, France").unwrap();
        assert_eq!(r.source, "Paris");
        assert_relative_eq!(r.lat, 48.8534);
        assert_relative_eq!(r.lng, 2.3488);
        assert!(geo.calls.is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_springfield_il_skips_counties_to_cities() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default();
        let mut cache = SearchCache::in_memory();

        let r = resolve(&g, &mut geo, &mut cache, "Springfield, IL").unwrap();
        assert_eq!(r.source, "Springfield");
        assert_relative_eq!(r.lat, 39.80);
        assert!(geo.calls.is_empty());
    }

    #[test]
    fn test_same_city_name_in_other_state() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default();
        let mut cache = SearchCache::in_memory();

        let r = resolve(&g, &mut geo, &mut cache, "Springfield, Massachusetts").unwrap();
        assert_relative_eq!(r.lat, 42.10);
    }

    #[test]
    fn test_unknown_name_queried_once_then_memoised() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default();
        let mut cache = SearchCache::in_memory();

        assert!(resolve(&g, &mut geo, &mut cache, "Qxz123").is_none());
        assert_eq!(geo.queried(), vec!["Qxz123"]);
        assert_eq!(geo.calls[0].1, Bias::default());
        assert_eq!(cache.lookup(&Bias::default(), "Qxz123"), Some(CacheEntry::NoMatch));

        assert!(resolve(&g, &mut geo, &mut cache, "Qxz123").is_none());
        assert_eq!(geo.calls.len(), 1);
    }

    #[test]
    fn test_noise_is_never_queried_or_cached() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default();
        let mut cache = SearchCache::in_memory();

        assert!(resolve(&g, &mut geo, &mut cache, "-, ?, ,x").is_none());
        assert!(geo.calls.is_empty());
        assert!(cache.is_empty());

        resolve(&g, &mut geo, &mut cache, "-, Qxz123, ?");
        assert_eq!(geo.queried(), vec!["Qxz123"]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_finest_match_overwrites() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default();
        let mut cache = SearchCache::in_memory();

        let r = resolve(&g, &mut geo, &mut cache, "Cook County, Illinois").unwrap();
        assert_eq!(r.source, "Cook County");
        assert_relative_eq!(r.lat, 41.8);

        let r = resolve(&g, &mut geo, &mut cache, "Boston, Suffolk County, MA").unwrap();
        assert_eq!(r.source, "Boston");
        assert_relative_eq!(r.lat, 42.36);

        let r = resolve(&g, &mut geo, &mut cache, "Texas").unwrap();
        assert_eq!(r.source, "Texas");
    }

    #[test]
    fn test_provider_match_after_state() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default().answer("Shelbyville", 39.4, -88.8, "US", "IL");
        let mut cache = SearchCache::in_memory();

        let r = resolve(&g, &mut geo, &mut cache, "Shelbyville, IL").unwrap();
        assert_eq!(r.source, "Shelbyville");
        assert_relative_eq!(r.lat, 39.4);

        let (_, bias) = &geo.calls[0];
        assert_eq!(bias.country.as_deref(), Some("US"));
        assert_eq!(bias.region.as_deref(), Some("IL"));

        let mut il = Bias::default();
        il.scope_to_state("IL");
        assert!(cache.lookup(&il, "Shelbyville").is_some());
    }

    #[test]
    fn test_city_match_discards_remaining_components() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default();
        let mut cache = SearchCache::in_memory();

        let r = resolve(&g, &mut geo, &mut cache, "Springfield, Qxz123, Lyon, France").unwrap();
        assert_eq!(r.source, "Lyon");
        assert!(geo.calls.is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_state_scope_does_not_leak() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default().answer("Shelbyville", 39.4, -88.8, "US", "IL");
        let mut cache = SearchCache::in_memory();

        resolve(&g, &mut geo, &mut cache, "Shelbyville, IL");
        let r = resolve(&g, &mut geo, &mut cache, "Shelbyville, TX").unwrap();

        // the Illinois entry must not answer a Texas-scoped lookup
        assert_eq!(r.source, "TX");
        assert_eq!(geo.calls.len(), 1);
    }

    #[test]
    fn test_cache_hit_sets_country_bias_hint() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default();
        let mut cache = SearchCache::in_memory();
        cache.record(
            "Lyon Metropolis",
            &CacheEntry::Found(GeoMatch {
                lat: 45.76,
                lng: 4.83,
                country_code: "FR".into(),
                region_code: "84".into(),
            }),
            &Bias::default(),
        );

        let r = resolve(&g, &mut geo, &mut cache, "Vieux Lyon, Lyon Metropolis").unwrap();
        assert_eq!(r.source, "Lyon Metropolis");

        let (name, bias) = &geo.calls[0];
        assert_eq!(name, "Vieux Lyon");
        assert_eq!(bias.country_bias.as_deref(), Some("FR"));
        assert!(bias.country.is_none());
        // the hint must not have scoped the cache write
        assert_eq!(cache.lookup(&Bias::default(), "Vieux Lyon"), Some(CacheEntry::NoMatch));
    }

    #[test]
    fn test_cache_hit_keeps_existing_scope() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default().answer("Shelbyville", 39.4, -88.8, "US", "IL");
        let mut cache = SearchCache::in_memory();
        resolve(&g, &mut geo, &mut cache, "Shelbyville, IL");

        let r = resolve(&g, &mut geo, &mut cache, "Old Town, Shelbyville, IL").unwrap();
        assert_eq!(geo.calls.len(), 2);
        assert_eq!(r.source, "Shelbyville");
        let (name, bias) = &geo.calls[1];
        assert_eq!(name, "Old Town");
        assert_eq!(bias.region.as_deref(), Some("IL"));
        assert!(bias.country_bias.is_none());
    }

    #[test]
    fn test_country_without_city_set_falls_to_cache() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default().answer("Springfield", 37.2, -93.3, "US", "MO");
        let mut cache = SearchCache::in_memory();

        let r = resolve(&g, &mut geo, &mut cache, "Springfield, United States").unwrap();
        assert_eq!(r.source, "Springfield");
        let (_, bias) = &geo.calls[0];
        assert_eq!(bias.country.as_deref(), Some("US"));
        assert!(bias.region.is_none());
    }

    #[test]
    fn test_provider_error_is_fatal() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default().failing_on("Qxz123");
        let mut cache = SearchCache::in_memory();

        let result = LocationResolver::new(&g, &mut geo).resolve(&mut cache, "Qxz123, Germany");
        assert!(matches!(result, Err(LocationError::Provider(_))));
        assert!(!cache.is_known("Qxz123"));
    }

    #[test]
    fn test_offline_skips_provider() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default();
        let mut cache = SearchCache::in_memory();
        let mut resolver = LocationResolver::new(&g, &mut geo);
        resolver.set_offline(true);

        let r = resolver.resolve(&mut cache, "Qxz123, Germany").unwrap().unwrap();
        assert_eq!(r.source, "Germany");
        assert_eq!(resolver.searches(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_warm_cache_is_idempotent() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default()
            .answer("Shelbyville", 39.4, -88.8, "US", "IL")
            .answer("Nantes", 47.2, -1.55, "FR", "52");
        let mut cache = SearchCache::in_memory();
        let rows = ["Shelbyville, IL", "Nantes", "Qxz123", "Paris, France", ""];

        let first: Vec<_> = rows.iter().map(|r| resolve(&g, &mut geo, &mut cache, r)).collect();
        let calls = geo.calls.len();
        assert_eq!(calls, 3);

        let second: Vec<_> = rows.iter().map(|r| resolve(&g, &mut geo, &mut cache, r)).collect();
        assert_eq!(first, second);
        assert_eq!(geo.calls.len(), calls);
    }

    #[test]
    fn test_state_scoped_no_match_survives_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("searched.csv");
        let g = sample();
        let mut geo = ScriptedGeocoder::default();

        let mut cache = SearchCache::load_from(&path).unwrap();
        let first = resolve(&g, &mut geo, &mut cache, "Shelbyville, IL");
        assert_eq!(geo.queried(), vec!["Shelbyville"]);
        assert_eq!(geo.calls[0].1.region.as_deref(), Some("IL"));
        cache.save().unwrap();

        let mut cache = SearchCache::load_from(&path).unwrap();
        let second = resolve(&g, &mut geo, &mut cache, "Shelbyville, IL");
        assert_eq!(first, second);
        assert_eq!(geo.calls.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let g = sample();
        let mut geo = ScriptedGeocoder::default();
        let mut cache = SearchCache::in_memory();
        assert!(resolve(&g, &mut geo, &mut cache, "").is_none());
        assert!(geo.calls.is_empty());
    }
}
