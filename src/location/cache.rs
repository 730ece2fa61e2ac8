//! Persistent, tiered memo of every name ever looked up.
//!
//! Three tiers: global, per-country and per-US-state. Only the global tier is
//! written to disk (header-less CSV: name, lat, lng, country, region); the
//! scoped tiers are rebuilt from its successful rows on load. A row with blank
//! coordinates or country is a NoMatch. Entries are never removed.

use super::gazetteer::{csv_reader, field};
use super::types::{Bias, CacheEntry, GeoMatch, LocationError};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One partition of the cache.
#[derive(Debug, Default, Clone)]
pub struct Tier {
    entries: HashMap<String, CacheEntry>,
}

impl Tier {
    pub fn get(&self, name: &str) -> Option<&CacheEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn upsert(&mut self, name: &str, entry: CacheEntry) {
        self.entries.insert(name.to_string(), entry);
    }
}

/// The search cache.
#[derive(Debug, Default)]
pub struct SearchCache {
    path: Option<PathBuf>,
    global: Tier,
    by_country: HashMap<String, Tier>,
    by_state: HashMap<String, Tier>,
}

impl SearchCache {
    /// An empty cache that is never persisted (for testing).
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the cache file at `path`. A missing file is an empty cache.
    pub fn load_from(path: &Path) -> Result<Self, LocationError> {
        let mut cache = Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        };
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No search cache at {}, starting empty", path.display());
                return Ok(cache);
            }
            Err(source) => {
                return Err(LocationError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        for record in csv_reader(file).into_records() {
            let record = record.map_err(|source| LocationError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
            let name = field(&record, 0);
            if name.is_empty() {
                continue;
            }
            let entry = parse_entry(
                field(&record, 1),
                field(&record, 2),
                field(&record, 3),
                field(&record, 4),
            )
            .unwrap_or_else(|| {
                if !field(&record, 1).is_empty() && !field(&record, 3).is_empty() {
                    warn!("Unreadable cache row for '{}', treated as no match", name);
                }
                CacheEntry::NoMatch
            });
            cache.insert_loaded(name, entry);
        }

        info!(
            "Search cache loaded: {} names, {} country tiers, {} state tiers",
            cache.global.len(),
            cache.by_country.len(),
            cache.by_state.len(),
        );
        Ok(cache)
    }

    fn insert_loaded(&mut self, name: &str, entry: CacheEntry) {
        if let CacheEntry::Found(m) = &entry {
            self.scoped_upsert(name, m);
        }
        self.global.upsert(name, entry);
    }

    /// The tier a lookup under `bias` must use, created empty if absent.
    ///
    /// `countryBias` is a provider hint only and never selects a tier.
    pub fn select_tier(&mut self, bias: &Bias) -> &Tier {
        self.select_tier_mut(bias)
    }

    fn select_tier_mut(&mut self, bias: &Bias) -> &mut Tier {
        match (&bias.country, &bias.region) {
            (Some(country), Some(region)) if country == "US" => {
                self.by_state.entry(region.clone()).or_default()
            }
            (Some(country), _) => self.by_country.entry(country.clone()).or_default(),
            _ => &mut self.global,
        }
    }

    /// Look `name` up in the tier selected by `bias`.
    pub fn lookup(&mut self, bias: &Bias, name: &str) -> Option<CacheEntry> {
        self.select_tier(bias).get(name).cloned()
    }

    /// The name was recorded in some scope, not necessarily the current one.
    pub fn is_known(&self, name: &str) -> bool {
        self.global.contains(name)
    }

    /// Record a lookup result.
    ///
    /// Always written to the global tier. A match also goes to its country
    /// tier and, for the US, its state tier. A NoMatch goes only to the tier
    /// `bias` selects; no scope is derived from a failure.
    pub fn record(&mut self, name: &str, result: &CacheEntry, bias: &Bias) {
        match result {
            CacheEntry::Found(m) => self.scoped_upsert(name, m),
            CacheEntry::NoMatch => {
                if bias.country.is_some() {
                    self.select_tier_mut(bias).upsert(name, CacheEntry::NoMatch);
                }
            }
        }
        self.global.upsert(name, result.clone());
        debug!("Cached '{}' under {}", name, bias);
    }

    fn scoped_upsert(&mut self, name: &str, m: &GeoMatch) {
        self.by_country
            .entry(m.country_code.clone())
            .or_default()
            .upsert(name, CacheEntry::Found(m.clone()));
        if m.is_us() {
            self.by_state
                .entry(m.region_code.clone())
                .or_default()
                .upsert(name, CacheEntry::Found(m.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
    }

    /// Rewrite the cache file. Does nothing for an in-memory cache.
    ///
    /// The file is written next to the target and renamed over it, so an
    /// interrupted save leaves the previous cache intact.
    pub fn save(&self) -> Result<(), LocationError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source: std::io::Error| LocationError::Io {
            path: path.clone(),
            source,
        };
        let csv_err = |source: csv::Error| LocationError::Csv {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp).map_err(io_err)?;
            file.write_all("\u{feff}".as_bytes()).map_err(io_err)?;
            let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

            let mut names: Vec<&String> = self.global.entries.keys().collect();
            names.sort();
            for name in names {
                let row = match &self.global.entries[name] {
                    CacheEntry::Found(m) => [
                        name.clone(),
                        m.lat.to_string(),
                        m.lng.to_string(),
                        m.country_code.clone(),
                        m.region_code.clone(),
                    ],
                    CacheEntry::NoMatch => [
                        name.clone(),
                        String::new(),
                        String::new(),
                        String::new(),
                        String::new(),
                    ],
                };
                writer.write_record(&row).map_err(csv_err)?;
            }
            writer.flush().map_err(io_err)?;
        }
        fs::rename(&tmp, path).map_err(io_err)?;
        debug!("Search cache saved: {} names to {}", self.global.len(), path.display());
        Ok(())
    }
}

fn parse_entry(lat: &str, lng: &str, country: &str, region: &str) -> Option<CacheEntry> {
    if country.is_empty() {
        return None;
    }
    let lat = lat.parse::<f64>().ok().filter(|v| v.is_finite())?;
    let lng = lng.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(CacheEntry::Found(GeoMatch {
        lat,
        lng,
        country_code: country.to_string(),
        region_code: region.to_string(),
    }))
}
