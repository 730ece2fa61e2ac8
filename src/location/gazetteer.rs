//! Static reference data: countries, US states, US counties and cities.
//!
//! Loaded once from header-less CSV files and read-only afterwards:
//!
//! | file          | columns                                      |
//! |---------------|----------------------------------------------|
//! | countries.csv | name, lat, lng, country code                 |
//! | states.csv    | name, lat, lng, state abbreviation           |
//! | counties.csv  | name, lat, lng, state abbreviation           |
//! | cities.csv    | name, lat, lng, country code, US state name  |

use super::types::{GeoEntity, LocationError};
use csv::StringRecord;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Name-indexed places within one scope.
pub type Places = HashMap<String, GeoEntity>;

/// Locations of the four gazetteer files.
#[derive(Debug, Clone)]
pub struct GazetteerPaths {
    pub countries: PathBuf,
    pub states: PathBuf,
    pub counties: PathBuf,
    pub cities: PathBuf,
}

/// The gazetteer store.
#[derive(Debug, Default)]
pub struct Gazetteer {
    countries: Places,
    /// Keyed by both full name and postal abbreviation.
    states: Places,
    counties_by_state: HashMap<String, Places>,
    cities_by_state: HashMap<String, Places>,
    cities_by_country: HashMap<String, Places>,
}

impl Gazetteer {
    /// Load all four files from disk.
    pub fn load(paths: &GazetteerPaths) -> Result<Self, LocationError> {
        let gazetteer = Self::build(
            Table::open(&paths.countries)?,
            Table::open(&paths.states)?,
            Table::open(&paths.counties)?,
            Table::open(&paths.cities)?,
        )?;
        info!(
            "Gazetteer loaded: {} countries, {} states, {} county sets, {} city sets",
            gazetteer.countries.len(),
            gazetteer.state_count(),
            gazetteer.counties_by_state.len(),
            gazetteer.cities_by_state.len() + gazetteer.cities_by_country.len(),
        );
        Ok(gazetteer)
    }

    /// Build from in-memory CSV sources (tests, embedded data).
    pub fn from_readers<A: Read, B: Read, C: Read, D: Read>(
        countries: A,
        states: B,
        counties: C,
        cities: D,
    ) -> Result<Self, LocationError> {
        Self::build(
            Table::read(countries, Path::new("countries.csv"))?,
            Table::read(states, Path::new("states.csv"))?,
            Table::read(counties, Path::new("counties.csv"))?,
            Table::read(cities, Path::new("cities.csv"))?,
        )
    }

    fn build(
        countries: Table,
        states: Table,
        counties: Table,
        cities: Table,
    ) -> Result<Self, LocationError> {
        let mut g = Gazetteer::default();

        for row in countries.rows() {
            let row = row?;
            let entity = GeoEntity {
                name: row.name.to_string(),
                lat: row.lat,
                lng: row.lng,
                country_code: row.code.to_string(),
                region_code: None,
            };
            g.countries.insert(entity.name.clone(), entity);
        }

        // state name → abbreviation, for assigning US cities to their state
        let mut state_abbrs: HashMap<String, String> = HashMap::new();
        for row in states.rows() {
            let row = row?;
            let entity = GeoEntity {
                name: row.name.to_string(),
                lat: row.lat,
                lng: row.lng,
                country_code: "US".to_string(),
                region_code: Some(row.code.to_string()),
            };
            state_abbrs.insert(row.name.to_string(), row.code.to_string());
            g.states.insert(row.code.to_string(), entity.clone());
            g.states.insert(row.name.to_string(), entity);
        }

        for row in counties.rows() {
            let row = row?;
            let entity = GeoEntity {
                name: row.name.to_string(),
                lat: row.lat,
                lng: row.lng,
                country_code: "US".to_string(),
                region_code: Some(row.code.to_string()),
            };
            g.counties_by_state
                .entry(row.code.to_string())
                .or_default()
                .insert(entity.name.clone(), entity);
        }

        for row in cities.rows() {
            let row = row?;
            if row.code == "US" {
                let abbr = state_abbrs
                    .get(row.extra)
                    .map(String::as_str)
                    .or_else(|| {
                        state_abbrs
                            .values()
                            .find(|a| a.as_str() == row.extra)
                            .map(String::as_str)
                    });
                let Some(abbr) = abbr else {
                    warn!("City '{}' has unknown US state '{}', skipped", row.name, row.extra);
                    continue;
                };
                let entity = GeoEntity {
                    name: row.name.to_string(),
                    lat: row.lat,
                    lng: row.lng,
                    country_code: "US".to_string(),
                    region_code: Some(abbr.to_string()),
                };
                g.cities_by_state
                    .entry(abbr.to_string())
                    .or_default()
                    .insert(entity.name.clone(), entity);
            } else {
                let entity = GeoEntity {
                    name: row.name.to_string(),
                    lat: row.lat,
                    lng: row.lng,
                    country_code: row.code.to_string(),
                    region_code: None,
                };
                g.cities_by_country
                    .entry(row.code.to_string())
                    .or_default()
                    .insert(entity.name.clone(), entity);
            }
        }

        Ok(g)
    }

    /// A US state by full name ("Illinois") or abbreviation ("IL").
    pub fn state(&self, name: &str) -> Option<&GeoEntity> {
        self.states.get(name)
    }

    pub fn country(&self, name: &str) -> Option<&GeoEntity> {
        self.countries.get(name)
    }

    pub fn counties_in_state(&self, abbr: &str) -> Option<&Places> {
        self.counties_by_state.get(abbr)
    }

    pub fn cities_in_state(&self, abbr: &str) -> Option<&Places> {
        self.cities_by_state.get(abbr)
    }

    /// Non-US cities of a country. US cities are only reachable through their state.
    pub fn cities_in_country(&self, code: &str) -> Option<&Places> {
        self.cities_by_country.get(code)
    }

    fn state_count(&self) -> usize {
        self.states
            .values()
            .filter_map(|s| s.region_code.as_deref())
            .collect::<HashSet<_>>()
            .len()
    }
}

/// A header-less CSV file read fully into memory.
struct Table {
    path: PathBuf,
    records: Vec<StringRecord>,
}

/// The common leading columns of every gazetteer row.
struct Row<'a> {
    name: &'a str,
    lat: f64,
    lng: f64,
    code: &'a str,
    extra: &'a str,
}

impl Table {
    fn open(path: &Path) -> Result<Self, LocationError> {
        let file = File::open(path).map_err(|source| LocationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::read(file, path)
    }

    fn read<R: Read>(reader: R, path: &Path) -> Result<Self, LocationError> {
        let records = csv_reader(reader)
            .into_records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| LocationError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    fn rows(&self) -> impl Iterator<Item = Result<Row<'_>, LocationError>> + '_ {
        self.records.iter().map(move |record| self.parse(record))
    }

    fn parse<'a>(&'a self, record: &'a StringRecord) -> Result<Row<'a>, LocationError> {
        let bad = |reason: String| LocationError::BadRecord {
            path: self.path.clone(),
            line: record.position().map(|p| p.line()).unwrap_or(0),
            reason,
        };
        let name = field(record, 0);
        if name.is_empty() {
            return Err(bad("empty name".into()));
        }
        let coord = |idx: usize| {
            field(record, idx).parse::<f64>().map_err(|_| {
                bad(format!(
                    "invalid coordinate '{}' for '{}'",
                    field(record, idx),
                    name
                ))
            })
        };
        Ok(Row {
            name,
            lat: coord(1)?,
            lng: coord(2)?,
            code: field(record, 3),
            extra: field(record, 4),
        })
    }
}

/// Reader for the header-less, possibly BOM-prefixed files this tool exchanges.
pub(crate) fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader)
}

/// A trimmed field, empty when the column is missing.
pub(crate) fn field(record: &StringRecord, idx: usize) -> &str {
    record
        .get(idx)
        .map(|s| s.trim_start_matches('\u{feff}').trim())
        .unwrap_or("")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) const COUNTRIES: &str = "\
France,46.0,2.0,FR
United States,39.8,-98.5,US
Germany,51.0,10.0,DE
";
    pub(crate) const STATES: &str = "\
Illinois,40.0,-89.0,IL
Massachusetts,42.3,-71.8,MA
Texas,31.0,-100.0,TX
";
    pub(crate) const COUNTIES: &str = "\
Cook County,41.8,-87.8,IL
Sangamon County,39.8,-89.7,IL
Suffolk County,42.35,-71.06,MA
";
    pub(crate) const CITIES: &str = "\
Paris,48.8534,2.3488,FR,
Lyon,45.75,4.85,FR,
Berlin,52.52,13.40,DE,
Springfield,39.80,-89.64,US,Illinois
Chicago,41.85,-87.65,US,Illinois
Boston,42.36,-71.06,US,Massachusetts
Springfield,42.10,-72.59,US,MA
Paris,33.66,-95.55,US,Texas
Nowhere,1.0,1.0,US,Atlantis
";

    pub(crate) fn sample() -> Gazetteer {
        Gazetteer::from_readers(
            COUNTRIES.as_bytes(),
            STATES.as_bytes(),
            COUNTIES.as_bytes(),
            CITIES.as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn test_state_by_name_and_abbr() {
        let g = sample();
        assert_eq!(g.state("Illinois").unwrap().region_code.as_deref(), Some("IL"));
        assert_eq!(g.state("IL").unwrap().name, "Illinois");
        assert!(g.state("Ontario").is_none());
    }

    #[test]
    fn test_country_lookup() {
        let g = sample();
        let fr = g.country("France").unwrap();
        assert_eq!(fr.country_code, "FR");
        assert!(g.country("FR").is_none());
    }

    #[test]
    fn test_cities_scoped_by_state() {
        let g = sample();
        let il = g.cities_in_state("IL").unwrap();
        assert!((il["Springfield"].lat - 39.80).abs() < 1e-9);
        let ma = g.cities_in_state("MA").unwrap();
        assert!((ma["Springfield"].lat - 42.10).abs() < 1e-9);
        assert!(g.cities_in_state("TX").unwrap().contains_key("Paris"));
    }

    #[test]
    fn test_us_cities_not_indexed_by_country() {
        let g = sample();
        assert!(g.cities_in_country("US").is_none());
        assert!(g.cities_in_country("FR").unwrap().contains_key("Paris"));
    }

    #[test]
    fn test_unknown_state_city_skipped() {
        let g = sample();
        assert!(g
            .cities_by_state
            .values()
            .all(|cities| !cities.contains_key("Nowhere")));
    }

    #[test]
    fn test_counties_scoped_by_state() {
        let g = sample();
        assert!(g.counties_in_state("IL").unwrap().contains_key("Cook County"));
        assert!(!g.counties_in_state("MA").unwrap().contains_key("Cook County"));
        assert!(g.counties_in_state("TX").is_none());
    }

    #[test]
    fn test_bad_coordinate_is_error() {
        let result = Gazetteer::from_readers(
            "France,north,2.0,FR\n".as_bytes(),
            "".as_bytes(),
            "".as_bytes(),
            "".as_bytes(),
        );
        match result {
            Err(LocationError::BadRecord { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected BadRecord, got {:?}", other),
        }
    }

    #[test]
    fn test_load_from_files_with_bom() {
        let dir = TempDir::new().unwrap();
        let write = |name: &str, body: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("\u{feff}{}", body)).unwrap();
            path
        };
        let paths = GazetteerPaths {
            countries: write("countries.csv", COUNTRIES),
            states: write("states.csv", STATES),
            counties: write("counties.csv", COUNTIES),
            cities: write("cities.csv", CITIES),
        };
        let g = Gazetteer::load(&paths).unwrap();
        assert!(g.country("France").is_some());
        assert_eq!(g.state_count(), 3);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.csv");
        let paths = GazetteerPaths {
            countries: missing.clone(),
            states: missing.clone(),
            counties: missing.clone(),
            cities: missing,
        };
        assert!(matches!(Gazetteer::load(&paths), Err(LocationError::Io { .. })));
    }
}
