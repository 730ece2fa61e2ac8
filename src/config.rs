//! Configuration for geoenrich.
//!
//! Read from an optional TOML file; every field has a default so an empty or
//! missing file is valid. Command-line flags are applied on top in `main`.

use crate::location::gazetteer::GazetteerPaths;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "geoenrich.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub geonames: GeoNamesConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// `explicit` if given, else `./geoenrich.toml`, else the per-user file.
    /// Built-in defaults when none of them exists.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        let candidates = [Some(PathBuf::from(LOCAL_CONFIG_FILE)), user_config_path()];
        for path in candidates.into_iter().flatten() {
            if path.exists() {
                return Ok((Self::load(&path)?, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    pub fn validate(&self) -> Result<()> {
        if self.geonames.max_rows == 0 {
            anyhow::bail!("geonames.max_rows must be at least 1");
        }
        if self.batch.progress_every == 0 {
            anyhow::bail!("batch.progress_every must be at least 1");
        }
        Ok(())
    }
}

/// `<config dir>/geoenrich/config.toml`
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("geoenrich").join("config.toml"))
}

// ============================================================================
// Paths
// ============================================================================

/// File locations. Relative gazetteer and cache paths resolve against `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_countries")]
    pub countries: PathBuf,
    #[serde(default = "default_states")]
    pub states: PathBuf,
    #[serde(default = "default_counties")]
    pub counties: PathBuf,
    #[serde(default = "default_cities")]
    pub cities: PathBuf,
    #[serde(default = "default_cache")]
    pub cache: PathBuf,
    #[serde(default = "default_input")]
    pub input: PathBuf,
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_countries() -> PathBuf {
    PathBuf::from("countries.csv")
}

fn default_states() -> PathBuf {
    PathBuf::from("states.csv")
}

fn default_counties() -> PathBuf {
    PathBuf::from("counties.csv")
}

fn default_cities() -> PathBuf {
    PathBuf::from("cities.csv")
}

fn default_cache() -> PathBuf {
    PathBuf::from("searched.csv")
}

fn default_input() -> PathBuf {
    PathBuf::from("input.csv")
}

fn default_output() -> PathBuf {
    PathBuf::from("output.csv")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            countries: default_countries(),
            states: default_states(),
            counties: default_counties(),
            cities: default_cities(),
            cache: default_cache(),
            input: default_input(),
            output: default_output(),
        }
    }
}

impl PathsConfig {
    fn in_data_dir(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn gazetteer(&self) -> GazetteerPaths {
        GazetteerPaths {
            countries: self.in_data_dir(&self.countries),
            states: self.in_data_dir(&self.states),
            counties: self.in_data_dir(&self.counties),
            cities: self.in_data_dir(&self.cities),
        }
    }

    pub fn cache_file(&self) -> PathBuf {
        self.in_data_dir(&self.cache)
    }
}

// ============================================================================
// GeoNames
// ============================================================================

/// GeoNames `searchJSON` endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoNamesConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Account name; required unless running offline
    #[serde(default)]
    pub username: Option<String>,
    /// Ranked candidates requested per search
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "http://api.geonames.org/searchJSON".to_string()
}

fn default_max_rows() -> usize {
    10
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("geoenrich/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for GeoNamesConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            username: None,
            max_rows: default_max_rows(),
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

// ============================================================================
// Batch + logging
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Log progress every N rows
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
    /// Name of the free-text column to resolve
    #[serde(default = "default_location_column")]
    pub location_column: String,
}

fn default_progress_every() -> usize {
    100
}

fn default_location_column() -> String {
    "Location".to_string()
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            progress_every: default_progress_every(),
            location_column: default_location_column(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. "info" or "geoenrich=debug"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
