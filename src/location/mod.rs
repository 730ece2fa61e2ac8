//! Location resolution subsystem for geoenrich.
//!
//! Resolves noisy place strings against static gazetteers, a tiered search
//! cache and, as a last resort, the GeoNames search service.

pub mod cache;
pub mod gazetteer;
pub mod parser;
pub mod providers;
pub mod resolver;
pub mod types;

pub use cache::SearchCache;
pub use gazetteer::{Gazetteer, GazetteerPaths};
pub use providers::{GeoNamesClient, Geocoder};
pub use resolver::LocationResolver;
pub use types::{Bias, CacheEntry, GeoEntity, GeoMatch, LocationError, RowResolution};
