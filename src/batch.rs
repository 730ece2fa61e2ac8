//! Batch driver: resolves every row of a table and saves the results.
//!
//! Rows are processed strictly in order, one provider request at a time. The
//! search cache and the output table are written when the run ends, whether it
//! finishes, hits a fatal provider error or panics, so a later run can pick up
//! where this one stopped.

use crate::location::{Geocoder, LocationError, LocationResolver, RowResolution, SearchCache};
use csv::StringRecord;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

/// Output columns appended after the input columns.
pub const OUTPUT_COLUMNS: [&str; 3] = ["lat", "lng", "from"];

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Location(#[from] LocationError),

    #[error("Column '{column}' not found in {}", .path.display())]
    MissingColumn { column: String, path: PathBuf },

    #[error("Failed to process table {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One input row: its passthrough columns and, once known, its coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub fields: Vec<String>,
    pub resolution: Option<RowResolution>,
}

/// The input/output table.
#[derive(Debug)]
pub struct Table {
    headers: Vec<String>,
    location_col: usize,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn load(path: &Path, location_column: &str) -> Result<Self, BatchError> {
        let file = File::open(path).map_err(|source| BatchError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file, path, location_column)
    }

    /// Parse a headed CSV table.
    ///
    /// When all of `lat`, `lng` and `from` are present, the last column of each
    /// name holds earlier results and is not passed through. A partial set is
    /// ordinary data and is kept.
    pub fn from_reader<R: Read>(
        reader: R,
        path: &Path,
        location_column: &str,
    ) -> Result<Self, BatchError> {
        let csv_err = |source: csv::Error| BatchError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let all_headers: Vec<String> = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();
        let position = |name: &str| all_headers.iter().rposition(|h| h == name);
        let previous = match OUTPUT_COLUMNS.map(position) {
            [Some(lat), Some(lng), Some(from)] => Some([lat, lng, from]),
            [None, None, None] => None,
            _ => {
                warn!(
                    "{} has only some of the {:?} columns, keeping them as input data",
                    path.display(),
                    OUTPUT_COLUMNS
                );
                None
            }
        };
        let passthrough: Vec<usize> = (0..all_headers.len())
            .filter(|i| !previous.is_some_and(|cols| cols.contains(i)))
            .collect();

        let headers: Vec<String> = passthrough.iter().map(|&i| all_headers[i].clone()).collect();
        let location_col = headers
            .iter()
            .position(|h| h == location_column)
            .ok_or_else(|| BatchError::MissingColumn {
                column: location_column.to_string(),
                path: path.to_path_buf(),
            })?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            let cell = |i: usize| record.get(i).unwrap_or("").to_string();
            let fields = passthrough.iter().map(|&i| cell(i)).collect();
            let resolution =
                previous.and_then(|[lat, lng, from]| earlier_resolution(&record, lat, lng, from));
            rows.push(Row { fields, resolution });
        }

        Ok(Self {
            headers,
            location_col,
            rows,
        })
    }

    pub fn location(&self, row: usize) -> &str {
        self.rows[row]
            .fields
            .get(self.location_col)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn resolved(&self) -> usize {
        self.rows.iter().filter(|r| r.resolution.is_some()).count()
    }

    /// Write the table with `lat`, `lng`, `from` appended; unresolved rows get
    /// blank cells. Written beside `path` and renamed over it.
    pub fn write_to(&self, path: &Path) -> Result<(), BatchError> {
        let io_err = |source: std::io::Error| BatchError::Io {
            path: path.to_path_buf(),
            source,
        };
        let csv_err = |source: csv::Error| BatchError::Csv {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp).map_err(io_err)?;
            file.write_all("\u{feff}".as_bytes()).map_err(io_err)?;
            let mut writer = csv::Writer::from_writer(file);

            let mut header = StringRecord::from(self.headers.clone());
            header.extend(OUTPUT_COLUMNS);
            writer.write_record(&header).map_err(csv_err)?;

            for row in &self.rows {
                let mut record: Vec<String> = row.fields.clone();
                record.resize(self.headers.len(), String::new());
                match &row.resolution {
                    Some(r) => {
                        record.extend([r.lat.to_string(), r.lng.to_string(), r.source.clone()])
                    }
                    None => record.extend([String::new(), String::new(), String::new()]),
                }
                writer.write_record(&record).map_err(csv_err)?;
            }
            writer.flush().map_err(io_err)?;
        }
        fs::rename(&tmp, path).map_err(io_err)
    }
}

fn earlier_resolution(
    record: &StringRecord,
    lat: usize,
    lng: usize,
    from: usize,
) -> Option<RowResolution> {
    let source = record.get(from)?.trim();
    if source.is_empty() {
        return None;
    }
    Some(RowResolution {
        lat: record.get(lat)?.trim().parse().ok()?,
        lng: record.get(lng)?.trim().parse().ok()?,
        source: source.to_string(),
    })
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub rows: usize,
    /// Rows carrying coordinates at the end of the run
    pub resolved: usize,
    /// Rows already resolved by an earlier run
    pub carried_over: usize,
    /// Provider searches issued by this run
    pub searches: usize,
}

/// Saves cache and table when dropped unless `finish` already did.
struct Checkpoint<'a> {
    cache: &'a mut SearchCache,
    table: &'a mut Table,
    output: &'a Path,
    armed: bool,
}

impl Checkpoint<'_> {
    /// Attempts both writes, even when the first one fails.
    fn flush(&mut self) -> (Result<(), BatchError>, Result<(), BatchError>) {
        let cache = self.cache.save().map_err(BatchError::from);
        let table = self.table.write_to(self.output);
        (cache, table)
    }

    fn finish(mut self) -> Result<(), BatchError> {
        self.armed = false;
        let (cache, table) = self.flush();
        // only one error can be returned
        if let (Err(_), Err(e)) = (&cache, &table) {
            error!("Failed to write output table: {}", e);
        }
        cache.and(table)
    }
}

impl Drop for Checkpoint<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(
            "Run stopped early, saving {} cached names and {} resolved rows",
            self.cache.len(),
            self.table.resolved()
        );
        let (cache, table) = self.flush();
        if let Err(e) = cache {
            error!("Failed to save search cache: {}", e);
        }
        if let Err(e) = table {
            error!("Failed to write output table: {}", e);
        }
    }
}

/// Resolve every unresolved row of `table`, then save `cache` and write the
/// table to `output`.
///
/// A provider error stops the run at the current row and is returned after
/// both files have been written.
pub fn run<G: Geocoder>(
    table: &mut Table,
    cache: &mut SearchCache,
    resolver: &mut LocationResolver<'_, G>,
    output: &Path,
    progress_every: usize,
) -> Result<BatchSummary, BatchError> {
    let searches_before = resolver.searches();
    let total = table.rows.len();
    let mut carried_over = 0;
    let mut checkpoint = Checkpoint {
        cache,
        table,
        output,
        armed: true,
    };

    for i in 0..total {
        if i > 0 && i % progress_every.max(1) == 0 {
            info!(
                "{}/{} rows complete. {} searches performed.",
                i,
                total,
                resolver.searches() - searches_before
            );
        }
        if checkpoint.table.rows[i].resolution.is_some() {
            carried_over += 1;
            continue;
        }
        let resolution = resolver.resolve(&mut *checkpoint.cache, checkpoint.table.location(i))?;
        checkpoint.table.rows[i].resolution = resolution;
    }

    let resolved = checkpoint.table.resolved();
    checkpoint.finish()?;

    Ok(BatchSummary {
        rows: total,
        resolved,
        carried_over,
        searches: resolver.searches() - searches_before,
    })
}
