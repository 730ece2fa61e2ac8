use anyhow::{Context, Result};
use clap::Parser;
use geoenrich::batch::{self, Table};
use geoenrich::config::Config;
use geoenrich::location::{Gazetteer, GeoNamesClient, LocationResolver, SearchCache};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// geoenrich — add coordinates to a table of free-text locations
///
/// Each `Location` is split on commas and resolved right to left against
/// US states, counties and cities, world countries and cities, a persistent
/// search cache, and finally GeoNames. Every GeoNames answer is cached, so
/// re-running over the same or a grown table costs almost nothing.
///
/// Examples:
///   geoenrich --input export.csv --output enriched.csv --username my_account
///   geoenrich --data-dir ./reference --offline
///   geoenrich --config geoenrich.toml -v
#[derive(Parser)]
#[command(name = "geoenrich", version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults to ./geoenrich.toml if present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input table (CSV with a Location column).
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output table. May be the same file as the input.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory holding the gazetteer and cache files.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Search cache file (relative to the data directory).
    #[arg(long)]
    cache: Option<PathBuf>,

    /// GeoNames account name.
    #[arg(long, env = "GEONAMES_USERNAME")]
    username: Option<String>,

    /// Offline mode: only use gazetteers and the search cache.
    #[arg(long)]
    offline: bool,

    /// Verbosity (-v debug, -vv trace). Ignored when RUST_LOG is set.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();

    let (config, config_path) = match Config::discover(cli.config.as_deref()) {
        Ok(found) => found,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config, cli.verbose);
    if let Some(path) = &config_path {
        info!("Using config {}", path.display());
    }

    if let Err(e) = run(cli, config) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(config: &Config, verbose: u8) {
    let level = match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli, mut config: Config) -> Result<()> {
    // ── Apply command-line overrides ────────────────────────────

    if let Some(dir) = cli.data_dir {
        config.paths.data_dir = dir;
    }
    if let Some(cache) = cli.cache {
        config.paths.cache = cache;
    }
    if let Some(input) = cli.input {
        config.paths.input = input;
    }
    if let Some(output) = cli.output {
        config.paths.output = output;
    }
    if cli.username.is_some() {
        config.geonames.username = cli.username;
    }
    if !cli.offline && config.geonames.username.is_none() {
        anyhow::bail!(
            "No GeoNames username. Use --username, GEONAMES_USERNAME, or run with --offline"
        );
    }

    // ── Load reference data, cache and table ────────────────────

    let gazetteer =
        Gazetteer::load(&config.paths.gazetteer()).context("Failed to load gazetteers")?;
    let mut cache = SearchCache::load_from(&config.paths.cache_file())
        .context("Failed to load search cache")?;
    let mut table = Table::load(&config.paths.input, &config.batch.location_column)
        .context("Failed to load input table")?;
    info!(
        "{} rows to process from {}",
        table.rows.len(),
        config.paths.input.display()
    );

    // ── Resolve ─────────────────────────────────────────────────

    let client = GeoNamesClient::new(config.geonames.clone());
    let mut resolver = LocationResolver::new(&gazetteer, client);
    resolver.set_offline(cli.offline);

    let started = Instant::now();
    let summary = batch::run(
        &mut table,
        &mut cache,
        &mut resolver,
        &config.paths.output,
        config.batch.progress_every,
    )
    .with_context(|| {
        format!(
            "Stopped after {} new searches; progress saved to {} and {}",
            resolver.searches(),
            config.paths.output.display(),
            config.paths.cache_file().display(),
        )
    })?;

    info!(
        "Done in {:.1}s: {}/{} rows resolved ({} from an earlier run). New searches: {}",
        started.elapsed().as_secs_f64(),
        summary.resolved,
        summary.rows,
        summary.carried_over,
        summary.searches,
    );
    info!("Wrote {}", config.paths.output.display());
    Ok(())
}
