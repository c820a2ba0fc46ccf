//! Command line front ends shared by the binaries.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Args, Parser};
use std::path::{Path, PathBuf};

use crate::area::MultipolygonManager;
use crate::extract::{CsvExtractor, FeatureExtractor, Profile};
use crate::filter::{TagRuleSet, load_expressions};
use crate::names::RiverNameTable;
use crate::pipeline::{RunStats, TwoPassDriver, run_single_pass};
use crate::sinks::{OutputFormat, open_dataset};
use crate::source::{self, Source};
use crate::storage::{LocationStore, LocationStoreKind, STORE_TYPES};

/// Options every converter accepts.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Output format (SQLite, GeoJSON, GeoJSONSeq, Parquet)
    #[arg(short = 'f', long = "format", value_name = "FORMAT", default_value = "SQLite")]
    pub format: String,

    /// Location store type, optionally followed by ",FILE"
    #[arg(
        short = 'l',
        long = "location_store",
        value_name = "TYPE",
        default_value = "flex_mem"
    )]
    pub location_store: String,

    /// Show available location store types
    #[arg(short = 'L', long = "list_location_stores")]
    pub list_location_stores: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// OSM input file, `-` reads standard input
    #[arg(value_name = "INFILE", default_value = "-")]
    pub infile: PathBuf,

    /// Output file or directory
    #[arg(value_name = "OUTFILE", default_value = "ogr_out")]
    pub outfile: PathBuf,
}

/// Convert places, peaks, roads, railways and boundaries to GIS layers.
#[derive(Parser, Debug)]
#[command(name = "toogr", version, about)]
pub struct ToogrCli {
    #[command(flatten)]
    pub common: CommonArgs,
}

/// Convert `natural=water` areas, including multipolygons, to a GIS layer.
#[derive(Parser, Debug)]
#[command(name = "toogr-water", version, about)]
pub struct WaterCli {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Enable debug output, including area assembly
    #[arg(short, long)]
    pub debug: bool,
}

/// Convert waterways to a GIS layer tagged with their river system.
#[derive(Parser, Debug)]
#[command(name = "rivermap", version, about)]
pub struct RiverCli {
    #[command(flatten)]
    pub common: CommonArgs,

    /// CSV file with `id,rsystem` rows
    #[arg(short = 'r', long = "riversystems", value_name = "FILE")]
    pub riversystems: Option<PathBuf>,
}

/// Write ids and node ids of tag-filtered ways and areas to two CSV files.
#[derive(Parser, Debug)]
#[command(name = "waterway-ids", version, about)]
pub struct WaterwayIdsCli {
    /// Location store type, optionally followed by ",FILE"
    #[arg(
        short = 'l',
        long = "location_store",
        value_name = "TYPE",
        default_value = "flex_mem"
    )]
    pub location_store: String,

    /// Show available location store types
    #[arg(short = 'L', long = "list_location_stores")]
    pub list_location_stores: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// OSM input file, `-` reads standard input
    #[arg(value_name = "OSMFILE", required_unless_present = "list_location_stores")]
    pub osmfile: Option<PathBuf>,

    /// Tag filter expressions, one per line
    #[arg(value_name = "FILTERFILE", required_unless_present = "list_location_stores")]
    pub filterfile: Option<PathBuf>,

    /// Output CSV for ways tagged `waterway`
    #[arg(value_name = "WAYS_CSV", required_unless_present = "list_location_stores")]
    pub ways_csv: Option<PathBuf>,

    /// Output CSV for all other ways and areas
    #[arg(value_name = "AREAS_CSV", required_unless_present = "list_location_stores")]
    pub areas_csv: Option<PathBuf>,
}

/// Parse the command line. Help and version go to stdout with exit code 0,
/// usage errors to stderr with exit code 1.
pub fn parse_args<C: Parser>() -> C {
    match C::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    }
}

pub fn init_logging(level: tracing::Level) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn log_level(verbose: bool, debug: bool) -> tracing::Level {
    if debug {
        tracing::Level::DEBUG
    } else if verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    }
}

pub fn print_location_stores() {
    println!("Available map types:");
    for name in STORE_TYPES {
        println!("  {}", name);
    }
}

/// Where a run writes its results.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Dataset { path: PathBuf, format: OutputFormat },
    Csv { ways: PathBuf, areas: PathBuf },
}

/// Everything a run needs, validated once up front.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input: PathBuf,
    pub output: Output,
    pub location_store: LocationStoreKind,
    pub filter: Option<PathBuf>,
    pub riversystems: Option<PathBuf>,
    pub log_level: tracing::Level,
}

impl RunConfig {
    pub fn from_common(common: &CommonArgs, log_level: tracing::Level) -> Result<Self> {
        let format: OutputFormat = common.format.parse()?;
        let location_store: LocationStoreKind = common.location_store.parse()?;
        Ok(Self {
            input: common.infile.clone(),
            output: Output::Dataset {
                path: common.outfile.clone(),
                format,
            },
            location_store,
            filter: None,
            riversystems: None,
            log_level,
        })
    }

    pub fn from_waterway_ids(cli: &WaterwayIdsCli) -> Result<Self> {
        let positional = |value: &Option<PathBuf>, name: &str| {
            value
                .clone()
                .with_context(|| format!("Missing {} argument", name))
        };
        Ok(Self {
            input: positional(&cli.osmfile, "OSMFILE")?,
            output: Output::Csv {
                ways: positional(&cli.ways_csv, "WAYS_CSV")?,
                areas: positional(&cli.areas_csv, "AREAS_CSV")?,
            },
            location_store: cli.location_store.parse()?,
            filter: Some(positional(&cli.filterfile, "FILTERFILE")?),
            riversystems: None,
            log_level: log_level(cli.verbose, false),
        })
    }

    fn dataset(&self) -> Result<(&Path, OutputFormat)> {
        match &self.output {
            Output::Dataset { path, format } => Ok((path, *format)),
            Output::Csv { .. } => anyhow::bail!("Run has no dataset output"),
        }
    }
}

fn open_store(config: &RunConfig) -> Result<LocationStore> {
    tracing::info!("Location store: {}", config.location_store.label());
    LocationStore::create(&config.location_store)
        .with_context(|| format!("Failed to create {} store", config.location_store.label()))
}

fn open_source(config: &RunConfig) -> Result<Box<dyn Source>> {
    let source = source::open(&config.input)
        .with_context(|| format!("Failed to open input {:?}", config.input))?;
    Ok(Box::new(source))
}

fn open_single_pass_source(config: &RunConfig) -> Result<Box<dyn Source>> {
    source::open_once(&config.input)
        .with_context(|| format!("Failed to open input {:?}", config.input))
}

pub fn run_toogr(cli: &ToogrCli) -> Result<()> {
    if cli.common.list_location_stores {
        print_location_stores();
        return Ok(());
    }
    let config = RunConfig::from_common(&cli.common, log_level(cli.common.verbose, false))?;
    init_logging(config.log_level);

    let source = open_single_pass_source(&config)?;
    let (path, format) = config.dataset()?;
    let dataset = open_dataset(format, path)?;
    let mut extractor = FeatureExtractor::new(dataset, Profile::Basemap, RiverNameTable::new())?;
    let mut store = open_store(&config)?;

    run_single_pass(source.as_ref(), &mut store, &mut extractor)?;
    Ok(())
}

pub fn run_water(cli: &WaterCli) -> Result<()> {
    if cli.common.list_location_stores {
        print_location_stores();
        return Ok(());
    }
    let config = RunConfig::from_common(&cli.common, log_level(cli.common.verbose, cli.debug))?;
    init_logging(config.log_level);

    let source = open_source(&config)?;
    let (path, format) = config.dataset()?;
    let dataset = open_dataset(format, path)?;
    let mut extractor = FeatureExtractor::new(dataset, Profile::Water, RiverNameTable::new())?;
    let mut store = open_store(&config)?;
    let mut manager = MultipolygonManager::new(TagRuleSet::accept_all());

    TwoPassDriver::new(&mut store, &mut manager, &mut extractor).run(source.as_ref())?;
    Ok(())
}

pub fn run_rivermap(cli: &RiverCli) -> Result<()> {
    if cli.common.list_location_stores {
        print_location_stores();
        return Ok(());
    }
    let mut config = RunConfig::from_common(&cli.common, log_level(cli.common.verbose, false))?;
    config.riversystems = cli.riversystems.clone();
    init_logging(config.log_level);

    let source = open_single_pass_source(&config)?;
    let rivers = match &config.riversystems {
        Some(path) => RiverNameTable::load(path)?,
        None => {
            tracing::warn!("No river systems file given, rsystem will be empty");
            RiverNameTable::new()
        }
    };
    let (path, format) = config.dataset()?;
    let dataset = open_dataset(format, path)?;
    let mut extractor = FeatureExtractor::new(dataset, Profile::Rivers, rivers)?;
    let mut store = open_store(&config)?;

    run_single_pass(source.as_ref(), &mut store, &mut extractor)?;
    Ok(())
}

pub fn run_waterway_ids(cli: &WaterwayIdsCli) -> Result<RunStats> {
    if cli.list_location_stores {
        print_location_stores();
        return Ok(RunStats::default());
    }
    let config = RunConfig::from_waterway_ids(cli)?;
    init_logging(config.log_level);

    let source = open_source(&config)?;
    let filter = match &config.filter {
        Some(path) => load_expressions(path)?,
        None => TagRuleSet::accept_all(),
    };
    let Output::Csv { ways, areas } = &config.output else {
        anyhow::bail!("waterway-ids writes CSV output only");
    };
    let mut extractor = CsvExtractor::create(filter.clone(), ways, areas)?;
    let mut store = open_store(&config)?;
    let mut manager = MultipolygonManager::new(filter);

    TwoPassDriver::new(&mut store, &mut manager, &mut extractor).run(source.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definitions_are_consistent() {
        ToogrCli::command().debug_assert();
        WaterCli::command().debug_assert();
        RiverCli::command().debug_assert();
        WaterwayIdsCli::command().debug_assert();
    }

    #[test]
    fn defaults_apply_without_positionals() {
        let cli = ToogrCli::try_parse_from(["toogr"]).unwrap();
        let config = RunConfig::from_common(&cli.common, tracing::Level::WARN).unwrap();
        assert_eq!(config.input, PathBuf::from("-"));
        assert_eq!(
            config.output,
            Output::Dataset {
                path: PathBuf::from("ogr_out"),
                format: OutputFormat::Sqlite
            }
        );
        assert_eq!(config.location_store, LocationStoreKind::FlexMem);
    }

    #[test]
    fn third_positional_is_rejected() {
        assert!(ToogrCli::try_parse_from(["toogr", "a.osm", "out", "extra"]).is_err());
    }

    #[test]
    fn format_and_store_are_validated() {
        let cli = RiverCli::try_parse_from([
            "rivermap",
            "-f",
            "geojson",
            "-l",
            "sparse_mem_array",
            "-r",
            "rs.csv",
            "in.osm",
            "out",
        ])
        .unwrap();
        let config = RunConfig::from_common(&cli.common, tracing::Level::WARN).unwrap();
        assert_eq!(config.location_store, LocationStoreKind::SparseMemArray);
        assert!(matches!(
            config.output,
            Output::Dataset {
                format: OutputFormat::GeoJson,
                ..
            }
        ));
        assert_eq!(cli.riversystems, Some(PathBuf::from("rs.csv")));

        let bad = ToogrCli::try_parse_from(["toogr", "-f", "Shapefile"]).unwrap();
        let err = RunConfig::from_common(&bad.common, tracing::Level::WARN).unwrap_err();
        assert!(err.to_string().contains("Unknown output format"));
    }

    #[test]
    fn waterway_ids_needs_four_positionals() {
        assert!(WaterwayIdsCli::try_parse_from(["waterway-ids", "a.osm", "f.txt"]).is_err());
        let cli = WaterwayIdsCli::try_parse_from([
            "waterway-ids",
            "a.osm",
            "f.txt",
            "w.csv",
            "a.csv",
        ])
        .unwrap();
        let config = RunConfig::from_waterway_ids(&cli).unwrap();
        assert_eq!(config.filter, Some(PathBuf::from("f.txt")));
        assert!(matches!(config.output, Output::Csv { .. }));

        let listed = WaterwayIdsCli::try_parse_from(["waterway-ids", "-L"]).unwrap();
        assert!(listed.list_location_stores);
    }

    #[test]
    fn debug_flag_wins_over_verbose() {
        assert_eq!(log_level(true, true), tracing::Level::DEBUG);
        assert_eq!(log_level(true, false), tracing::Level::INFO);
        assert_eq!(log_level(false, false), tracing::Level::WARN);
    }
}
