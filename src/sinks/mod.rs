//! Output datasets. A dataset owns one or more typed layers; features are
//! added to a layer by the index `create_layer` returned.

use anyhow::{Context, Result};
use geo_types::Geometry;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Error;

pub mod geojson;
pub mod geojsonl;
pub mod geoparquet;
pub mod sqlite;

pub use self::geojson::GeoJsonSink;
pub use self::geojsonl::GeoJsonlSink;
pub use self::geoparquet::GeoParquetSink;
pub use self::sqlite::SqliteDataset;

#[derive(Clone, Debug, PartialEq)]
pub enum ColumnValue {
    String(String),
    Integer(i64),
    Real(f64),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Integer,
    Real,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub col_type: ColumnType,
    pub width: usize,
}

impl FieldSpec {
    pub fn new(name: &str, col_type: ColumnType, width: usize) -> Self {
        Self {
            name: name.to_string(),
            col_type,
            width,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GeometryType {
    Point,
    LineString,
    MultiPolygon,
}

impl GeometryType {
    pub fn as_str(self) -> &'static str {
        match self {
            GeometryType::Point => "Point",
            GeometryType::LineString => "LineString",
            GeometryType::MultiPolygon => "MultiPolygon",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerSchema {
    pub name: String,
    pub geometry_type: GeometryType,
    pub fields: Vec<FieldSpec>,
}

#[derive(Clone, Debug)]
pub struct FeatureRow {
    pub geometry: Geometry<f64>,
    pub columns: HashMap<String, ColumnValue>,
}

impl FeatureRow {
    pub fn new(geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            geometry: geometry.into(),
            columns: HashMap::new(),
        }
    }

    pub fn set(&mut self, name: &str, value: ColumnValue) -> &mut Self {
        self.columns.insert(name.to_string(), value);
        self
    }

    pub fn set_str(&mut self, name: &str, value: &str) -> &mut Self {
        self.set(name, ColumnValue::String(value.to_string()))
    }
}

/// A single-layer writer for one output file.
pub trait DataSink {
    fn add_feature(&mut self, row: FeatureRow) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

pub type LayerId = usize;

pub trait Dataset {
    fn create_layer(&mut self, schema: &LayerSchema) -> Result<LayerId>;
    fn add_feature(&mut self, layer: LayerId, row: FeatureRow) -> Result<()>;
    /// Flush and close everything. Features added afterwards are an error.
    fn finish(&mut self) -> Result<()>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Sqlite,
    GeoJson,
    GeoJsonSeq,
    Parquet,
}

/// Driver names accepted by `-f`, compared case-insensitively.
pub const FORMATS: &[&str] = &["SQLite", "GeoJSON", "GeoJSONSeq", "Parquet"];

impl OutputFormat {
    pub fn label(self) -> &'static str {
        match self {
            OutputFormat::Sqlite => "SQLite",
            OutputFormat::GeoJson => "GeoJSON",
            OutputFormat::GeoJsonSeq => "GeoJSONSeq",
            OutputFormat::Parquet => "Parquet",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Sqlite => "sqlite",
            OutputFormat::GeoJson => "geojson",
            OutputFormat::GeoJsonSeq => "geojsonl",
            OutputFormat::Parquet => "parquet",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(OutputFormat::Sqlite),
            "geojson" => Ok(OutputFormat::GeoJson),
            "geojsonseq" | "geojsonl" => Ok(OutputFormat::GeoJsonSeq),
            "parquet" | "geoparquet" => Ok(OutputFormat::Parquet),
            _ => Err(Error::UnknownFormat {
                name: value.to_string(),
                available: FORMATS.join(", "),
            }),
        }
    }
}

/// Create the output dataset at `path`.
///
/// SQLite writes a single database file. The other drivers treat `path` as
/// a directory holding one file per layer.
pub fn open_dataset(format: OutputFormat, path: &Path) -> Result<Box<dyn Dataset>> {
    tracing::info!("Output: {} -> {:?}", format, path);
    match format {
        OutputFormat::Sqlite => Ok(Box::new(SqliteDataset::create(path)?)),
        _ => Ok(Box::new(DirectoryDataset::create(format, path)?)),
    }
}

/// One file-per-layer sink inside an output directory.
pub struct DirectoryDataset {
    format: OutputFormat,
    dir: PathBuf,
    layers: Vec<(String, Box<dyn DataSink>)>,
    finished: bool,
}

impl DirectoryDataset {
    pub fn create(format: OutputFormat, dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Output: Failed to create directory {:?}", dir))?;
        Ok(Self {
            format,
            dir: dir.to_path_buf(),
            layers: Vec::new(),
            finished: false,
        })
    }
}

impl Dataset for DirectoryDataset {
    fn create_layer(&mut self, schema: &LayerSchema) -> Result<LayerId> {
        let path = self
            .dir
            .join(format!("{}.{}", schema.name, self.format.extension()));
        let sink: Box<dyn DataSink> = match self.format {
            OutputFormat::GeoJson => Box::new(GeoJsonSink::new(&path)?),
            OutputFormat::GeoJsonSeq => Box::new(GeoJsonlSink::new(&path)?),
            OutputFormat::Parquet => Box::new(GeoParquetSink::new(&path, schema)?),
            OutputFormat::Sqlite => {
                anyhow::bail!("Output: SQLite layers are not written to a directory")
            }
        };
        tracing::debug!("Layer {} -> {:?}", schema.name, path);
        self.layers.push((schema.name.clone(), sink));
        Ok(self.layers.len() - 1)
    }

    fn add_feature(&mut self, layer: LayerId, row: FeatureRow) -> Result<()> {
        if self.finished {
            anyhow::bail!("Output: Dataset already finished");
        }
        let (name, sink) = self
            .layers
            .get_mut(layer)
            .with_context(|| format!("Output: Unknown layer index {}", layer))?;
        sink.add_feature(row)
            .with_context(|| format!("Output: Failed to write feature to layer {}", name))
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        for (name, sink) in &mut self.layers {
            sink.finish()
                .with_context(|| format!("Output: Failed to finish layer {}", name))?;
        }
        Ok(())
    }
}
