use super::{ColumnValue, DataSink, FeatureRow};
use anyhow::{Context, Result};
use geojson::{Feature, GeoJson};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Streams one layer as a GeoJSON FeatureCollection.
pub struct GeoJsonSink {
    writer: BufWriter<File>,
    first_feature: bool,
    finished: bool,
}

impl GeoJsonSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create GeoJSON file {:?}", path.as_ref()))?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "{{")?;
        writeln!(writer, "  \"type\": \"FeatureCollection\",")?;
        writeln!(writer, "  \"features\": [")?;

        Ok(Self {
            writer,
            first_feature: true,
            finished: false,
        })
    }

    fn write_footer(&mut self) -> Result<()> {
        writeln!(self.writer)?;
        writeln!(self.writer, "  ]")?;
        writeln!(self.writer, "}}")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Shared with the GeoJSON sequence sink.
pub(super) fn to_feature(row: FeatureRow) -> GeoJson {
    let mut properties = Map::new();
    for (name, value) in row.columns {
        let json_value = match value {
            ColumnValue::String(val) => Value::String(val),
            ColumnValue::Integer(val) => Value::from(val),
            ColumnValue::Real(val) => Value::from(val),
        };
        properties.insert(name, json_value);
    }

    GeoJson::Feature(Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::from(&row.geometry)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    })
}

impl DataSink for GeoJsonSink {
    fn add_feature(&mut self, row: FeatureRow) -> Result<()> {
        if !self.first_feature {
            writeln!(self.writer, ",")?;
        }
        self.first_feature = false;
        serde_json::to_writer(&mut self.writer, &to_feature(row))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.write_footer()
    }
}

/// Closes the collection when the sink is dropped unfinished.
impl Drop for GeoJsonSink {
    fn drop(&mut self) {
        if !self.finished
            && let Err(err) = self.write_footer()
        {
            tracing::warn!("Failed to close GeoJSON file: {:#}", err);
        }
    }
}
