use super::geojson::to_feature;
use super::{DataSink, FeatureRow};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Newline-delimited GeoJSON, one feature per line.
pub struct GeoJsonlSink {
    writer: BufWriter<File>,
}

impl GeoJsonlSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create GeoJSONSeq file {:?}", path.as_ref()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl DataSink for GeoJsonlSink {
    fn add_feature(&mut self, row: FeatureRow) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &to_feature(row))?;
        writeln!(self.writer)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::Point;

    #[test]
    fn one_feature_per_line() {
        let temp_file = tempfile::NamedTempFile::with_suffix(".geojsonl").unwrap();
        let mut sink = GeoJsonlSink::new(temp_file.path()).unwrap();
        for i in 0..3 {
            let mut row = FeatureRow::new(Point::new(i as f64, 0.0));
            row.set_str("name", &format!("n{i}"));
            sink.add_feature(row).unwrap();
        }
        sink.finish().unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "Feature");
        assert_eq!(second["properties"]["name"], "n1");
    }
}
