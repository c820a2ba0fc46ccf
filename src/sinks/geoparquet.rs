use super::{ColumnType, ColumnValue, DataSink, FeatureRow, LayerSchema};
use anyhow::{Context, Result, bail};
use arrow_array::builder::{BinaryBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::{DataType, Field, Schema};
use geozero::{CoordDimensions, ToWkb};
use parquet::arrow::ArrowWriter;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

const BATCH_ROWS: usize = 10_000;

/// Arrow builder for one attribute column, typed from the layer schema.
enum ColumnBuilder {
    String(StringBuilder),
    Integer(Int64Builder),
    Real(Float64Builder),
}

struct LayerColumn {
    name: String,
    builder: ColumnBuilder,
}

impl LayerColumn {
    fn new(name: &str, col_type: ColumnType) -> Self {
        let builder = match col_type {
            ColumnType::String => ColumnBuilder::String(StringBuilder::new()),
            ColumnType::Integer => ColumnBuilder::Integer(Int64Builder::new()),
            ColumnType::Real => ColumnBuilder::Real(Float64Builder::new()),
        };
        Self {
            name: name.to_string(),
            builder,
        }
    }

    fn data_type(&self) -> DataType {
        match self.builder {
            ColumnBuilder::String(_) => DataType::Utf8,
            ColumnBuilder::Integer(_) => DataType::Int64,
            ColumnBuilder::Real(_) => DataType::Float64,
        }
    }

    /// Integers widen into real columns; any other mismatch is an error.
    fn check(&self, value: Option<&ColumnValue>) -> Result<()> {
        let ok = matches!(
            (&self.builder, value),
            (_, None)
                | (ColumnBuilder::String(_), Some(ColumnValue::String(_)))
                | (ColumnBuilder::Integer(_), Some(ColumnValue::Integer(_)))
                | (ColumnBuilder::Real(_), Some(ColumnValue::Real(_) | ColumnValue::Integer(_)))
        );
        if !ok {
            bail!(
                "Column {} ({}) cannot hold {:?}",
                self.name,
                self.data_type(),
                value
            );
        }
        Ok(())
    }

    /// Append a value already accepted by [`LayerColumn::check`].
    fn append(&mut self, value: Option<&ColumnValue>) {
        match (&mut self.builder, value) {
            (ColumnBuilder::String(b), Some(ColumnValue::String(v))) => b.append_value(v),
            (ColumnBuilder::Integer(b), Some(ColumnValue::Integer(v))) => b.append_value(*v),
            (ColumnBuilder::Real(b), Some(ColumnValue::Real(v))) => b.append_value(*v),
            (ColumnBuilder::Real(b), Some(ColumnValue::Integer(v))) => b.append_value(*v as f64),
            (ColumnBuilder::String(b), _) => b.append_null(),
            (ColumnBuilder::Integer(b), _) => b.append_null(),
            (ColumnBuilder::Real(b), _) => b.append_null(),
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match &mut self.builder {
            ColumnBuilder::String(b) => Arc::new(b.finish()),
            ColumnBuilder::Integer(b) => Arc::new(b.finish()),
            ColumnBuilder::Real(b) => Arc::new(b.finish()),
        }
    }
}

/// One layer as a GeoParquet file with a WKB `geometry` column.
pub struct GeoParquetSink {
    writer: Option<ArrowWriter<File>>,
    schema: Arc<Schema>,
    geometry: BinaryBuilder,
    columns: Vec<LayerColumn>,
    pending: usize,
    batch_rows: usize,
}

impl GeoParquetSink {
    pub fn new<P: AsRef<Path>>(path: P, layer: &LayerSchema) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create geoparquet file {:?}", path.as_ref()))?;

        let columns: Vec<LayerColumn> = layer
            .fields
            .iter()
            .map(|field| LayerColumn::new(&field.name, field.col_type))
            .collect();

        let mut fields = vec![Field::new("geometry", DataType::Binary, false)];
        fields.extend(
            columns
                .iter()
                .map(|column| Field::new(&column.name, column.data_type(), true)),
        );
        let schema = Arc::new(Schema::new(fields));

        let geo_metadata = serde_json::json!({
            "version": "1.0.0",
            "primary_column": "geometry",
            "columns": {
                "geometry": {
                    "encoding": "WKB",
                    "geometry_types": [layer.geometry_type.as_str()],
                    "crs": "EPSG:4326"
                }
            }
        })
        .to_string();

        let props = WriterProperties::builder()
            .set_key_value_metadata(Some(vec![KeyValue::new("geo".to_string(), Some(geo_metadata))]))
            .build();
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

        Ok(Self {
            writer: Some(writer),
            schema,
            geometry: BinaryBuilder::new(),
            columns,
            pending: 0,
            batch_rows: BATCH_ROWS,
        })
    }

    fn write_batch(&mut self) -> Result<()> {
        if self.pending == 0 {
            return Ok(());
        }
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.columns.len() + 1);
        arrays.push(Arc::new(self.geometry.finish()));
        arrays.extend(self.columns.iter_mut().map(LayerColumn::finish));
        let batch = RecordBatch::try_new(self.schema.clone(), arrays)?;
        self.pending = 0;

        let writer = self
            .writer
            .as_mut()
            .context("Output: GeoParquet layer already finished")?;
        writer.write(&batch)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.write_batch()?;
        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }
        Ok(())
    }
}

impl DataSink for GeoParquetSink {
    fn add_feature(&mut self, row: FeatureRow) -> Result<()> {
        let wkb = row
            .geometry
            .to_wkb(CoordDimensions::xy())
            .context("Failed to convert geometry to WKB")?;

        for column in &self.columns {
            column.check(row.columns.get(&column.name))?;
        }
        for column in &mut self.columns {
            column.append(row.columns.get(&column.name));
        }
        self.geometry.append_value(wkb);
        self.pending += 1;

        if self.pending >= self.batch_rows {
            self.write_batch()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.close()
    }
}

/// Writes buffered rows and the file footer when dropped unfinished.
impl Drop for GeoParquetSink {
    fn drop(&mut self) {
        if self.writer.is_some()
            && let Err(err) = self.close()
        {
            tracing::warn!("Failed to close GeoParquet file: {:#}", err);
        }
    }
}
