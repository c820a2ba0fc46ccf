use super::{ColumnType, ColumnValue, Dataset, FeatureRow, GeometryType, LayerId, LayerSchema};
use anyhow::{Context, Result, bail};
use geozero::{CoordDimensions, ToWkb};
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};
use std::path::Path;

const WGS84_WKT: &str = "GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563]],\
PRIMEM[\"Greenwich\",0],UNIT[\"degree\",0.0174532925199433],AUTHORITY[\"EPSG\",\"4326\"]]";

struct SqliteLayer {
    name: String,
    insert_sql: String,
    fields: Vec<(String, ColumnType)>,
    count: u64,
}

/// A SQLite database with one table per layer.
///
/// Tables follow the plain (non-Spatialite) OGR layout: an `ogc_fid`
/// primary key, a `GEOMETRY` WKB blob and the layer's fields, registered
/// in `geometry_columns`. All writes happen in one transaction committed
/// by [`Dataset::finish`] or, failing that, on drop.
pub struct SqliteDataset {
    conn: Option<Connection>,
    layers: Vec<SqliteLayer>,
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn ogr_geometry_code(geometry_type: GeometryType) -> i64 {
    match geometry_type {
        GeometryType::Point => 1,
        GeometryType::LineString => 2,
        GeometryType::MultiPolygon => 6,
    }
}

impl SqliteDataset {
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            bail!("Output file {:?} already exists", path);
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to create SQLite database {:?}", path))?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.execute_batch(
            "BEGIN;
             CREATE TABLE geometry_columns (
                 f_table_name VARCHAR,
                 f_geometry_column VARCHAR,
                 geometry_type INTEGER,
                 coord_dimension INTEGER,
                 srid INTEGER,
                 geometry_format VARCHAR);
             CREATE TABLE spatial_ref_sys (
                 srid INTEGER UNIQUE,
                 auth_name TEXT,
                 auth_srid TEXT,
                 srtext TEXT);",
        )?;
        conn.execute(
            "INSERT INTO spatial_ref_sys (srid, auth_name, auth_srid, srtext) VALUES (4326, 'EPSG', '4326', ?1)",
            params![WGS84_WKT],
        )?;

        Ok(Self {
            conn: Some(conn),
            layers: Vec::new(),
        })
    }

    fn commit(conn: Connection, layers: &[SqliteLayer]) -> Result<()> {
        conn.execute_batch("COMMIT")?;
        for layer in layers {
            tracing::info!("Layer {}: {} features", layer.name, layer.count);
        }
        conn.close().map_err(|(_, err)| err)?;
        Ok(())
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .context("Output: SQLite dataset already finished")
    }
}

impl Dataset for SqliteDataset {
    fn create_layer(&mut self, schema: &LayerSchema) -> Result<LayerId> {
        let conn = self.conn()?;

        let mut columns = vec![
            "ogc_fid INTEGER PRIMARY KEY".to_string(),
            "GEOMETRY BLOB".to_string(),
        ];
        for field in &schema.fields {
            let sql_type = match field.col_type {
                ColumnType::String => format!("VARCHAR({})", field.width),
                ColumnType::Integer => "INTEGER".to_string(),
                ColumnType::Real => "FLOAT".to_string(),
            };
            columns.push(format!("{} {}", quote(&field.name), sql_type));
        }
        conn.execute_batch(&format!(
            "CREATE TABLE {} ({})",
            quote(&schema.name),
            columns.join(", ")
        ))
        .with_context(|| format!("Failed to create layer {}", schema.name))?;
        conn.execute(
            "INSERT INTO geometry_columns VALUES (?1, 'GEOMETRY', ?2, 2, 4326, 'WKB')",
            params![schema.name, ogr_geometry_code(schema.geometry_type)],
        )?;

        let names: Vec<String> = schema.fields.iter().map(|f| quote(&f.name)).collect();
        let placeholders: Vec<String> = (0..=schema.fields.len())
            .map(|i| format!("?{}", i + 1))
            .collect();
        let insert_sql = format!(
            "INSERT INTO {} (GEOMETRY{}{}) VALUES ({})",
            quote(&schema.name),
            if names.is_empty() { "" } else { ", " },
            names.join(", "),
            placeholders.join(", ")
        );

        self.layers.push(SqliteLayer {
            name: schema.name.clone(),
            insert_sql,
            fields: schema
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.col_type))
                .collect(),
            count: 0,
        });
        Ok(self.layers.len() - 1)
    }

    fn add_feature(&mut self, layer: LayerId, row: FeatureRow) -> Result<()> {
        let conn = self
            .conn
            .as_ref()
            .context("Output: SQLite dataset already finished")?;
        let target = self
            .layers
            .get_mut(layer)
            .with_context(|| format!("Output: Unknown layer index {}", layer))?;

        let wkb = row
            .geometry
            .to_wkb(CoordDimensions::xy())
            .context("Failed to convert geometry to WKB")?;
        let mut values = Vec::with_capacity(target.fields.len() + 1);
        values.push(Value::Blob(wkb));
        for (name, col_type) in &target.fields {
            values.push(match (row.columns.get(name), col_type) {
                (None, _) => Value::Null,
                (Some(ColumnValue::String(s)), _) => Value::Text(s.clone()),
                (Some(ColumnValue::Integer(n)), ColumnType::Real) => Value::Real(*n as f64),
                (Some(ColumnValue::Integer(n)), _) => Value::Integer(*n),
                (Some(ColumnValue::Real(n)), ColumnType::Integer) => Value::Integer(*n as i64),
                (Some(ColumnValue::Real(n)), _) => Value::Real(*n),
            });
        }

        let mut stmt = conn.prepare_cached(&target.insert_sql)?;
        stmt.execute(params_from_iter(values))
            .with_context(|| format!("Failed to insert into layer {}", target.name))?;
        target.count += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        Self::commit(conn, &self.layers)
    }
}

/// Commits whatever was written when the dataset is dropped unfinished,
/// e.g. after an error aborted the run.
impl Drop for SqliteDataset {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take()
            && let Err(err) = Self::commit(conn, &self.layers)
        {
            tracing::warn!("Failed to commit SQLite dataset: {:#}", err);
        }
    }
}
