use anyhow::{Context, Result};
use std::collections::HashMap;

use super::Handler;
use super::layers::{Layer, Profile};
use crate::geometry;
use crate::names::RiverNameTable;
use crate::osm::{Area, Entity, Node, Tags, Way};
use crate::sinks::{ColumnValue, Dataset, FeatureRow, LayerId};

/// `admin_level` of a boundary way without a usable value.
pub const UNKNOWN_ADMIN_LEVEL: i64 = 99;

#[derive(Debug, Default, Clone)]
pub struct ExtractStats {
    pub written: HashMap<Layer, u64>,
    pub skipped: u64,
}

/// Writes typed features for the layers of a [`Profile`] into a dataset.
pub struct FeatureExtractor {
    dataset: Box<dyn Dataset>,
    layers: HashMap<Layer, LayerId>,
    rivers: RiverNameTable,
    stats: ExtractStats,
}

impl FeatureExtractor {
    pub fn new(
        mut dataset: Box<dyn Dataset>,
        profile: Profile,
        rivers: RiverNameTable,
    ) -> Result<Self> {
        let mut layers = HashMap::new();
        for layer in profile.layers() {
            let id = dataset
                .create_layer(&layer.schema())
                .with_context(|| format!("Failed to create layer {}", layer.name()))?;
            layers.insert(*layer, id);
        }
        Ok(Self {
            dataset,
            layers,
            rivers,
            stats: ExtractStats::default(),
        })
    }

    pub fn stats(&self) -> &ExtractStats {
        &self.stats
    }

    fn enabled(&self, layer: Layer) -> bool {
        self.layers.contains_key(&layer)
    }

    fn write(&mut self, layer: Layer, row: FeatureRow) -> Result<()> {
        let Some(id) = self.layers.get(&layer) else {
            return Ok(());
        };
        self.dataset.add_feature(*id, row)?;
        *self.stats.written.entry(layer).or_default() += 1;
        Ok(())
    }

    fn node(&mut self, node: &Node) -> Result<()> {
        let tags = &node.tags;
        let layer = match (value(tags, "place"), value(tags, "natural")) {
            (Some("town" | "city"), _) if self.enabled(Layer::Places) => Layer::Places,
            (_, Some("peak")) if self.enabled(Layer::Peaks) => Layer::Peaks,
            _ => return Ok(()),
        };

        let mut row = FeatureRow::new(geometry::point(node));
        row.set("id", ColumnValue::Real(node.id as f64));
        match layer {
            Layer::Places => {
                set_tag(&mut row, "type", tags, "place");
                set_tag(&mut row, "name", tags, "name");
            }
            _ => {
                set_tag(&mut row, "type", tags, "natural");
                set_tag(&mut row, "name", tags, "name");
                set_tag(&mut row, "ele", tags, "ele");
                set_tag(&mut row, "importance", tags, "importance");
            }
        }
        self.write(layer, row)
    }

    fn way(&mut self, way: &Way) -> Result<()> {
        let Some(layer) = classify_way(&way.tags, |layer| self.enabled(layer)) else {
            return Ok(());
        };

        let line = match geometry::linestring(way) {
            Ok(line) => line,
            Err(err) => {
                self.stats.skipped += 1;
                tracing::warn!("Ignoring illegal geometry for way {}: {}", way.id, err);
                return Ok(());
            }
        };

        let tags = &way.tags;
        let mut row = FeatureRow::new(line);
        row.set("id", ColumnValue::Real(way.id as f64));
        match layer {
            Layer::Waterway => {
                set_tag(&mut row, "name", tags, "name");
                set_tag(&mut row, "type", tags, "waterway");
                row.set_str("rsystem", self.rivers.lookup(way.id));
            }
            Layer::Roads => {
                set_tag(&mut row, "type", tags, "highway");
                set_tag(&mut row, "name", tags, "name");
                set_tag(&mut row, "ref", tags, "ref");
            }
            Layer::Boundaries => {
                let level = value(tags, "admin_level")
                    .and_then(parse_leading_int)
                    .unwrap_or(UNKNOWN_ADMIN_LEVEL);
                row.set("level", ColumnValue::Integer(level));
            }
            _ => {}
        }
        self.write(layer, row)
    }

    fn area(&mut self, area: &Area) -> Result<()> {
        if !self.enabled(Layer::Water) || value(&area.tags, "natural") != Some("water") {
            return Ok(());
        }

        let polygons = match geometry::multipolygon(area) {
            Ok(polygons) => polygons,
            Err(err) => {
                self.stats.skipped += 1;
                tracing::warn!(
                    "Ignoring illegal geometry for area {} created from {} with id={}: {}",
                    area.id,
                    area.origin,
                    area.orig_id,
                    err
                );
                return Ok(());
            }
        };

        let mut row = FeatureRow::new(polygons);
        row.set("id", ColumnValue::Real(area.id as f64));
        set_tag(&mut row, "type", &area.tags, "natural");
        set_tag(&mut row, "name", &area.tags, "name");
        self.write(Layer::Water, row)
    }
}

impl Handler for FeatureExtractor {
    fn process(&mut self, entity: Entity<'_>) -> Result<()> {
        match entity {
            Entity::Node(node) => self.node(node),
            Entity::Way(way) => self.way(way),
            Entity::Area(area) => self.area(area),
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.dataset.finish()?;
        let mut layers: Vec<_> = self.layers.keys().copied().collect();
        layers.sort_by_key(|layer| layer.name());
        for layer in layers {
            tracing::info!(
                "Layer {}: {} features",
                layer.name(),
                self.stats.written.get(&layer).copied().unwrap_or(0)
            );
        }
        if self.stats.skipped > 0 {
            tracing::info!("Skipped {} features with illegal geometry", self.stats.skipped);
        }
        Ok(())
    }
}

fn value<'a>(tags: &'a Tags, key: &str) -> Option<&'a str> {
    tags.get(key).map(String::as_str)
}

fn set_tag(row: &mut FeatureRow, field: &str, tags: &Tags, key: &str) {
    if let Some(v) = value(tags, key) {
        row.set_str(field, v);
    }
}

/// Output layer of a way among the enabled layers, by [`Layer::WAY_PRIORITY`].
pub fn classify_way(tags: &Tags, enabled: impl Fn(Layer) -> bool) -> Option<Layer> {
    Layer::WAY_PRIORITY
        .into_iter()
        .filter(|layer| enabled(*layer))
        .find(|layer| match layer {
            Layer::Waterway => tags.contains_key("waterway"),
            Layer::Roads => matches!(value(tags, "highway"), Some("motorway" | "motorway_link")),
            Layer::Railways => value(tags, "railway") == Some("rail"),
            Layer::Boundaries => value(tags, "boundary") == Some("administrative"),
            _ => false,
        })
}

/// Integer prefix of `text` the way C's `atoi` reads it: leading blanks,
/// an optional sign, then digits. `None` when there are no digits.
pub fn parse_leading_int(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let magnitude: i64 = rest[..digits].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}
