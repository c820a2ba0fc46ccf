use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use super::Handler;
use crate::filter::TagRuleSet;
use crate::osm::{Area, Entity, Tags, Way};

/// Keys whose value is written after the id, first present key wins.
pub const VALUE_KEYS: [&str; 3] = ["waterway", "natural", "landuse"];

/// Writes `id,value,node ids...` rows for ways and areas passing a filter.
///
/// Ways tagged `waterway` go to the ways file; other ways and all areas go
/// to the areas file. Area rows carry the id of the way or relation the
/// area was built from and the node ids of its outer rings.
pub struct CsvExtractor<W: Write> {
    filter: TagRuleSet,
    ways: csv::Writer<W>,
    areas: csv::Writer<W>,
    way_rows: u64,
    area_rows: u64,
}

impl CsvExtractor<File> {
    pub fn create(filter: TagRuleSet, ways_path: &Path, areas_path: &Path) -> Result<Self> {
        let ways = File::create(ways_path)
            .with_context(|| format!("Failed to create {:?}", ways_path))?;
        let areas = File::create(areas_path)
            .with_context(|| format!("Failed to create {:?}", areas_path))?;
        Ok(Self::new(filter, ways, areas))
    }
}

impl<W: Write> CsvExtractor<W> {
    pub fn new(filter: TagRuleSet, ways: W, areas: W) -> Self {
        let writer = |inner| {
            csv::WriterBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_writer(inner)
        };
        Self {
            filter,
            ways: writer(ways),
            areas: writer(areas),
            way_rows: 0,
            area_rows: 0,
        }
    }

    /// Row counts written so far, ways file first.
    pub fn counts(&self) -> (u64, u64) {
        (self.way_rows, self.area_rows)
    }

    /// Hand back the underlying writers after flushing them.
    pub fn into_inner(self) -> Result<(W, W)> {
        let ways = self
            .ways
            .into_inner()
            .map_err(|err| anyhow::anyhow!("Failed to flush ways CSV: {}", err.error()))?;
        let areas = self
            .areas
            .into_inner()
            .map_err(|err| anyhow::anyhow!("Failed to flush areas CSV: {}", err.error()))?;
        Ok((ways, areas))
    }

    fn way(&mut self, way: &Way) -> Result<()> {
        let Some((key, value)) = self.selected_value(&way.tags) else {
            return Ok(());
        };
        let record = row(way.id, value, way.nodes.iter().map(|node| node.id));
        if key == "waterway" {
            self.ways.write_record(&record)?;
            self.way_rows += 1;
        } else {
            self.areas.write_record(&record)?;
            self.area_rows += 1;
        }
        Ok(())
    }

    fn area(&mut self, area: &Area) -> Result<()> {
        let Some((_, value)) = self.selected_value(&area.tags) else {
            return Ok(());
        };
        let refs = area
            .outer_rings()
            .flat_map(|ring| ring.iter().map(|node| node.id));
        let record = row(area.orig_id, value, refs);
        self.areas.write_record(&record)?;
        self.area_rows += 1;
        Ok(())
    }

    fn selected_value<'t>(&self, tags: &'t Tags) -> Option<(&'static str, &'t str)> {
        if !self.filter.matches(tags) {
            return None;
        }
        VALUE_KEYS
            .iter()
            .find_map(|key| tags.get(*key).map(|value| (*key, value.as_str())))
    }
}

fn row(id: i64, value: &str, refs: impl Iterator<Item = i64>) -> Vec<String> {
    let mut record = vec![id.to_string(), value.to_string()];
    record.extend(refs.map(|id| id.to_string()));
    record
}

impl<W: Write> Handler for CsvExtractor<W> {
    fn process(&mut self, entity: Entity<'_>) -> Result<()> {
        match entity {
            Entity::Node(_) => Ok(()),
            Entity::Way(way) => self.way(way),
            Entity::Area(area) => self.area(area),
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.ways.flush().context("Failed to flush ways CSV")?;
        self.areas.flush().context("Failed to flush areas CSV")?;
        tracing::info!(
            "Wrote {} way rows and {} area rows",
            self.way_rows,
            self.area_rows
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::{NodeRef, OuterRing, tags};

    fn water_filter() -> TagRuleSet {
        let mut filter = TagRuleSet::new();
        filter.add_rule(true, "waterway", None);
        filter.add_rule(true, "natural", Some("water".to_string()));
        filter.add_rule(true, "landuse", Some("reservoir".to_string()));
        filter
    }

    fn output(extractor: CsvExtractor<Vec<u8>>) -> (String, String) {
        let (ways, areas) = extractor.into_inner().unwrap();
        (
            String::from_utf8(ways).unwrap(),
            String::from_utf8(areas).unwrap(),
        )
    }

    #[test]
    fn waterway_ways_go_to_ways_file() {
        let mut extractor = CsvExtractor::new(water_filter(), Vec::new(), Vec::new());
        let river = Way::new(10, [1, 2, 3], tags(&[("waterway", "river")]));
        extractor.process(Entity::Way(&river)).unwrap();

        let (ways, areas) = output(extractor);
        assert_eq!(ways, "10,river,1,2,3\n");
        assert_eq!(areas, "");
    }

    #[test]
    fn other_matching_ways_go_to_areas_file() {
        let mut extractor = CsvExtractor::new(water_filter(), Vec::new(), Vec::new());
        let pond = Way::new(11, [4, 5, 6, 4], tags(&[("natural", "water")]));
        let forest = Way::new(12, [7, 8], tags(&[("landuse", "forest")]));
        extractor.process(Entity::Way(&pond)).unwrap();
        extractor.process(Entity::Way(&forest)).unwrap();
        assert_eq!(extractor.counts(), (0, 1));

        let (_, areas) = output(extractor);
        assert_eq!(areas, "11,water,4,5,6,4\n");
    }

    #[test]
    fn areas_use_original_id_and_outer_rings_only() {
        let mut extractor = CsvExtractor::new(water_filter(), Vec::new(), Vec::new());
        let outer: Vec<NodeRef> = [1, 2, 3, 1].into_iter().map(NodeRef::new).collect();
        let inner: Vec<NodeRef> = [7, 8, 9, 7].into_iter().map(NodeRef::new).collect();
        let area = Area::from_relation(
            42,
            tags(&[("landuse", "reservoir")]),
            vec![OuterRing {
                nodes: outer,
                inners: vec![inner],
            }],
        );
        extractor.process(Entity::Area(&area)).unwrap();

        let (_, areas) = output(extractor);
        assert_eq!(areas, "42,reservoir,1,2,3,1\n");
    }

    #[test]
    fn value_comes_from_first_present_key() {
        let mut extractor = CsvExtractor::new(water_filter(), Vec::new(), Vec::new());
        let way = Way::new(
            13,
            [1, 2],
            tags(&[("natural", "water"), ("landuse", "reservoir")]),
        );
        extractor.process(Entity::Way(&way)).unwrap();
        let (_, areas) = output(extractor);
        assert_eq!(areas, "13,water,1,2\n");
    }

    #[test]
    fn matching_entity_without_value_key_is_not_written() {
        let mut filter = TagRuleSet::new();
        filter.add_rule(true, "water", None);
        let mut extractor = CsvExtractor::new(filter, Vec::new(), Vec::new());
        let way = Way::new(14, [1, 2], tags(&[("water", "lake")]));
        extractor.process(Entity::Way(&way)).unwrap();
        assert_eq!(extractor.counts(), (0, 0));
    }
}
