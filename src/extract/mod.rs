//! Per-entity extraction: decide what a node, way or area turns into and
//! write it out.

mod csv_export;
mod features;
mod layers;

use anyhow::Result;

use crate::osm::Entity;

pub use csv_export::{CsvExtractor, VALUE_KEYS};
pub use features::{
    ExtractStats, FeatureExtractor, UNKNOWN_ADMIN_LEVEL, classify_way, parse_leading_int,
};
pub use layers::{Layer, Profile};

/// Consumer of the entities produced by a driver pass.
pub trait Handler {
    fn process(&mut self, entity: Entity<'_>) -> Result<()>;

    /// Called once after the last entity.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
