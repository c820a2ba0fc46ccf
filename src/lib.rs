//! Convert OpenStreetMap data into GIS layers and tag-filtered CSV extracts.

pub mod app;
pub mod area;
pub mod error;
pub mod extract;
pub mod filter;
pub mod geometry;
pub mod names;
pub mod osm;
pub mod pipeline;
pub mod sinks;
pub mod source;
pub mod storage;

pub use error::{Error, Result};
