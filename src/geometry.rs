//! Geometries for output features, built from location-resolved entities.

use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon};

use crate::error::{Error, Result};
use crate::osm::{Area, Node, NodeRef, Way};

pub fn point(node: &Node) -> Point<f64> {
    Point::from(node.location)
}

/// Linestring through the way's node locations. Consecutive duplicate
/// locations are collapsed; fewer than two distinct points is an error.
pub fn linestring(way: &Way) -> Result<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(way.nodes.len());
    for node in &way.nodes {
        let coord = resolved(node)?;
        if coords.last() != Some(&coord) {
            coords.push(coord);
        }
    }
    if coords.len() < 2 {
        return Err(Error::Geometry(format!(
            "way {} has fewer than two distinct locations",
            way.id
        )));
    }
    Ok(LineString::from(coords))
}

pub fn multipolygon(area: &Area) -> Result<MultiPolygon<f64>> {
    if area.rings.is_empty() {
        return Err(Error::Geometry(format!("area {} has no rings", area.id)));
    }
    let polygons = area
        .rings
        .iter()
        .map(|outer| {
            let exterior = ring(&outer.nodes)?;
            let interiors = outer
                .inners
                .iter()
                .map(|inner| ring(inner))
                .collect::<Result<Vec<_>>>()?;
            Ok(Polygon::new(exterior, interiors))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(MultiPolygon::new(polygons))
}

fn ring(nodes: &[NodeRef]) -> Result<LineString<f64>> {
    let coords = nodes.iter().map(resolved).collect::<Result<Vec<_>>>()?;
    Ok(LineString::from(coords))
}

fn resolved(node: &NodeRef) -> Result<Coord<f64>> {
    node.location
        .ok_or_else(|| Error::Geometry(format!("missing location for node {}", node.id)))
}
