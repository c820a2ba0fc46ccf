use geo::{Area, Contains};
use geo_types::{LineString, Polygon};

use crate::error::{Error, Result};
use crate::osm::{NodeRef, OuterRing, Way};

struct Ring {
    nodes: Vec<NodeRef>,
    polygon: Polygon<f64>,
    area: f64,
}

/// Build the rings of an area from its member ways.
///
/// Ways are joined end to end by node id. Rings nested in an odd number of
/// other rings are inner rings and are attached to the smallest outer ring
/// enclosing them. Outer rings come back counter-clockwise, inner rings
/// clockwise.
pub fn assemble_rings(ways: &[&Way]) -> Result<Vec<OuterRing>> {
    let joined = join_ways(ways)?;
    let rings = joined
        .into_iter()
        .map(locate_ring)
        .collect::<Result<Vec<_>>>()?;

    let depth: Vec<usize> = (0..rings.len())
        .map(|i| {
            rings
                .iter()
                .enumerate()
                .filter(|(j, other)| {
                    *j != i
                        && other.area > rings[i].area
                        && other.polygon.contains(rings[i].polygon.exterior())
                })
                .count()
        })
        .collect();

    let mut outers: Vec<(usize, OuterRing)> = Vec::new();
    for (index, ring) in rings.iter().enumerate() {
        if depth[index] % 2 == 0 {
            outers.push((
                index,
                OuterRing {
                    nodes: oriented(&ring.nodes, ring.polygon.signed_area() < 0.0),
                    inners: Vec::new(),
                },
            ));
        }
    }
    if outers.is_empty() {
        return Err(Error::Geometry("no outer ring".to_string()));
    }

    for (index, ring) in rings.iter().enumerate() {
        if depth[index] % 2 == 0 {
            continue;
        }
        let parent = outers
            .iter_mut()
            .filter(|(outer, _)| {
                rings[*outer].area > ring.area
                    && rings[*outer].polygon.contains(ring.polygon.exterior())
            })
            .min_by(|(a, _), (b, _)| rings[*a].area.total_cmp(&rings[*b].area));
        let Some((_, outer)) = parent else {
            return Err(Error::Geometry(format!(
                "inner ring at node {} has no enclosing outer ring",
                ring.nodes[0].id
            )));
        };
        outer
            .inners
            .push(oriented(&ring.nodes, ring.polygon.signed_area() > 0.0));
    }

    Ok(outers.into_iter().map(|(_, outer)| outer).collect())
}

fn oriented(nodes: &[NodeRef], reverse: bool) -> Vec<NodeRef> {
    if reverse {
        nodes.iter().rev().copied().collect()
    } else {
        nodes.to_vec()
    }
}

/// Chain node sequences into closed rings.
fn join_ways(ways: &[&Way]) -> Result<Vec<Vec<NodeRef>>> {
    let mut remaining: Vec<&[NodeRef]> = ways
        .iter()
        .map(|way| way.nodes.as_slice())
        .filter(|nodes| nodes.len() >= 2)
        .collect();
    remaining.reverse();

    let mut rings = Vec::new();
    while let Some(first) = remaining.pop() {
        let mut ring = first.to_vec();
        while ring[0].id != ring[ring.len() - 1].id {
            let end = ring[ring.len() - 1].id;
            let Some(pos) = remaining
                .iter()
                .position(|seg| seg[0].id == end || seg[seg.len() - 1].id == end)
            else {
                return Err(Error::Geometry(format!(
                    "ring starting at node {} is not closed (open end at node {})",
                    ring[0].id, end
                )));
            };
            let seg = remaining.remove(pos);
            if seg[0].id == end {
                ring.extend_from_slice(&seg[1..]);
            } else {
                ring.extend(seg.iter().rev().skip(1).copied());
            }
        }
        if ring.len() < 4 {
            return Err(Error::Geometry(format!(
                "ring starting at node {} has only {} nodes",
                ring[0].id,
                ring.len()
            )));
        }
        rings.push(ring);
    }

    if rings.is_empty() {
        return Err(Error::Geometry("no usable member ways".to_string()));
    }
    Ok(rings)
}

fn locate_ring(nodes: Vec<NodeRef>) -> Result<Ring> {
    let coords = nodes
        .iter()
        .map(|node| {
            node.location.ok_or_else(|| {
                Error::Geometry(format!("missing location for node {}", node.id))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let polygon = Polygon::new(LineString::from(coords), vec![]);
    let area = polygon.unsigned_area();
    Ok(Ring {
        nodes,
        polygon,
        area,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::{Location, Tags};

    fn located_way(id: i64, points: &[(i64, f64, f64)]) -> Way {
        Way {
            id,
            nodes: points
                .iter()
                .map(|(node_id, x, y)| NodeRef {
                    id: *node_id,
                    location: Some(Location { x: *x, y: *y }),
                })
                .collect(),
            tags: Tags::new(),
        }
    }

    fn ids(nodes: &[NodeRef]) -> Vec<i64> {
        nodes.iter().map(|n| n.id).collect()
    }

    fn signed_area(nodes: &[NodeRef]) -> f64 {
        let coords: Vec<Location> = nodes.iter().map(|n| n.location.unwrap()).collect();
        Polygon::new(LineString::from(coords), vec![]).signed_area()
    }

    #[test]
    fn closed_way_becomes_single_outer_ring() {
        // clockwise square
        let way = located_way(
            1,
            &[(1, 0.0, 0.0), (2, 0.0, 1.0), (3, 1.0, 1.0), (4, 1.0, 0.0), (1, 0.0, 0.0)],
        );
        let rings = assemble_rings(&[&way]).unwrap();
        assert_eq!(rings.len(), 1);
        assert!(rings[0].inners.is_empty());
        assert!(signed_area(&rings[0].nodes) > 0.0, "outer must be counter-clockwise");
    }

    #[test]
    fn split_outer_with_inner_hole() {
        let north = located_way(10, &[(1, 0.0, 0.0), (2, 10.0, 0.0), (3, 10.0, 10.0)]);
        // second half runs backwards and has to be reversed while joining
        let south = located_way(11, &[(1, 0.0, 0.0), (4, 0.0, 10.0), (3, 10.0, 10.0)]);
        let hole = located_way(
            12,
            &[(5, 2.0, 2.0), (6, 4.0, 2.0), (7, 4.0, 4.0), (8, 2.0, 4.0), (5, 2.0, 2.0)],
        );

        let rings = assemble_rings(&[&north, &south, &hole]).unwrap();
        assert_eq!(rings.len(), 1);
        assert_eq!(ids(&rings[0].nodes).len(), 5);
        assert!(signed_area(&rings[0].nodes) > 0.0);
        assert_eq!(rings[0].inners.len(), 1);
        assert!(signed_area(&rings[0].inners[0]) < 0.0, "inner must be clockwise");
    }

    #[test]
    fn islands_in_holes_are_outer_rings_again() {
        let outer = located_way(
            1,
            &[(1, 0.0, 0.0), (2, 10.0, 0.0), (3, 10.0, 10.0), (4, 0.0, 10.0), (1, 0.0, 0.0)],
        );
        let hole = located_way(
            2,
            &[(5, 2.0, 2.0), (6, 8.0, 2.0), (7, 8.0, 8.0), (8, 2.0, 8.0), (5, 2.0, 2.0)],
        );
        let island = located_way(
            3,
            &[(9, 4.0, 4.0), (10, 6.0, 4.0), (11, 6.0, 6.0), (12, 4.0, 6.0), (9, 4.0, 4.0)],
        );
        let rings = assemble_rings(&[&outer, &hole, &island]).unwrap();
        assert_eq!(rings.len(), 2);
        assert_eq!(rings[0].inners.len(), 1);
        assert!(rings[1].inners.is_empty());
    }

    #[test]
    fn open_ring_is_rejected() {
        let way = located_way(1, &[(1, 0.0, 0.0), (2, 1.0, 0.0), (3, 1.0, 1.0)]);
        let err = assemble_rings(&[&way]).unwrap_err();
        assert!(err.to_string().contains("not closed"));
    }

    #[test]
    fn missing_location_is_rejected() {
        let mut way = located_way(
            1,
            &[(1, 0.0, 0.0), (2, 1.0, 0.0), (3, 1.0, 1.0), (1, 0.0, 0.0)],
        );
        way.nodes[1].location = None;
        let err = assemble_rings(&[&way]).unwrap_err();
        assert!(err.to_string().contains("node 2"));
    }
}
