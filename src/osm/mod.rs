//! In-memory OSM object model shared by the sources, the location store,
//! the multipolygon manager and the extractors.

use geo_types::Coord;
use std::collections::HashMap;
use std::fmt;

pub type Tags = HashMap<String, String>;

/// WGS84 position, `x` is longitude and `y` is latitude.
pub type Location = Coord<f64>;

pub fn build_tag_map<'a, I>(tags: I) -> Tags
where
    I: Iterator<Item = (&'a str, &'a str)>,
{
    tags.map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Node,
    Way,
    Relation,
}

/// Which objects a single pass over a source delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKinds {
    RelationsOnly,
    All,
}

impl ReadKinds {
    pub fn wants(self, kind: ObjectKind) -> bool {
        match self {
            ReadKinds::All => true,
            ReadKinds::RelationsOnly => kind == ObjectKind::Relation,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub location: Location,
    pub tags: Tags,
}

/// A way's reference to a node. The location is filled in by the location
/// store during the full pass and stays `None` when the node is unknown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeRef {
    pub id: i64,
    pub location: Option<Location>,
}

impl NodeRef {
    pub fn new(id: i64) -> Self {
        Self { id, location: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    pub id: i64,
    pub nodes: Vec<NodeRef>,
    pub tags: Tags,
}

impl Way {
    pub fn new(id: i64, refs: impl IntoIterator<Item = i64>, tags: Tags) -> Self {
        Self {
            id,
            nodes: refs.into_iter().map(NodeRef::new).collect(),
            tags,
        }
    }

    /// First and last node references are the same node.
    pub fn is_closed(&self) -> bool {
        match (self.nodes.first(), self.nodes.last()) {
            (Some(first), Some(last)) => self.nodes.len() > 1 && first.id == last.id,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Node,
    Way,
    Relation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub kind: MemberKind,
    pub id: i64,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: i64,
    pub members: Vec<Member>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaOrigin {
    Way,
    Relation,
}

impl fmt::Display for AreaOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AreaOrigin::Way => write!(f, "way"),
            AreaOrigin::Relation => write!(f, "relation"),
        }
    }
}

/// One outer ring with the inner rings it encloses. Rings are closed: the
/// first and last reference are the same node.
#[derive(Debug, Clone, PartialEq)]
pub struct OuterRing {
    pub nodes: Vec<NodeRef>,
    pub inners: Vec<Vec<NodeRef>>,
}

/// A polygon built from a closed way or a multipolygon relation.
///
/// Area ids encode their origin: `2 * way_id` for ways and
/// `2 * relation_id + 1` for relations.
#[derive(Debug, Clone, PartialEq)]
pub struct Area {
    pub id: i64,
    pub orig_id: i64,
    pub origin: AreaOrigin,
    pub tags: Tags,
    pub rings: Vec<OuterRing>,
}

impl Area {
    pub fn from_way(way_id: i64, tags: Tags, rings: Vec<OuterRing>) -> Self {
        Self {
            id: way_id * 2,
            orig_id: way_id,
            origin: AreaOrigin::Way,
            tags,
            rings,
        }
    }

    pub fn from_relation(relation_id: i64, tags: Tags, rings: Vec<OuterRing>) -> Self {
        Self {
            id: relation_id * 2 + 1,
            orig_id: relation_id,
            origin: AreaOrigin::Relation,
            tags,
            rings,
        }
    }

    pub fn from_way_origin(&self) -> bool {
        self.origin == AreaOrigin::Way
    }

    pub fn outer_rings(&self) -> impl Iterator<Item = &[NodeRef]> {
        self.rings.iter().map(|ring| ring.nodes.as_slice())
    }
}

/// Objects as they come out of a source.
#[derive(Debug, Clone, PartialEq)]
pub enum OsmObject {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl OsmObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            OsmObject::Node(_) => ObjectKind::Node,
            OsmObject::Way(_) => ObjectKind::Way,
            OsmObject::Relation(_) => ObjectKind::Relation,
        }
    }
}

/// What an extractor gets to see: nodes and location-resolved ways from the
/// input, and areas from the multipolygon manager.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Node(&'a Node),
    Way(&'a Way),
    Area(&'a Area),
}

impl Entity<'_> {
    pub fn id(&self) -> i64 {
        match self {
            Entity::Node(node) => node.id,
            Entity::Way(way) => way.id,
            Entity::Area(area) => area.id,
        }
    }

    pub fn tags(&self) -> &Tags {
        match self {
            Entity::Node(node) => &node.tags,
            Entity::Way(way) => &way.tags,
            Entity::Area(area) => &area.tags,
        }
    }
}

#[cfg(test)]
pub(crate) fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
