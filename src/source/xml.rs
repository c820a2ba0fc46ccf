use anyhow::{Context, Result, anyhow};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::io::BufRead;

use crate::osm::{
    Location, Member, MemberKind, Node, NodeRef, OsmObject, ReadKinds, Relation, Tags, Way,
};

/// Object currently being assembled from its child elements.
enum Pending {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl Pending {
    fn tags_mut(&mut self) -> &mut Tags {
        match self {
            Pending::Node(node) => &mut node.tags,
            Pending::Way(way) => &mut way.tags,
            Pending::Relation(relation) => &mut relation.tags,
        }
    }

    fn into_object(self) -> OsmObject {
        match self {
            Pending::Node(node) => OsmObject::Node(node),
            Pending::Way(way) => OsmObject::Way(way),
            Pending::Relation(relation) => OsmObject::Relation(relation),
        }
    }
}

/// One pass over an OSM XML document.
pub fn read_xml<R: BufRead>(
    input: R,
    kinds: ReadKinds,
    handler: &mut dyn FnMut(OsmObject) -> Result<()>,
) -> Result<()> {
    let mut parser = Reader::from_reader(input);
    let mut buf = Vec::new();
    let mut pending: Option<Pending> = None;

    loop {
        let event = parser
            .read_event_into(&mut buf)
            .with_context(|| format!("Failed to parse OSM XML at byte {}", parser.buffer_position()))?;
        match event {
            Event::Eof => break,
            Event::Start(start) => {
                if let Some(object) = start_element(&parser, &start, &mut pending)? {
                    pending = Some(object);
                }
            }
            Event::Empty(start) => {
                // Childless node/way/relation elements are complete right away.
                if let Some(object) = start_element(&parser, &start, &mut pending)? {
                    emit(object, kinds, handler)?;
                }
            }
            Event::End(end) => {
                if matches!(end.local_name().as_ref(), b"node" | b"way" | b"relation")
                    && let Some(object) = pending.take()
                {
                    emit(object, kinds, handler)?;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn emit(
    object: Pending,
    kinds: ReadKinds,
    handler: &mut dyn FnMut(OsmObject) -> Result<()>,
) -> Result<()> {
    let object = object.into_object();
    if kinds.wants(object.kind()) {
        handler(object)?;
    }
    Ok(())
}

/// Handle an opening tag. Returns a new pending object for `node`, `way`
/// and `relation`; child elements are folded into `pending`.
fn start_element<R: BufRead>(
    parser: &Reader<R>,
    start: &BytesStart,
    pending: &mut Option<Pending>,
) -> Result<Option<Pending>> {
    match start.local_name().as_ref() {
        b"node" => {
            let id = required_attr(parser, start, "id")?;
            let lat = required_attr(parser, start, "lat")?;
            let lon = required_attr(parser, start, "lon")?;
            Ok(Some(Pending::Node(Node {
                id,
                location: Location { x: lon, y: lat },
                tags: Tags::new(),
            })))
        }
        b"way" => {
            let id = required_attr(parser, start, "id")?;
            Ok(Some(Pending::Way(Way::new(id, [], Tags::new()))))
        }
        b"relation" => {
            let id = required_attr(parser, start, "id")?;
            Ok(Some(Pending::Relation(Relation {
                id,
                members: Vec::new(),
                tags: Tags::new(),
            })))
        }
        b"tag" => {
            if let Some(object) = pending.as_mut() {
                let key = string_attr(parser, start, "k")?;
                let value = string_attr(parser, start, "v")?;
                object.tags_mut().insert(key, value);
            }
            Ok(None)
        }
        b"nd" => {
            if let Some(Pending::Way(way)) = pending.as_mut() {
                way.nodes.push(NodeRef::new(required_attr(parser, start, "ref")?));
            }
            Ok(None)
        }
        b"member" => {
            if let Some(Pending::Relation(relation)) = pending.as_mut() {
                let kind = match string_attr(parser, start, "type")?.as_str() {
                    "node" => MemberKind::Node,
                    "way" => MemberKind::Way,
                    "relation" => MemberKind::Relation,
                    other => return Err(anyhow!("Unknown relation member type '{}'", other)),
                };
                relation.members.push(Member {
                    kind,
                    id: required_attr(parser, start, "ref")?,
                    role: find_attr(parser, start, "role")?.unwrap_or_default(),
                });
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

fn find_attr<R: BufRead>(
    parser: &Reader<R>,
    start: &BytesStart,
    name: &str,
) -> Result<Option<String>> {
    for attr in start.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == name.as_bytes() {
            return Ok(Some(attr.decode_and_unescape_value(parser)?.into_owned()));
        }
    }
    Ok(None)
}

fn string_attr<R: BufRead>(parser: &Reader<R>, start: &BytesStart, name: &str) -> Result<String> {
    find_attr(parser, start, name)?.ok_or_else(|| {
        anyhow!(
            "Element {} doesn't have required attribute: {}",
            String::from_utf8_lossy(start.local_name().as_ref()),
            name
        )
    })
}

fn required_attr<T, R: BufRead>(parser: &Reader<R>, start: &BytesStart, name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = string_attr(parser, start, name)?;
    value.parse::<T>().with_context(|| {
        format!(
            "Failed to parse attribute {}=\"{}\" of {}",
            name,
            value,
            String::from_utf8_lossy(start.local_name().as_ref())
        )
    })
}
