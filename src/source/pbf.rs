use anyhow::{Context, Result};
use osmpbf::{BlobDecode, BlobReader, Element, HeaderBlock, RelMemberType};
use std::io::Read;

use crate::osm::{
    Location, Member, MemberKind, Node, ObjectKind, OsmObject, ReadKinds, Relation, Way,
    build_tag_map,
};

/// One sequential pass over a PBF stream.
pub fn read_pbf<R: Read + Send>(
    reader: BlobReader<R>,
    kinds: ReadKinds,
    handler: &mut dyn FnMut(OsmObject) -> Result<()>,
) -> Result<()> {
    let mut header_logged = false;

    for blob_result in reader {
        let blob = blob_result.context("Source: Failed to read PBF blob")?;
        let block = match blob.decode() {
            Ok(BlobDecode::OsmHeader(header)) => {
                if !header_logged {
                    log_header(&header);
                    header_logged = true;
                }
                continue;
            }
            Ok(BlobDecode::OsmData(block)) => block,
            Ok(BlobDecode::Unknown(unknown)) => {
                tracing::info!("Unknown blob: {}", unknown);
                continue;
            }
            Err(error) => return Err(error.into()),
        };

        for element in block.elements() {
            let object = match element {
                Element::Node(node) if kinds.wants(ObjectKind::Node) => OsmObject::Node(Node {
                    id: node.id(),
                    location: Location {
                        x: node.lon(),
                        y: node.lat(),
                    },
                    tags: build_tag_map(node.tags()),
                }),
                Element::DenseNode(node) if kinds.wants(ObjectKind::Node) => {
                    OsmObject::Node(Node {
                        id: node.id(),
                        location: Location {
                            x: node.lon(),
                            y: node.lat(),
                        },
                        tags: build_tag_map(node.tags()),
                    })
                }
                Element::Way(way) if kinds.wants(ObjectKind::Way) => {
                    OsmObject::Way(Way::new(way.id(), way.refs(), build_tag_map(way.tags())))
                }
                Element::Relation(relation) if kinds.wants(ObjectKind::Relation) => {
                    let mut members = Vec::new();
                    for member in relation.members() {
                        let role = member.role()?.to_string();
                        members.push(Member {
                            kind: member_kind(member.member_type),
                            id: member.member_id,
                            role,
                        });
                    }
                    OsmObject::Relation(Relation {
                        id: relation.id(),
                        members,
                        tags: build_tag_map(relation.tags()),
                    })
                }
                _ => continue,
            };
            handler(object)?;
        }
    }

    Ok(())
}

fn member_kind(member_type: RelMemberType) -> MemberKind {
    match member_type {
        RelMemberType::Node => MemberKind::Node,
        RelMemberType::Way => MemberKind::Way,
        RelMemberType::Relation => MemberKind::Relation,
    }
}

fn log_header(header: &HeaderBlock) {
    let sorted: Vec<&str> = header
        .required_features()
        .iter()
        .chain(header.optional_features())
        .map(|feature| feature.trim())
        .filter(|feature| feature.starts_with("Sort."))
        .collect();
    if !sorted.is_empty() {
        tracing::info!("Detected PBF sort header(s): {}", sorted.join(", "));
    }
}
