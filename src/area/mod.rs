//! Area assembly from closed ways and multipolygon relations.
//!
//! Relations are registered during a relations-only first pass. The second
//! pass hands every way to the manager, which keeps copies of the member
//! ways it is waiting for and assembles a relation's area as soon as the
//! last member arrives.

mod rings;

use anyhow::Result;
use std::collections::{HashMap, HashSet};

use crate::filter::TagRuleSet;
use crate::osm::{Area, MemberKind, Relation, Tags, Way};

pub use rings::assemble_rings;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AreaStats {
    pub relations_registered: u64,
    pub areas_from_ways: u64,
    pub areas_from_relations: u64,
    pub invalid: u64,
}

struct PendingRelation {
    id: i64,
    tags: Tags,
    members: Vec<i64>,
    missing: usize,
}

pub struct MultipolygonManager {
    filter: TagRuleSet,
    relations: Vec<Option<PendingRelation>>,
    // way id -> indices of the pending relations using it
    way_index: HashMap<i64, Vec<usize>>,
    member_ways: HashMap<i64, Way>,
    stats: AreaStats,
}

impl MultipolygonManager {
    pub fn new(filter: TagRuleSet) -> Self {
        Self {
            filter,
            relations: Vec::new(),
            way_index: HashMap::new(),
            member_ways: HashMap::new(),
            stats: AreaStats::default(),
        }
    }

    /// First pass: remember multipolygon and boundary relations that pass
    /// the filter and have at least one way member. Returns whether the
    /// relation was registered.
    pub fn relation(&mut self, relation: &Relation) -> bool {
        let kind = relation.tags.get("type").map(String::as_str);
        if !matches!(kind, Some("multipolygon") | Some("boundary")) {
            return false;
        }
        if !self.filter.matches(&relation.tags) {
            return false;
        }

        let mut seen = HashSet::new();
        let members: Vec<i64> = relation
            .members
            .iter()
            .filter(|member| member.kind == MemberKind::Way)
            .map(|member| member.id)
            .filter(|id| seen.insert(*id))
            .collect();
        if members.is_empty() {
            tracing::debug!("Relation {} has no way members, ignored", relation.id);
            return false;
        }

        let index = self.relations.len();
        for way_id in &members {
            self.way_index.entry(*way_id).or_default().push(index);
        }
        let mut tags = relation.tags.clone();
        tags.remove("type");
        self.relations.push(Some(PendingRelation {
            id: relation.id,
            tags,
            missing: members.len(),
            members,
        }));
        self.stats.relations_registered += 1;
        true
    }

    /// Second pass: feed a way whose node locations have been resolved.
    /// Finished areas are passed to `emit` immediately.
    pub fn way(&mut self, way: &Way, emit: &mut dyn FnMut(Area) -> Result<()>) -> Result<()> {
        if self.is_area_way(way) {
            match assemble_rings(&[way]) {
                Ok(rings) => {
                    self.stats.areas_from_ways += 1;
                    emit(Area::from_way(way.id, way.tags.clone(), rings))?;
                }
                Err(err) => {
                    self.stats.invalid += 1;
                    tracing::debug!("Invalid area from way {}: {}", way.id, err);
                }
            }
        }

        let Some(users) = self.way_index.get(&way.id) else {
            return Ok(());
        };
        if self.member_ways.contains_key(&way.id) {
            return Ok(());
        }
        let users = users.clone();
        self.member_ways.insert(way.id, way.clone());

        for index in users {
            let complete = match self.relations[index].as_mut() {
                Some(pending) => {
                    pending.missing -= 1;
                    pending.missing == 0
                }
                None => false,
            };
            if complete && let Some(pending) = self.relations[index].take() {
                self.complete_relation(pending, emit)?;
            }
        }
        Ok(())
    }

    fn is_area_way(&self, way: &Way) -> bool {
        way.is_closed()
            && way.nodes.len() >= 4
            && way.tags.get("area").map(String::as_str) != Some("no")
            && self.filter.matches(&way.tags)
    }

    fn complete_relation(
        &mut self,
        pending: PendingRelation,
        emit: &mut dyn FnMut(Area) -> Result<()>,
    ) -> Result<()> {
        let result = {
            let ways: Vec<&Way> = pending
                .members
                .iter()
                .filter_map(|id| self.member_ways.get(id))
                .collect();
            assemble_rings(&ways)
        };

        self.release_members(&pending.members);

        match result {
            Ok(rings) => {
                self.stats.areas_from_relations += 1;
                emit(Area::from_relation(pending.id, pending.tags, rings))
            }
            Err(err) => {
                self.stats.invalid += 1;
                tracing::debug!("Invalid multipolygon relation {}: {}", pending.id, err);
                Ok(())
            }
        }
    }

    /// Drop member way copies no pending relation needs any more.
    fn release_members(&mut self, members: &[i64]) {
        for way_id in members {
            let still_needed = self.way_index.get(way_id).is_some_and(|users| {
                users
                    .iter()
                    .any(|index| self.relations[*index].is_some())
            });
            if !still_needed {
                self.member_ways.remove(way_id);
                self.way_index.remove(way_id);
            }
        }
    }

    /// Ids of registered relations still waiting for member ways.
    pub fn incomplete_relations(&self) -> Vec<i64> {
        self.relations
            .iter()
            .flatten()
            .map(|pending| pending.id)
            .collect()
    }

    pub fn stats(&self) -> AreaStats {
        self.stats
    }
}
