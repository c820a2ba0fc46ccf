//! Drivers that run sources through the location store, the multipolygon
//! manager and a handler.

use anyhow::{Context, Result};
use std::time::Instant;

use crate::area::MultipolygonManager;
use crate::extract::Handler;
use crate::osm::{Entity, OsmObject, ReadKinds, Way};
use crate::source::Source;
use crate::storage::LocationStore;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub nodes: u64,
    pub ways: u64,
    pub relations: u64,
    pub areas: u64,
    pub incomplete_relations: Vec<i64>,
}

impl RunStats {
    fn log(&self, started: Instant) {
        tracing::info!(
            "Done: {} nodes, {} ways, {} relations, {} areas in {:.2}s",
            self.nodes,
            self.ways,
            self.relations,
            self.areas,
            started.elapsed().as_secs_f64()
        );
    }
}

/// Logs a running object count every `interval` objects.
struct ProgressCounter {
    label: &'static str,
    interval: u64,
    count: u64,
}

impl ProgressCounter {
    fn new(label: &'static str, interval: u64) -> Self {
        Self {
            label,
            interval: interval.max(1),
            count: 0,
        }
    }

    fn inc(&mut self) {
        self.count += 1;
        if self.count % self.interval == 0 {
            tracing::debug!("{}: {}", self.label, self.count);
        }
    }

    fn finish(&self) {
        tracing::info!("{}: {} objects", self.label, self.count);
    }
}

const PROGRESS_INTERVAL: u64 = 1_000_000;

/// Store node locations, resolve way node locations. Missing locations are
/// left unresolved.
struct Locator<'a> {
    store: &'a mut LocationStore,
    prepared: bool,
}

impl<'a> Locator<'a> {
    fn new(store: &'a mut LocationStore) -> Self {
        Self {
            store,
            prepared: false,
        }
    }

    fn apply(&mut self, object: &mut OsmObject) -> Result<()> {
        match object {
            OsmObject::Node(node) => self
                .store
                .set(node.id, node.location)
                .with_context(|| format!("Failed to store location of node {}", node.id)),
            OsmObject::Way(way) => {
                if !self.prepared {
                    self.store.prepare()?;
                    self.prepared = true;
                }
                self.resolve(way);
                Ok(())
            }
            OsmObject::Relation(_) => Ok(()),
        }
    }

    fn resolve(&self, way: &mut Way) {
        for node in &mut way.nodes {
            node.location = self.store.get(node.id);
        }
    }
}

/// Finish the handler whether or not the pass succeeded, so outputs are
/// flushed and closed. The pass error takes precedence.
fn finish_handler(pass: Result<()>, handler: &mut dyn Handler) -> Result<()> {
    match pass {
        Ok(()) => handler.finish(),
        Err(err) => {
            if let Err(finish_err) = handler.finish() {
                tracing::warn!("Failed to finish output after error: {:#}", finish_err);
            }
            Err(err)
        }
    }
}

/// One pass over all objects: nodes and location-resolved ways go to the
/// handler. Relations are counted and otherwise ignored.
pub fn run_single_pass(
    source: &dyn Source,
    store: &mut LocationStore,
    handler: &mut dyn Handler,
) -> Result<RunStats> {
    let started = Instant::now();
    let mut stats = RunStats::default();
    let mut locator = Locator::new(store);
    let mut progress = ProgressCounter::new("Single pass", PROGRESS_INTERVAL);

    tracing::info!("Reading {}...", source.describe());
    let pass = source.read(ReadKinds::All, &mut |mut object| {
        progress.inc();
        locator.apply(&mut object)?;
        match &object {
            OsmObject::Node(node) => {
                stats.nodes += 1;
                handler.process(Entity::Node(node))
            }
            OsmObject::Way(way) => {
                stats.ways += 1;
                handler.process(Entity::Way(way))
            }
            OsmObject::Relation(_) => {
                stats.relations += 1;
                Ok(())
            }
        }
    });
    progress.finish();

    finish_handler(pass, handler)?;
    stats.log(started);
    Ok(stats)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Pass1,
    Pass2,
    Done,
}

/// Two passes over the same source. Pass 1 registers multipolygon
/// relations, pass 2 resolves locations and feeds nodes, ways and the areas
/// assembled along the way to the handler.
pub struct TwoPassDriver<'a> {
    store: &'a mut LocationStore,
    manager: &'a mut MultipolygonManager,
    handler: &'a mut dyn Handler,
    phase: Phase,
}

impl<'a> TwoPassDriver<'a> {
    pub fn new(
        store: &'a mut LocationStore,
        manager: &'a mut MultipolygonManager,
        handler: &'a mut dyn Handler,
    ) -> Self {
        Self {
            store,
            manager,
            handler,
            phase: Phase::Init,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn run(&mut self, source: &dyn Source) -> Result<RunStats> {
        anyhow::ensure!(
            self.phase == Phase::Init,
            "Driver already ran (phase {:?})",
            self.phase
        );
        let started = Instant::now();
        let mut stats = RunStats::default();

        self.phase = Phase::Pass1;
        tracing::info!("Pass 1: reading relations from {}...", source.describe());
        let manager = &mut *self.manager;
        let pass = source.read(ReadKinds::RelationsOnly, &mut |object| {
            if let OsmObject::Relation(relation) = object {
                stats.relations += 1;
                manager.relation(&relation);
            }
            Ok(())
        });
        if pass.is_err() {
            self.phase = Phase::Done;
            return finish_handler(pass, &mut *self.handler).map(|()| stats);
        }
        tracing::info!(
            "Pass 1 done: {} multipolygon relations registered",
            self.manager.stats().relations_registered
        );

        self.phase = Phase::Pass2;
        tracing::info!("Pass 2: reading all objects...");
        let mut locator = Locator::new(self.store);
        let manager = &mut *self.manager;
        let handler = &mut *self.handler;
        let mut progress = ProgressCounter::new("Pass 2", PROGRESS_INTERVAL);
        let mut areas = 0u64;
        let pass = source.read(ReadKinds::All, &mut |mut object| {
            progress.inc();
            locator.apply(&mut object)?;
            match &object {
                OsmObject::Node(node) => {
                    stats.nodes += 1;
                    handler.process(Entity::Node(node))
                }
                OsmObject::Way(way) => {
                    stats.ways += 1;
                    handler.process(Entity::Way(way))?;
                    manager.way(way, &mut |area| {
                        areas += 1;
                        handler.process(Entity::Area(&area))
                    })
                }
                OsmObject::Relation(_) => Ok(()),
            }
        });
        progress.finish();
        stats.areas = areas;

        self.phase = Phase::Done;
        finish_handler(pass, &mut *self.handler)?;

        stats.incomplete_relations = self.manager.incomplete_relations();
        if !stats.incomplete_relations.is_empty() {
            let ids: Vec<String> = stats
                .incomplete_relations
                .iter()
                .map(|id| id.to_string())
                .collect();
            tracing::warn!(
                "Some member ways missing for these multipolygon relations: {}",
                ids.join(" ")
            );
        }
        let area_stats = self.manager.stats();
        tracing::info!(
            "Areas: {} from ways, {} from relations, {} invalid",
            area_stats.areas_from_ways,
            area_stats.areas_from_relations,
            area_stats.invalid
        );
        stats.log(started);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::TagRuleSet;
    use crate::osm::{Location, Member, MemberKind, Node, Relation, Tags, tags};
    use crate::source::MemorySource;

    /// Records what it sees as short strings like `n1`, `w10`, `a21`.
    #[derive(Default)]
    struct Trace {
        seen: Vec<String>,
        finished: bool,
        resolved_ways: Vec<(i64, usize)>,
    }

    impl Handler for Trace {
        fn process(&mut self, entity: Entity<'_>) -> Result<()> {
            let tag = match entity {
                Entity::Node(node) => format!("n{}", node.id),
                Entity::Way(way) => {
                    let resolved = way.nodes.iter().filter(|n| n.location.is_some()).count();
                    self.resolved_ways.push((way.id, resolved));
                    format!("w{}", way.id)
                }
                Entity::Area(area) => format!("a{}", area.id),
            };
            self.seen.push(tag);
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    fn node(id: i64, x: f64, y: f64) -> OsmObject {
        OsmObject::Node(Node {
            id,
            location: Location { x, y },
            tags: Tags::new(),
        })
    }

    fn lake_source(with_second_way: bool) -> MemorySource {
        let mut objects = vec![
            node(1, 0.0, 0.0),
            node(2, 1.0, 0.0),
            node(3, 1.0, 1.0),
            node(4, 0.0, 1.0),
            OsmObject::Way(Way::new(10, [1, 2, 3], Tags::new())),
        ];
        if with_second_way {
            objects.push(OsmObject::Way(Way::new(11, [3, 4, 1], Tags::new())));
        }
        objects.push(OsmObject::Relation(Relation {
            id: 20,
            members: vec![
                Member {
                    kind: MemberKind::Way,
                    id: 10,
                    role: "outer".to_string(),
                },
                Member {
                    kind: MemberKind::Way,
                    id: 11,
                    role: "outer".to_string(),
                },
            ],
            tags: tags(&[("type", "multipolygon"), ("natural", "water")]),
        }));
        MemorySource::new(objects)
    }

    #[test]
    fn two_pass_emits_relation_area_after_its_last_way() {
        let source = lake_source(true);
        let mut store = LocationStore::flex_mem();
        let mut manager = MultipolygonManager::new(TagRuleSet::accept_all());
        let mut trace = Trace::default();

        let mut driver = TwoPassDriver::new(&mut store, &mut manager, &mut trace);
        assert_eq!(driver.phase(), Phase::Init);
        let stats = driver.run(&source).unwrap();
        assert_eq!(driver.phase(), Phase::Done);
        assert!(driver.run(&source).is_err());

        assert_eq!(
            trace.seen,
            vec!["n1", "n2", "n3", "n4", "w10", "w11", "a41"]
        );
        assert!(trace.finished);
        assert_eq!(stats.areas, 1);
        assert_eq!(stats.relations, 1);
        assert!(stats.incomplete_relations.is_empty());
    }

    #[test]
    fn two_pass_reports_incomplete_relations() {
        let source = lake_source(false);
        let mut store = LocationStore::flex_mem();
        let mut manager = MultipolygonManager::new(TagRuleSet::accept_all());
        let mut trace = Trace::default();

        let stats = TwoPassDriver::new(&mut store, &mut manager, &mut trace)
            .run(&source)
            .unwrap();
        assert_eq!(stats.incomplete_relations, vec![20]);
        assert_eq!(stats.areas, 0);
    }

    /// Delivers its objects, then fails the pass.
    struct BrokenSource(MemorySource);

    impl Source for BrokenSource {
        fn read(
            &self,
            kinds: ReadKinds,
            handler: &mut dyn FnMut(OsmObject) -> Result<()>,
        ) -> Result<()> {
            self.0.read(kinds, handler)?;
            anyhow::bail!("truncated input")
        }

        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    #[test]
    fn failed_pass_still_finishes_handler() {
        let source = BrokenSource(MemorySource::new(vec![node(1, 0.0, 0.0)]));
        let mut store = LocationStore::flex_mem();
        let mut trace = Trace::default();
        let err = run_single_pass(&source, &mut store, &mut trace).unwrap_err();
        assert!(err.to_string().contains("truncated input"));
        assert_eq!(trace.seen, vec!["n1"]);
        assert!(trace.finished);

        let mut store = LocationStore::flex_mem();
        let mut manager = MultipolygonManager::new(TagRuleSet::accept_all());
        let mut trace = Trace::default();
        let mut driver = TwoPassDriver::new(&mut store, &mut manager, &mut trace);
        assert!(driver.run(&source).is_err());
        assert_eq!(driver.phase(), Phase::Done);
        drop(driver);
        assert!(trace.finished);
        assert!(trace.seen.is_empty());
    }

    #[test]
    fn single_pass_resolves_known_locations_only() {
        let source = MemorySource::new(vec![
            node(1, 0.0, 0.0),
            node(2, 1.0, 1.0),
            OsmObject::Way(Way::new(10, [1, 2, 99], Tags::new())),
        ]);
        let mut store = LocationStore::flex_mem();
        let mut trace = Trace::default();

        let stats = run_single_pass(&source, &mut store, &mut trace).unwrap();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.ways, 1);
        assert_eq!(trace.resolved_ways, vec![(10, 2)]);
        assert!(trace.finished);
    }
}
