use std::collections::BTreeMap;
use std::sync::Arc;

use crate::callback::{run_workers, CallFinish};
use crate::catalog::TileCatalog;
use crate::config::BuildOptions;
use crate::elements::{ElementType, Node, Relation, Tile, TileQuad, Way};
use crate::message;
use crate::partition::relations::{locate_member, place_relation, DeferredRelations, RelationState};
use crate::partition::{IdTable, Indexes, PartitionStats};
use crate::pilestore::{write_records, GhostWay, LocalWay, PileRecords, PileStore, Record};
use crate::utils::{Error, Result, ThreadTimer, Timings};

const MAX_LOGGED_REJECTS: usize = 5;

pub enum PartitionBlock {
    Nodes(Vec<Node>),
    Ways(Vec<Way>),
    Relations(Vec<Relation>),
}

/// What one worker learned while placing its blocks. Merged into the
/// partitioner's indexes at the end of each phase.
#[derive(Default)]
pub struct PartitionResult {
    pub node_piles: IdTable<u32>,
    pub way_quads: IdTable<TileQuad>,
    pub relation_quads: IdTable<TileQuad>,
    pub deferred: Vec<Relation>,
    pub stats: PartitionStats,
    pub timings: Timings,
}

struct PartitionWorker {
    catalog: Arc<TileCatalog>,
    store: Arc<PileStore>,
    indexes: Arc<Indexes>,
    zoom: u32,
    ghost_ways: bool,
    result: PartitionResult,
    error: Option<Error>,
    tm: f64,
}

impl PartitionWorker {
    fn place_node(&mut self, n: Node, records: &mut PileRecords) {
        let pile = self
            .catalog
            .resolve(&Tile::containing(n.lon, n.lat, self.zoom));
        self.result.node_piles.set(n.id, pile);
        self.result.stats.nodes += 1;
        records.add(pile, Record::Node(n));
    }

    fn place_way(&mut self, w: Way, records: &mut PileRecords) {
        let mut tiles = Vec::with_capacity(w.refs.len());
        let mut node_piles: BTreeMap<u32, Vec<i64>> = BTreeMap::new();
        let mut missing = 0;
        for r in &w.refs {
            let p = match self.indexes.node_piles.get(*r) {
                Some(p) => p,
                None => {
                    missing += 1;
                    continue;
                }
            };
            if let Some(t) = self.catalog.tile_of(p) {
                tiles.push(t);
            }
            let nn = node_piles.entry(p).or_insert_with(Vec::new);
            if !nn.contains(r) {
                nn.push(*r);
            }
        }

        let found: usize = node_piles.values().map(|nn| nn.len()).sum();
        if found < 2 {
            if self.result.stats.rejected_ways < MAX_LOGGED_REJECTS {
                message!(
                    "way {}: only {} distinct nodes of {} refs found, skipped",
                    w.id,
                    found,
                    w.refs.len()
                );
            }
            self.result.stats.rejected_ways += 1;
            return;
        }
        if missing > 0 {
            self.result.stats.incomplete_ways += 1;
        }

        let quad = self.catalog.validate(&TileQuad::from_tiles(&tiles));
        self.result.way_quads.set(w.id, quad);
        self.result.stats.ways += 1;

        if self.ghost_ways {
            for (p, refs) in node_piles {
                let outside = match self.catalog.tile_of(p) {
                    Some(t) => !quad.contains(&t),
                    None => false,
                };
                if outside {
                    records.add(
                        p,
                        Record::Ghost(GhostWay {
                            id: w.id,
                            quad,
                            refs,
                        }),
                    );
                    self.result.stats.ghost_records += 1;
                }
            }
        }

        for t in quad.tiles() {
            records.add(
                self.catalog.resolve(&t),
                Record::Way(LocalWay {
                    way: w.clone(),
                    quad,
                    locator: quad.locator_of(&t).unwrap_or(0),
                }),
            );
        }
    }

    fn place_relation(&mut self, r: Relation, records: &mut PileRecords) {
        self.result.stats.relations += 1;
        let defer = r.members.is_empty()
            || r.members.iter().any(|m| {
                m.mem_type == ElementType::Relation
                    && !self.indexes.relation_quads.has_value(m.mem_ref)
            });
        if defer {
            self.result.stats.deferred_relations += 1;
            self.result.deferred.push(r);
            return;
        }

        let mut quad = TileQuad::NONE;
        let mut members = Vec::with_capacity(r.members.len());
        let mut missing = 0;
        for m in &r.members {
            match locate_member(&self.catalog, &self.indexes, m) {
                Some((q, p)) => {
                    quad = quad.add_quad(&q);
                    members.push((m.element_id(), p));
                }
                None => {
                    missing += 1;
                }
            }
        }
        if missing > 0 {
            self.result.stats.incomplete_relations += 1;
        }
        let quad = self.catalog.validate(&quad);
        self.result.relation_quads.set(r.id, quad);
        place_relation(
            &self.catalog,
            &r,
            quad,
            &members,
            records,
            &mut self.result.stats,
        );
    }
}

impl CallFinish for PartitionWorker {
    type CallType = PartitionBlock;
    type ReturnType = PartitionResult;

    fn call(&mut self, block: PartitionBlock) {
        if self.error.is_some() {
            return;
        }
        let tx = ThreadTimer::new();
        let mut records = PileRecords::new();
        match block {
            PartitionBlock::Nodes(nn) => {
                for n in nn {
                    self.place_node(n, &mut records);
                }
            }
            PartitionBlock::Ways(ww) => {
                for w in ww {
                    self.place_way(w, &mut records);
                }
            }
            PartitionBlock::Relations(rr) => {
                for r in rr {
                    self.place_relation(r, &mut records);
                }
            }
        }
        match write_records(&self.store, records) {
            Ok(n) => {
                self.result.stats.bytes_written += n;
            }
            Err(e) => {
                self.error = Some(e);
            }
        }
        self.tm += tx.since();
    }

    fn finish(&mut self) -> Result<PartitionResult> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let mut res = std::mem::take(&mut self.result);
        res.timings.add("partition", self.tm);
        Ok(res)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
enum Phase {
    Nodes,
    Ways,
    Relations,
    Finished,
}

/// Assigns every feature to the piles of its footprint.
///
/// Features must arrive nodes first, then ways, then relations. Each call
/// to `add_nodes`, `add_ways` or `add_relations` hands its blocks to
/// `numchan` workers, which read the indexes built by earlier calls and
/// append to the pile store directly; what they learn is merged when all
/// of them are done. Relations which cannot be placed straight away are
/// held back until `finish`.
pub struct Partitioner {
    catalog: Arc<TileCatalog>,
    store: Arc<PileStore>,
    indexes: Arc<Indexes>,
    deferred: DeferredRelations,
    stats: PartitionStats,
    timings: Timings,
    phase: Phase,
    numchan: usize,
    zoom: u32,
    ghost_ways: bool,
    relation_pass_limit: usize,
}

impl Partitioner {
    pub fn new(
        catalog: Arc<TileCatalog>,
        store: Arc<PileStore>,
        options: &BuildOptions,
    ) -> Result<Partitioner> {
        if store.pile_count() < catalog.pile_count() {
            return Err(Error::InvalidInput(format!(
                "pile store has {} piles, catalog needs {}",
                store.pile_count(),
                catalog.pile_count()
            )));
        }
        let zoom = match options.max_zoom {
            Some(z) => u32::min(z, catalog.max_zoom()),
            None => catalog.max_zoom(),
        };
        Ok(Partitioner {
            catalog,
            store,
            indexes: Arc::new(Indexes::new()),
            deferred: DeferredRelations::new(),
            stats: PartitionStats::default(),
            timings: Timings::new(),
            phase: Phase::Nodes,
            numchan: options.numchan,
            zoom,
            ghost_ways: options.ghost_ways,
            relation_pass_limit: options.relation_pass_limit,
        })
    }

    pub fn node(&mut self, n: Node) -> Result<()> {
        self.run_blocks(Phase::Nodes, vec![PartitionBlock::Nodes(vec![n])], 0)
    }

    pub fn way(&mut self, w: Way) -> Result<()> {
        self.run_blocks(Phase::Ways, vec![PartitionBlock::Ways(vec![w])], 0)
    }

    pub fn relation(&mut self, r: Relation) -> Result<()> {
        self.run_blocks(Phase::Relations, vec![PartitionBlock::Relations(vec![r])], 0)
    }

    pub fn add_nodes(&mut self, blocks: Vec<Vec<Node>>) -> Result<()> {
        let bl = blocks.into_iter().map(PartitionBlock::Nodes).collect();
        self.run_blocks(Phase::Nodes, bl, self.numchan)
    }

    pub fn add_ways(&mut self, blocks: Vec<Vec<Way>>) -> Result<()> {
        let bl = blocks.into_iter().map(PartitionBlock::Ways).collect();
        self.run_blocks(Phase::Ways, bl, self.numchan)
    }

    pub fn add_relations(&mut self, blocks: Vec<Vec<Relation>>) -> Result<()> {
        let bl = blocks.into_iter().map(PartitionBlock::Relations).collect();
        self.run_blocks(Phase::Relations, bl, self.numchan)
    }

    fn enter_phase(&mut self, phase: Phase) -> Result<()> {
        if self.phase == Phase::Finished {
            return Err(Error::InvalidInput(String::from(
                "partitioner already finished",
            )));
        }
        if phase < self.phase {
            return Err(Error::InvalidInput(format!(
                "{:?} after {:?}: features must be ordered nodes, ways, relations",
                phase, self.phase
            )));
        }
        self.phase = phase;
        Ok(())
    }

    fn run_blocks(&mut self, phase: Phase, blocks: Vec<PartitionBlock>, numchan: usize) -> Result<()> {
        self.enter_phase(phase)?;
        if blocks.is_empty() {
            return Ok(());
        }

        let numchan = usize::min(numchan, blocks.len());
        let results = {
            let catalog = &self.catalog;
            let store = &self.store;
            let indexes = &self.indexes;
            let zoom = self.zoom;
            let ghost_ways = self.ghost_ways;
            run_workers(blocks, numchan, |_| {
                Box::new(PartitionWorker {
                    catalog: catalog.clone(),
                    store: store.clone(),
                    indexes: indexes.clone(),
                    zoom,
                    ghost_ways,
                    result: PartitionResult::default(),
                    error: None,
                    tm: 0.0,
                })
            })?
        };
        self.merge_results(results)
    }

    fn merge_results(&mut self, results: Vec<PartitionResult>) -> Result<()> {
        let indexes = match Arc::get_mut(&mut self.indexes) {
            Some(i) => i,
            None => {
                return Err(Error::Worker(String::from(
                    "partition indexes still shared",
                )));
            }
        };
        for r in results {
            indexes.node_piles.merge(r.node_piles);
            indexes.way_quads.merge(r.way_quads);
            indexes.relation_quads.merge(r.relation_quads);
            for d in r.deferred {
                self.deferred.add(d);
            }
            self.stats.combine(&r.stats);
            self.timings.combine(r.timings);
        }
        Ok(())
    }

    /// Places every deferred relation and returns the final counts.
    pub fn finish(&mut self) -> Result<PartitionStats> {
        self.enter_phase(Phase::Finished)?;
        let tx = ThreadTimer::new();

        let ndeferred = self.deferred.len();
        let indexes = match Arc::get_mut(&mut self.indexes) {
            Some(i) => i,
            None => {
                return Err(Error::Worker(String::from(
                    "partition indexes still shared",
                )));
            }
        };
        let records = self.deferred.resolve(
            &self.catalog,
            indexes,
            self.relation_pass_limit,
            &mut self.stats,
        );
        message!(
            "node piles: {}; way footprints: {}; relation footprints: {}",
            indexes.node_piles,
            indexes.way_quads,
            indexes.relation_quads
        );
        self.stats.bytes_written += write_records(&self.store, records)?;
        self.timings.add("deferred relations", tx.since());

        message!(
            "placed {} deferred relations in {} passes ({} in cycles)",
            ndeferred,
            self.stats.relation_passes,
            self.stats.cycle_relations
        );
        Ok(self.stats.clone())
    }

    pub fn relation_state(&self, id: i64) -> RelationState {
        if let Some(s) = self.deferred.state(id) {
            return s;
        }
        match self.indexes.relation_quads.get(id) {
            Some(q) => RelationState::Final(q),
            None => RelationState::Unknown,
        }
    }

    pub fn node_pile(&self, id: i64) -> Option<u32> {
        self.indexes.node_piles.get(id)
    }

    pub fn way_quad(&self, id: i64) -> Option<TileQuad> {
        self.indexes.way_quads.get(id)
    }

    pub fn relation_quad(&self, id: i64) -> Option<TileQuad> {
        self.indexes.relation_quads.get(id)
    }

    pub fn stats(&self) -> &PartitionStats {
        &self.stats
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }
}
