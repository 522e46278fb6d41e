use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::{TileCatalog, PURGATORY};
use crate::elements::{ElementId, ElementType, Member, Relation, TileQuad};
use crate::message;
use crate::partition::{Indexes, PartitionStats};
use crate::pilestore::{LocalRelation, Membership, PileRecords, Record};

/// Where a member lives: its footprint, and the pile in which its bounds
/// become complete.
pub(super) fn locate_member(
    catalog: &TileCatalog,
    indexes: &Indexes,
    m: &Member,
) -> Option<(TileQuad, u32)> {
    match m.mem_type {
        ElementType::Node => {
            let p = indexes.node_piles.get(m.mem_ref)?;
            let q = match catalog.tile_of(p) {
                Some(t) => TileQuad::from_tile(t),
                None => TileQuad::NONE,
            };
            Some((q, p))
        }
        ElementType::Way => {
            let q = indexes.way_quads.get(m.mem_ref)?;
            Some((q, completing_pile(catalog, &q)))
        }
        ElementType::Relation => {
            let q = indexes.relation_quads.get(m.mem_ref)?;
            Some((q, completing_pile(catalog, &q)))
        }
    }
}

pub fn completing_pile(catalog: &TileCatalog, quad: &TileQuad) -> u32 {
    match quad.completing_tile() {
        Some(t) => catalog.resolve(&t),
        None => PURGATORY,
    }
}

/// Writes `relation` to every pile of `quad` (Purgatory when `quad` is
/// none), and a membership record to each member pile outside `quad`.
pub(super) fn place_relation(
    catalog: &TileCatalog,
    relation: &Relation,
    quad: TileQuad,
    members: &[(ElementId, u32)],
    records: &mut PileRecords,
    stats: &mut PartitionStats,
) {
    if quad.is_none() {
        records.add(
            PURGATORY,
            Record::Relation(LocalRelation {
                relation: relation.clone(),
                quad,
                locator: 0,
            }),
        );
        stats.purgatory_relations += 1;
    } else {
        for t in quad.tiles() {
            records.add(
                catalog.resolve(&t),
                Record::Relation(LocalRelation {
                    relation: relation.clone(),
                    quad,
                    locator: quad.locator_of(&t).unwrap_or(0),
                }),
            );
        }
    }

    let mut by_pile: BTreeMap<u32, Vec<ElementId>> = BTreeMap::new();
    for (e, p) in members {
        if *p == PURGATORY {
            continue;
        }
        if let Some(t) = catalog.tile_of(*p) {
            if quad.contains(&t) {
                continue;
            }
        }
        by_pile.entry(*p).or_insert_with(Vec::new).push(*e);
    }
    for (p, mems) in by_pile {
        records.add(
            p,
            Record::Membership(Membership {
                parent: relation.id,
                quad,
                members: mems,
            }),
        );
        stats.membership_records += 1;
    }
}

pub(super) struct DeferredRelation {
    pub relation: Relation,
    pub quad: TileQuad,
    pub parents: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RelationState {
    Unknown,
    /// No members: waits for a parent relation to give it a footprint.
    Empty,
    Deferred(TileQuad),
    Final(TileQuad),
    /// An empty relation nothing referenced.
    Dropped,
}

/// Relations which could not be placed when they were read: those with
/// relation members, and those with no members at all.
pub struct DeferredRelations {
    pending: BTreeMap<i64, DeferredRelation>,
    dropped: BTreeSet<i64>,
}

impl DeferredRelations {
    pub fn new() -> DeferredRelations {
        DeferredRelations {
            pending: BTreeMap::new(),
            dropped: BTreeSet::new(),
        }
    }

    pub fn add(&mut self, relation: Relation) {
        self.pending.insert(
            relation.id,
            DeferredRelation {
                relation,
                quad: TileQuad::NONE,
                parents: Vec::new(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn state(&self, id: i64) -> Option<RelationState> {
        if let Some(d) = self.pending.get(&id) {
            if d.relation.members.is_empty() {
                return Some(RelationState::Empty);
            }
            return Some(RelationState::Deferred(d.quad));
        }
        if self.dropped.contains(&id) {
            return Some(RelationState::Dropped);
        }
        None
    }

    /// Places every pending relation, adding their footprints to
    /// `indexes.relation_quads` and returning the records to write.
    ///
    /// Footprints are recomputed pass by pass from the members' current
    /// footprints; a relation is placed once none of its relation members
    /// are pending. When a pass changes nothing the rest are in reference
    /// cycles: they are placed finest zoom first. Empty relations are
    /// placed last, over the union of the footprints of the relations that
    /// referenced them.
    pub fn resolve(
        &mut self,
        catalog: &TileCatalog,
        indexes: &mut Indexes,
        pass_limit: usize,
        stats: &mut PartitionStats,
    ) -> PileRecords {
        let mut records = PileRecords::new();

        let mut empties = BTreeMap::new();
        let mut active = BTreeMap::new();
        for (id, d) in std::mem::take(&mut self.pending) {
            if d.relation.members.is_empty() {
                empties.insert(id, d);
            } else {
                active.insert(id, d);
            }
        }

        let mut passes = 0;
        while !active.is_empty() {
            passes += 1;
            let mut changed = false;

            let ids: Vec<i64> = active.keys().cloned().collect();
            for id in &ids {
                let q = member_quad(catalog, indexes, &active, &active[id].relation);
                if let Some(d) = active.get_mut(id) {
                    if d.quad != q {
                        d.quad = q;
                        changed = true;
                    }
                }
            }

            let ready: Vec<i64> = ids
                .iter()
                .filter(|id| {
                    active[*id]
                        .relation
                        .members
                        .iter()
                        .all(|m| m.mem_type != ElementType::Relation || !active.contains_key(&m.mem_ref))
                })
                .cloned()
                .collect();

            for id in ready {
                if let Some(d) = active.remove(&id) {
                    finalize(catalog, indexes, d, &active, &mut empties, &mut records, stats);
                    changed = true;
                }
            }

            if !changed {
                break;
            }
            if passes >= pass_limit {
                message!("deferred relations: stopped after {} passes", passes);
                break;
            }
        }
        stats.relation_passes += passes;

        if !active.is_empty() {
            let mut order: Vec<(i64, i64)> = active
                .iter()
                .map(|(id, d)| (*id, if d.quad.is_none() { -1 } else { d.quad.zoom() as i64 }))
                .collect();
            order.sort_by_key(|(_, z)| Reverse(*z));

            stats.cycle_relations += order.len();
            for (id, _) in order {
                let q = member_quad(catalog, indexes, &active, &active[&id].relation);
                if let Some(mut d) = active.remove(&id) {
                    d.quad = q;
                    finalize(catalog, indexes, d, &active, &mut empties, &mut records, stats);
                }
            }
        }

        for (id, d) in empties {
            if d.parents.is_empty() {
                self.dropped.insert(id);
                stats.dropped_empty_relations += 1;
                continue;
            }
            let mut q = TileQuad::NONE;
            for p in &d.parents {
                if let Some(pq) = indexes.relation_quads.get(*p) {
                    q = q.add_quad(&pq);
                }
            }
            let q = catalog.validate(&q);
            place_relation(catalog, &d.relation, q, &[], &mut records, stats);
            indexes.relation_quads.set(id, q);
        }

        records
    }
}

impl Default for DeferredRelations {
    fn default() -> Self {
        DeferredRelations::new()
    }
}

fn member_quad(
    catalog: &TileCatalog,
    indexes: &Indexes,
    active: &BTreeMap<i64, DeferredRelation>,
    relation: &Relation,
) -> TileQuad {
    let mut q = TileQuad::NONE;
    for m in &relation.members {
        if m.mem_type == ElementType::Relation {
            if let Some(d) = active.get(&m.mem_ref) {
                q = q.add_quad(&d.quad);
                continue;
            }
        }
        if let Some((mq, _)) = locate_member(catalog, indexes, m) {
            q = q.add_quad(&mq);
        }
    }
    catalog.validate(&q)
}

fn finalize(
    catalog: &TileCatalog,
    indexes: &mut Indexes,
    d: DeferredRelation,
    active: &BTreeMap<i64, DeferredRelation>,
    empties: &mut BTreeMap<i64, DeferredRelation>,
    records: &mut PileRecords,
    stats: &mut PartitionStats,
) {
    let mut members = Vec::with_capacity(d.relation.members.len());
    let mut missing = 0;
    for m in &d.relation.members {
        if m.mem_type == ElementType::Relation {
            if let Some(e) = empties.get_mut(&m.mem_ref) {
                if !e.parents.contains(&d.relation.id) {
                    e.parents.push(d.relation.id);
                }
                continue;
            }
            // cycle partners not yet finalized, and the relation itself
            let partner = if m.mem_ref == d.relation.id {
                Some(d.quad)
            } else {
                active.get(&m.mem_ref).map(|a| a.quad)
            };
            if let Some(q) = partner {
                members.push((m.element_id(), completing_pile(catalog, &q)));
                continue;
            }
        }
        match locate_member(catalog, indexes, m) {
            Some((_, p)) => members.push((m.element_id(), p)),
            None => missing += 1,
        }
    }
    if missing > 0 {
        stats.incomplete_relations += 1;
    }
    place_relation(catalog, &d.relation, d.quad, &members, records, stats);
    indexes.relation_quads.set(d.relation.id, d.quad);
}
