use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::catalog::TileCatalog;
use crate::elements::{Bbox, ElementId, ElementType, Member, Tile, TileQuad};
use crate::partition::completing_pile;
use crate::pilestore::{
    write_records, BoundsProxy, LocalBounds, NodeProxy, PileContents, PileRecords, PileStore,
    Record,
};
use crate::utils::{Error, Result};

/// How far a pile has got through resolution.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, serde::Serialize)]
pub enum PileState {
    Unscanned,
    LocalIndexed,
    ForeignApplied,
    ProxiesEmitted,
}

/// The box of a way or relation. `Partial` when some member could not be
/// found: the box covers only the members which were.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Bounds {
    Resolved(Bbox),
    Partial(Bbox),
}

impl Bounds {
    pub fn bbox(&self) -> Bbox {
        match self {
            Bounds::Resolved(b) | Bounds::Partial(b) => *b,
        }
    }
    pub fn is_resolved(&self) -> bool {
        match self {
            Bounds::Resolved(_) => true,
            Bounds::Partial(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum NodeRef {
    Local(usize),
    Foreign(usize),
}

#[derive(Debug, Clone, Copy)]
enum BoundsRef {
    /// Computed in this pile.
    Local(usize),
    /// A proxy written by an earlier batch.
    Foreign(usize),
}

/// What happened to one pile.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PileOutcome {
    pub pile: u32,
    pub state: PileState,
    pub local_nodes: usize,
    pub local_ways: usize,
    pub local_relations: usize,
    pub completed_ways: usize,
    pub partial_ways: usize,
    pub completed_relations: usize,
    pub partial_relations: usize,
    pub node_proxies: usize,
    pub bounds_proxies: usize,
    pub bytes_written: usize,
}

impl PileOutcome {
    fn new(pile: u32) -> PileOutcome {
        PileOutcome {
            pile,
            state: PileState::Unscanned,
            local_nodes: 0,
            local_ways: 0,
            local_relations: 0,
            completed_ways: 0,
            partial_ways: 0,
            completed_relations: 0,
            partial_relations: 0,
            node_proxies: 0,
            bounds_proxies: 0,
            bytes_written: 0,
        }
    }
}

/// Proxy records bound for other piles, at most one per feature and pile.
struct Proxies {
    pile: u32,
    records: PileRecords,
    sent: BTreeMap<u32, BTreeSet<ElementId>>,
    nodes: usize,
    bounds: usize,
}

impl Proxies {
    fn new(pile: u32) -> Proxies {
        Proxies {
            pile,
            records: PileRecords::new(),
            sent: BTreeMap::new(),
            nodes: 0,
            bounds: 0,
        }
    }

    fn first_send(&mut self, target: u32, e: ElementId) -> bool {
        if target == self.pile {
            return false;
        }
        self.sent.entry(target).or_insert_with(BTreeSet::new).insert(e)
    }

    fn node(&mut self, target: u32, n: NodeProxy) {
        if self.first_send(target, ElementId::node(n.id)) {
            self.records.add(target, Record::ForeignNode(n));
            self.nodes += 1;
        }
    }

    fn bounds(&mut self, target: u32, e: ElementId, p: BoundsProxy) {
        if self.first_send(target, e) {
            match e.elem_type {
                ElementType::Way => self.records.add(target, Record::ForeignWay(p)),
                _ => self.records.add(target, Record::ForeignRelation(p)),
            }
            self.bounds += 1;
        }
    }
}

/// Works through one pile: reads everything appended to it, computes the
/// boxes of the ways and relations whose footprints complete here, and
/// sends coordinates and boxes on to every pile which needs them.
pub struct PileTask<'a> {
    catalog: &'a TileCatalog,
    pile: u32,
    state: PileState,
    contents: PileContents,

    nodes: HashMap<i64, NodeRef>,
    ways: HashMap<i64, usize>,
    relations: HashMap<i64, usize>,
    foreign: HashMap<ElementId, BoundsRef>,

    computed: Vec<(ElementId, Bounds, TileQuad)>,
    outcome: PileOutcome,
}

impl<'a> PileTask<'a> {
    pub fn new(catalog: &'a TileCatalog, pile: u32) -> PileTask<'a> {
        PileTask {
            catalog,
            pile,
            state: PileState::Unscanned,
            contents: PileContents::default(),
            nodes: HashMap::new(),
            ways: HashMap::new(),
            relations: HashMap::new(),
            foreign: HashMap::new(),
            computed: Vec::new(),
            outcome: PileOutcome::new(pile),
        }
    }

    pub fn state(&self) -> PileState {
        self.state
    }

    fn expect_state(&self, st: PileState) -> Result<()> {
        if self.state != st {
            return Err(Error::InvalidInput(format!(
                "pile {}: expected {:?}, at {:?}",
                self.pile, st, self.state
            )));
        }
        Ok(())
    }

    /// Reads the pile and indexes its local features.
    pub fn index_local(&mut self, data: &[u8]) -> Result<()> {
        self.expect_state(PileState::Unscanned)?;
        self.contents = PileContents::read(data)?;

        for (i, n) in self.contents.nodes.iter().enumerate() {
            self.nodes.insert(n.id, NodeRef::Local(i));
        }
        for (i, w) in self.contents.ways.iter().enumerate() {
            self.ways.insert(w.way.id, i);
        }
        for (i, r) in self.contents.relations.iter().enumerate() {
            self.relations.insert(r.relation.id, i);
        }
        self.outcome.local_nodes = self.contents.nodes.len();
        self.outcome.local_ways = self.contents.ways.len();
        self.outcome.local_relations = self.contents.relations.len();

        self.state = PileState::LocalIndexed;
        Ok(())
    }

    /// Indexes the proxies sent here by earlier batches. Local features
    /// take precedence over proxies with the same id.
    pub fn apply_foreign(&mut self) -> Result<()> {
        self.expect_state(PileState::LocalIndexed)?;
        for (i, n) in self.contents.foreign_nodes.iter().enumerate() {
            self.nodes.entry(n.id).or_insert(NodeRef::Foreign(i));
        }
        for (i, w) in self.contents.foreign_ways.iter().enumerate() {
            self.foreign
                .entry(ElementId::way(w.id))
                .or_insert(BoundsRef::Foreign(i));
        }
        for (i, r) in self.contents.foreign_relations.iter().enumerate() {
            self.foreign
                .entry(ElementId::relation(r.id))
                .or_insert(BoundsRef::Foreign(i));
        }

        self.compute_way_bounds();
        self.compute_relation_bounds();
        self.state = PileState::ForeignApplied;
        Ok(())
    }

    fn completes_here(&self, quad: &TileQuad) -> bool {
        completing_pile(self.catalog, quad) == self.pile
    }

    fn node_coords(&self, id: i64) -> Option<(i32, i32)> {
        match self.nodes.get(&id)? {
            NodeRef::Local(i) => {
                let n = &self.contents.nodes[*i];
                Some((n.lon, n.lat))
            }
            NodeRef::Foreign(i) => {
                let n = &self.contents.foreign_nodes[*i];
                Some((n.lon, n.lat))
            }
        }
    }

    fn is_local_node(&self, id: i64) -> bool {
        match self.nodes.get(&id) {
            Some(NodeRef::Local(_)) => true,
            _ => false,
        }
    }

    fn element_bounds(&self, e: &ElementId) -> Option<Bbox> {
        match self.foreign.get(e)? {
            BoundsRef::Local(i) => Some(self.computed[*i].1.bbox()),
            BoundsRef::Foreign(i) => Some(match e.elem_type {
                ElementType::Way => self.contents.foreign_ways[*i].bbox,
                _ => self.contents.foreign_relations[*i].bbox,
            }),
        }
    }

    fn element_resolved(&self, e: &ElementId) -> bool {
        match self.foreign.get(e) {
            Some(BoundsRef::Local(i)) => self.computed[*i].1.is_resolved(),
            Some(BoundsRef::Foreign(_)) => true,
            None => false,
        }
    }

    fn set_computed(&mut self, e: ElementId, b: Bounds, q: TileQuad) {
        let i = self.computed.len();
        self.computed.push((e, b, q));
        self.foreign.insert(e, BoundsRef::Local(i));
    }

    fn compute_way_bounds(&mut self) {
        for i in 0..self.contents.ways.len() {
            let lw = &self.contents.ways[i];
            if !self.completes_here(&lw.quad) {
                continue;
            }
            let mut bbox = Bbox::empty();
            let mut missing = false;
            for r in &lw.way.refs {
                match self.node_coords(*r) {
                    Some((ln, lt)) => bbox.expand(ln, lt),
                    None => missing = true,
                }
            }
            let b = if missing {
                self.outcome.partial_ways += 1;
                Bounds::Partial(bbox)
            } else {
                Bounds::Resolved(bbox)
            };
            self.outcome.completed_ways += 1;
            let (id, quad) = (lw.way.id, lw.quad);
            self.set_computed(ElementId::way(id), b, quad);
        }
    }

    /// Boxes of the relations completing here. Members completing here as
    /// well are worked through with a worklist, so nested relations and
    /// reference cycles settle on a fixed point instead of recursing.
    fn compute_relation_bounds(&mut self) {
        let here: Vec<usize> = (0..self.contents.relations.len())
            .filter(|i| self.completes_here(&self.contents.relations[*i].quad))
            .collect();
        if here.is_empty() {
            return;
        }
        let slot: HashMap<i64, usize> = here
            .iter()
            .enumerate()
            .map(|(s, i)| (self.contents.relations[*i].relation.id, s))
            .collect();

        let mut bboxes = vec![Bbox::empty(); here.len()];
        let mut partial = vec![false; here.len()];
        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); here.len()];
        for (s, i) in here.iter().enumerate() {
            for m in &self.contents.relations[*i].relation.members {
                if m.mem_type == ElementType::Relation {
                    if let Some(ms) = slot.get(&m.mem_ref) {
                        if !parents[*ms].contains(&s) {
                            parents[*ms].push(s);
                        }
                        continue;
                    }
                }
                if !self.member_found(m) {
                    partial[s] = true;
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..here.len()).collect();
        let mut queued = vec![true; here.len()];
        while let Some(s) = queue.pop_front() {
            queued[s] = false;
            let mut bx = Bbox::empty();
            for m in &self.contents.relations[here[s]].relation.members {
                let mb = match (m.mem_type, slot.get(&m.mem_ref)) {
                    (ElementType::Relation, Some(ms)) => Some(bboxes[*ms]),
                    _ => self.member_bbox(m),
                };
                if let Some(mb) = mb {
                    bx.expand_box(&mb);
                }
            }
            if bx != bboxes[s] {
                bboxes[s] = bx;
                for p in &parents[s] {
                    if !queued[*p] {
                        queued[*p] = true;
                        queue.push_back(*p);
                    }
                }
            }
        }

        // a relation is partial if anything it contains is
        let mut changed = true;
        while changed {
            changed = false;
            for s in 0..here.len() {
                if partial[s] {
                    for p in &parents[s] {
                        if !partial[*p] {
                            partial[*p] = true;
                            changed = true;
                        }
                    }
                }
            }
        }

        for (s, i) in here.iter().enumerate() {
            let lr = &self.contents.relations[*i];
            let (id, quad) = (lr.relation.id, lr.quad);
            let b = if partial[s] {
                self.outcome.partial_relations += 1;
                Bounds::Partial(bboxes[s])
            } else {
                Bounds::Resolved(bboxes[s])
            };
            self.outcome.completed_relations += 1;
            self.set_computed(ElementId::relation(id), b, quad);
        }
    }

    fn member_bbox(&self, m: &Member) -> Option<Bbox> {
        match m.mem_type {
            ElementType::Node => {
                let (ln, lt) = self.node_coords(m.mem_ref)?;
                Some(Bbox::new(ln, lt, ln, lt))
            }
            _ => self.element_bounds(&m.element_id()),
        }
    }

    fn member_found(&self, m: &Member) -> bool {
        match m.mem_type {
            ElementType::Node => self.node_coords(m.mem_ref).is_some(),
            _ => self.element_resolved(&m.element_id()),
        }
    }

    /// The box of `e` if it was computed in this pile.
    pub fn computed_bounds(&self, e: &ElementId) -> Option<Bounds> {
        match self.foreign.get(e)? {
            BoundsRef::Local(i) => Some(self.computed[*i].1),
            BoundsRef::Foreign(_) => None,
        }
    }

    fn send_member(&self, proxies: &mut Proxies, target: u32, e: &ElementId) {
        match e.elem_type {
            ElementType::Node => {
                if let Some(NodeRef::Local(i)) = self.nodes.get(&e.id) {
                    let n = &self.contents.nodes[*i];
                    proxies.node(
                        target,
                        NodeProxy {
                            id: n.id,
                            lon: n.lon,
                            lat: n.lat,
                        },
                    );
                }
            }
            _ => {
                if let Some(BoundsRef::Local(i)) = self.foreign.get(e) {
                    let (_, b, q) = &self.computed[*i];
                    proxies.bounds(
                        target,
                        *e,
                        BoundsProxy {
                            id: e.id,
                            bbox: b.bbox(),
                            quad: *q,
                        },
                    );
                }
            }
        }
    }

    /// Piles of the tiles of `quad` other than this one.
    fn other_piles(&self, quad: &TileQuad) -> Vec<u32> {
        let rest = match self.catalog.tile_of(self.pile) {
            Some(t) => quad.subtract_tile(&t),
            None => *quad,
        };
        rest.tiles()
            .map(|t: Tile| self.catalog.resolve(&t))
            .collect()
    }

    /// Builds every record this pile sends out, plus the boxes it keeps.
    pub fn emit_proxies(&mut self) -> Result<PileRecords> {
        self.expect_state(PileState::ForeignApplied)?;
        let mut proxies = Proxies::new(self.pile);

        // boxes completed here go to every other tile of the footprint
        for (e, b, q) in &self.computed {
            proxies.records.add(
                self.pile,
                Record::Bounds(LocalBounds {
                    element: *e,
                    bbox: b.bbox(),
                    quad: *q,
                }),
            );
            for p in self.other_piles(q) {
                self.send_member(&mut proxies, p, e);
            }
        }

        // node coordinates go to the other tiles of each way using them
        for lw in &self.contents.ways {
            let targets = self.other_piles(&lw.quad);
            for r in &lw.way.refs {
                if self.is_local_node(*r) {
                    for p in &targets {
                        self.send_member(&mut proxies, *p, &ElementId::node(*r));
                    }
                }
            }
        }
        for g in &self.contents.ghosts {
            let targets = self.other_piles(&g.quad);
            for r in &g.refs {
                for p in &targets {
                    self.send_member(&mut proxies, *p, &ElementId::node(*r));
                }
            }
        }

        // members to the pile completing each parent relation
        for lr in &self.contents.relations {
            let target = completing_pile(self.catalog, &lr.quad);
            for m in &lr.relation.members {
                self.send_member(&mut proxies, target, &m.element_id());
            }
        }
        for ms in &self.contents.memberships {
            let target = completing_pile(self.catalog, &ms.quad);
            for e in &ms.members {
                self.send_member(&mut proxies, target, e);
            }
        }

        self.outcome.node_proxies = proxies.nodes;
        self.outcome.bounds_proxies = proxies.bounds;
        self.state = PileState::ProxiesEmitted;
        Ok(proxies.records)
    }

    pub fn into_outcome(mut self) -> PileOutcome {
        self.outcome.state = self.state;
        self.outcome
    }
}

/// Runs one pile through every state, appending what it produces to
/// `store`.
pub fn resolve_pile(catalog: &TileCatalog, store: &PileStore, pile: u32) -> Result<PileOutcome> {
    let mut task = PileTask::new(catalog, pile);
    let data = store.load(pile)?;
    task.index_local(&data)?;
    task.apply_foreign()?;
    let records = task.emit_proxies()?;
    let nbytes = write_records(store, records)?;
    let mut outcome = task.into_outcome();
    outcome.bytes_written = nbytes;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{Node, Relation, Way};
    use crate::pilestore::{pack_group, GroupKind, LocalRelation, LocalWay, Membership};

    fn catalog() -> TileCatalog {
        let mut tiles = vec![Tile::root()];
        for r in 0..2 {
            for c in 0..2 {
                tiles.push(Tile::new(1, c, r));
            }
        }
        TileCatalog::from_tiles(&tiles).unwrap()
    }

    fn group(kind: GroupKind, recs: Vec<Record>) -> Vec<u8> {
        pack_group(kind, &recs).unwrap()
    }

    #[test]
    fn test_way_completing_here() {
        let cat = catalog();
        let nw = Tile::new(1, 0, 0);
        let ne = Tile::new(1, 1, 0);
        let quad = TileQuad::from_tile(nw).add_tile(&ne);
        let pne = cat.pile_of(&ne).unwrap();
        let pnw = cat.pile_of(&nw).unwrap();
        assert_eq!(completing_pile(&cat, &quad), pne);

        let store = PileStore::in_memory(cat.pile_count());
        let mut data = group(
            GroupKind::LocalNodes,
            vec![Record::Node(Node::new(2, 100, 200, Vec::new()))],
        );
        data.extend(group(
            GroupKind::LocalWays,
            vec![Record::Way(LocalWay {
                way: Way::new(5, Vec::new(), vec![1, 2, 3]),
                quad,
                locator: 1,
            })],
        ));
        data.extend(group(
            GroupKind::ForeignNodes,
            vec![Record::ForeignNode(NodeProxy { id: 1, lon: -50, lat: 300 })],
        ));
        store.append(pne, &data).unwrap();

        let mut task = PileTask::new(&cat, pne);
        assert!(task.apply_foreign().is_err());
        task.index_local(&store.load(pne).unwrap()).unwrap();
        task.apply_foreign().unwrap();
        // node 3 never arrived
        assert_eq!(
            task.computed_bounds(&ElementId::way(5)),
            Some(Bounds::Partial(Bbox::new(-50, 200, 100, 300)))
        );
        let recs = task.emit_proxies().unwrap();
        assert_eq!(task.state(), PileState::ProxiesEmitted);
        let packed = recs.pack().unwrap();
        assert_eq!(packed.len(), 2);

        let mut out = BTreeMap::new();
        for (p, d) in packed {
            out.insert(p, PileContents::read(&d).unwrap());
        }
        let here = &out[&pne];
        assert_eq!(here.bounds[0].element, ElementId::way(5));
        let there = &out[&pnw];
        assert_eq!(there.foreign_ways[0].id, 5);
        assert_eq!(there.foreign_ways[0].quad, quad);
        // the local node goes to the other tile, the foreign one doesn't
        assert_eq!(there.foreign_nodes, vec![NodeProxy { id: 2, lon: 100, lat: 200 }]);

        let oc = task.into_outcome();
        assert_eq!(oc.completed_ways, 1);
        assert_eq!(oc.partial_ways, 1);
        assert_eq!(oc.node_proxies, 1);
        assert_eq!(oc.bounds_proxies, 1);
    }

    #[test]
    fn test_relation_cycle_settles() {
        let cat = catalog();
        let t = Tile::new(1, 1, 1);
        let pile = cat.pile_of(&t).unwrap();
        let quad = TileQuad::from_tile(t);
        let rel = |id: i64, other: i64, node: i64| {
            Record::Relation(LocalRelation {
                relation: Relation::new(
                    id,
                    Vec::new(),
                    vec![
                        Member::new(String::new(), ElementType::Relation, other),
                        Member::new(String::new(), ElementType::Node, node),
                    ],
                ),
                quad,
                locator: 0,
            })
        };
        let store = PileStore::in_memory(cat.pile_count());
        let mut data = group(
            GroupKind::LocalNodes,
            vec![
                Record::Node(Node::new(1, 10, 10, Vec::new())),
                Record::Node(Node::new(2, 20, 30, Vec::new())),
            ],
        );
        data.extend(group(
            GroupKind::LocalRelations,
            vec![rel(7, 8, 1), rel(8, 7, 2), rel(9, 8, 99)],
        ));
        data.extend(group(
            GroupKind::Memberships,
            vec![Record::Membership(Membership {
                parent: 40,
                quad: TileQuad::from_tile(Tile::root()),
                members: vec![ElementId::relation(7), ElementId::node(2)],
            })],
        ));
        store.append(pile, &data).unwrap();

        let oc = resolve_pile(&cat, &store, pile).unwrap();
        assert_eq!(oc.state, PileState::ProxiesEmitted);
        assert_eq!(oc.completed_relations, 3);
        assert_eq!(oc.partial_relations, 1);

        let pc = PileContents::read(&store.load(pile).unwrap()).unwrap();
        let b7 = pc.bounds_of(&ElementId::relation(7)).unwrap();
        let b8 = pc.bounds_of(&ElementId::relation(8)).unwrap();
        assert_eq!(b7.bbox, Bbox::new(10, 10, 20, 30));
        assert_eq!(b7.bbox, b8.bbox);
        assert_eq!(pc.bounds_of(&ElementId::relation(9)).unwrap().bbox, Bbox::new(10, 10, 20, 30));

        // the membership forwards relation 7 and node 2 to the root
        let root = PileContents::read(&store.load(cat.pile_of(&Tile::root()).unwrap()).unwrap()).unwrap();
        assert_eq!(root.foreign_relations.len(), 1);
        assert_eq!(root.foreign_relations[0].id, 7);
        assert_eq!(root.foreign_nodes.len(), 1);
    }
}
