use crate::elements::{Bbox, ElementId, ElementType, Member, Node, Relation, Tag, TileQuad, Way};
use crate::pbfformat::{
    pack_delta_int_ref, varint_length, write_int, write_string, write_varint, Cursor,
};
use crate::utils::{Error, Result};

/// Marker byte opening each group of records in a pile.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum GroupKind {
    LocalNodes,
    LocalWays,
    LocalRelations,
    ForeignNodes,
    ForeignWays,
    ForeignRelations,
    GhostWays,
    Memberships,
    LocalBounds,
}

impl GroupKind {
    pub fn marker(&self) -> u8 {
        match self {
            GroupKind::LocalNodes => 1,
            GroupKind::LocalWays => 2,
            GroupKind::LocalRelations => 3,
            GroupKind::ForeignNodes => 4,
            GroupKind::ForeignWays => 5,
            GroupKind::ForeignRelations => 6,
            GroupKind::GhostWays => 7,
            GroupKind::Memberships => 8,
            GroupKind::LocalBounds => 9,
        }
    }

    pub fn from_marker(m: u8) -> Result<GroupKind> {
        match m {
            1 => Ok(GroupKind::LocalNodes),
            2 => Ok(GroupKind::LocalWays),
            3 => Ok(GroupKind::LocalRelations),
            4 => Ok(GroupKind::ForeignNodes),
            5 => Ok(GroupKind::ForeignWays),
            6 => Ok(GroupKind::ForeignRelations),
            7 => Ok(GroupKind::GhostWays),
            8 => Ok(GroupKind::Memberships),
            9 => Ok(GroupKind::LocalBounds),
            _ => Err(Error::InvalidData(format!("unknown group marker {}", m))),
        }
    }
}

/// A way in one of its home piles. `locator` is the position of this
/// pile's tile within `quad`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocalWay {
    pub way: Way,
    pub quad: TileQuad,
    pub locator: u8,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocalRelation {
    pub relation: Relation,
    pub quad: TileQuad,
    pub locator: u8,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct NodeProxy {
    pub id: i64,
    pub lon: i32,
    pub lat: i32,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BoundsProxy {
    pub id: i64,
    pub bbox: Bbox,
    pub quad: TileQuad,
}

/// A way written into the pile of some of its nodes which lies outside
/// the way's footprint. `refs` are the way's nodes held by that pile.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GhostWay {
    pub id: i64,
    pub quad: TileQuad,
    pub refs: Vec<i64>,
}

/// Tells the pile holding `members` that they belong to relation `parent`,
/// whose footprint is `quad` (`TileQuad::NONE` for Purgatory).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Membership {
    pub parent: i64,
    pub quad: TileQuad,
    pub members: Vec<ElementId>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LocalBounds {
    pub element: ElementId,
    pub bbox: Bbox,
    pub quad: TileQuad,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Record {
    Node(Node),
    Way(LocalWay),
    Relation(LocalRelation),
    ForeignNode(NodeProxy),
    ForeignWay(BoundsProxy),
    ForeignRelation(BoundsProxy),
    Ghost(GhostWay),
    Membership(Membership),
    Bounds(LocalBounds),
}

impl Record {
    pub fn kind(&self) -> GroupKind {
        match self {
            Record::Node(_) => GroupKind::LocalNodes,
            Record::Way(_) => GroupKind::LocalWays,
            Record::Relation(_) => GroupKind::LocalRelations,
            Record::ForeignNode(_) => GroupKind::ForeignNodes,
            Record::ForeignWay(_) => GroupKind::ForeignWays,
            Record::ForeignRelation(_) => GroupKind::ForeignRelations,
            Record::Ghost(_) => GroupKind::GhostWays,
            Record::Membership(_) => GroupKind::Memberships,
            Record::Bounds(_) => GroupKind::LocalBounds,
        }
    }
}

/// Values carried from one record to the next within a group.
#[derive(Default)]
struct Delta {
    id: i64,
    lon: i64,
    lat: i64,
}

impl Delta {
    fn write_id(&mut self, res: &mut Vec<u8>, id: i64) {
        write_int(res, id - self.id);
        self.id = id;
    }
    fn write_point(&mut self, res: &mut Vec<u8>, lon: i32, lat: i32) {
        write_int(res, lon as i64 - self.lon);
        write_int(res, lat as i64 - self.lat);
        self.lon = lon as i64;
        self.lat = lat as i64;
    }
    fn read_id(&mut self, c: &mut Cursor) -> Result<i64> {
        self.id += c.read_int()?;
        Ok(self.id)
    }
    fn read_point(&mut self, c: &mut Cursor) -> Result<(i32, i32)> {
        self.lon += c.read_int()?;
        self.lat += c.read_int()?;
        Ok((as_coord(self.lon)?, as_coord(self.lat)?))
    }
}

fn as_coord(v: i64) -> Result<i32> {
    if v < i32::MIN as i64 || v > i32::MAX as i64 {
        return Err(Error::InvalidData(format!("coordinate {} out of range", v)));
    }
    Ok(v as i32)
}

fn write_tags(res: &mut Vec<u8>, tags: &[Tag]) {
    write_varint(res, tags.len() as u64);
    for t in tags {
        write_string(res, &t.key);
        write_string(res, &t.val);
    }
}

fn read_tags(c: &mut Cursor) -> Result<Vec<Tag>> {
    let n = c.read_uint()? as usize;
    let mut tags = Vec::with_capacity(usize::min(n, 64));
    for _ in 0..n {
        let k = c.read_string()?;
        let v = c.read_string()?;
        tags.push(Tag::new(k, v));
    }
    Ok(tags)
}

fn write_ids(res: &mut Vec<u8>, ids: &[i64]) {
    write_varint(res, ids.len() as u64);
    res.extend(pack_delta_int_ref(ids.iter()));
}

fn read_ids(c: &mut Cursor) -> Result<Vec<i64>> {
    let n = c.read_uint()? as usize;
    let mut ids = Vec::with_capacity(usize::min(n, 4096));
    let mut prev = 0;
    for _ in 0..n {
        prev += c.read_int()?;
        ids.push(prev);
    }
    Ok(ids)
}

fn write_quad(res: &mut Vec<u8>, quad: &TileQuad) {
    write_int(res, quad.as_int());
}

fn read_quad(c: &mut Cursor) -> Result<TileQuad> {
    Ok(TileQuad::new(c.read_int()?))
}

fn write_bbox(res: &mut Vec<u8>, delta: &mut Delta, bbox: &Bbox) {
    delta.write_point(res, bbox.minlon, bbox.minlat);
    write_int(res, bbox.maxlon as i64 - bbox.minlon as i64);
    write_int(res, bbox.maxlat as i64 - bbox.minlat as i64);
}

fn read_bbox(c: &mut Cursor, delta: &mut Delta) -> Result<Bbox> {
    let (minlon, minlat) = delta.read_point(c)?;
    let maxlon = as_coord(minlon as i64 + c.read_int()?)?;
    let maxlat = as_coord(minlat as i64 + c.read_int()?)?;
    Ok(Bbox::new(minlon, minlat, maxlon, maxlat))
}

fn write_members(res: &mut Vec<u8>, members: &[Member]) {
    write_varint(res, members.len() as u64);
    let mut prev = 0;
    for m in members {
        write_varint(res, m.mem_type.as_int());
        write_int(res, m.mem_ref - prev);
        prev = m.mem_ref;
        write_string(res, &m.role);
    }
}

fn read_members(c: &mut Cursor) -> Result<Vec<Member>> {
    let n = c.read_uint()? as usize;
    let mut members = Vec::with_capacity(usize::min(n, 4096));
    let mut prev = 0;
    for _ in 0..n {
        let t = ElementType::from_int(c.read_uint()?)?;
        prev += c.read_int()?;
        let role = c.read_string()?;
        members.push(Member::new(role, t, prev));
    }
    Ok(members)
}

fn write_element_ids(res: &mut Vec<u8>, ids: &[ElementId]) {
    write_varint(res, ids.len() as u64);
    let mut prev = 0;
    for e in ids {
        write_varint(res, e.elem_type.as_int());
        write_int(res, e.id - prev);
        prev = e.id;
    }
}

fn read_element_ids(c: &mut Cursor) -> Result<Vec<ElementId>> {
    let n = c.read_uint()? as usize;
    let mut ids = Vec::with_capacity(usize::min(n, 4096));
    let mut prev = 0;
    for _ in 0..n {
        let t = ElementType::from_int(c.read_uint()?)?;
        prev += c.read_int()?;
        ids.push(ElementId::new(t, prev));
    }
    Ok(ids)
}

fn pack_record(res: &mut Vec<u8>, delta: &mut Delta, rec: &Record) {
    match rec {
        Record::Node(n) => {
            delta.write_id(res, n.id);
            delta.write_point(res, n.lon, n.lat);
            write_tags(res, &n.tags);
        }
        Record::Way(w) => {
            delta.write_id(res, w.way.id);
            write_quad(res, &w.quad);
            write_varint(res, w.locator as u64);
            write_tags(res, &w.way.tags);
            write_ids(res, &w.way.refs);
        }
        Record::Relation(r) => {
            delta.write_id(res, r.relation.id);
            write_quad(res, &r.quad);
            write_varint(res, r.locator as u64);
            write_tags(res, &r.relation.tags);
            write_members(res, &r.relation.members);
        }
        Record::ForeignNode(n) => {
            delta.write_id(res, n.id);
            delta.write_point(res, n.lon, n.lat);
        }
        Record::ForeignWay(p) | Record::ForeignRelation(p) => {
            delta.write_id(res, p.id);
            write_bbox(res, delta, &p.bbox);
            write_quad(res, &p.quad);
        }
        Record::Ghost(g) => {
            delta.write_id(res, g.id);
            write_quad(res, &g.quad);
            write_ids(res, &g.refs);
        }
        Record::Membership(m) => {
            delta.write_id(res, m.parent);
            write_quad(res, &m.quad);
            write_element_ids(res, &m.members);
        }
        Record::Bounds(b) => {
            write_varint(res, b.element.elem_type.as_int());
            delta.write_id(res, b.element.id);
            write_bbox(res, delta, &b.bbox);
            write_quad(res, &b.quad);
        }
    }
}

fn read_record(kind: GroupKind, c: &mut Cursor, delta: &mut Delta) -> Result<Record> {
    Ok(match kind {
        GroupKind::LocalNodes => {
            let id = delta.read_id(c)?;
            let (lon, lat) = delta.read_point(c)?;
            let tags = read_tags(c)?;
            Record::Node(Node::new(id, lon, lat, tags))
        }
        GroupKind::LocalWays => {
            let id = delta.read_id(c)?;
            let quad = read_quad(c)?;
            let locator = c.read_uint()? as u8;
            let tags = read_tags(c)?;
            let refs = read_ids(c)?;
            Record::Way(LocalWay {
                way: Way::new(id, tags, refs),
                quad,
                locator,
            })
        }
        GroupKind::LocalRelations => {
            let id = delta.read_id(c)?;
            let quad = read_quad(c)?;
            let locator = c.read_uint()? as u8;
            let tags = read_tags(c)?;
            let members = read_members(c)?;
            Record::Relation(LocalRelation {
                relation: Relation::new(id, tags, members),
                quad,
                locator,
            })
        }
        GroupKind::ForeignNodes => {
            let id = delta.read_id(c)?;
            let (lon, lat) = delta.read_point(c)?;
            Record::ForeignNode(NodeProxy { id, lon, lat })
        }
        GroupKind::ForeignWays | GroupKind::ForeignRelations => {
            let id = delta.read_id(c)?;
            let bbox = read_bbox(c, delta)?;
            let quad = read_quad(c)?;
            let p = BoundsProxy { id, bbox, quad };
            if kind == GroupKind::ForeignWays {
                Record::ForeignWay(p)
            } else {
                Record::ForeignRelation(p)
            }
        }
        GroupKind::GhostWays => {
            let id = delta.read_id(c)?;
            let quad = read_quad(c)?;
            let refs = read_ids(c)?;
            Record::Ghost(GhostWay { id, quad, refs })
        }
        GroupKind::Memberships => {
            let parent = delta.read_id(c)?;
            let quad = read_quad(c)?;
            let members = read_element_ids(c)?;
            Record::Membership(Membership {
                parent,
                quad,
                members,
            })
        }
        GroupKind::LocalBounds => {
            let t = ElementType::from_int(c.read_uint()?)?;
            let id = delta.read_id(c)?;
            let bbox = read_bbox(c, delta)?;
            let quad = read_quad(c)?;
            Record::Bounds(LocalBounds {
                element: ElementId::new(t, id),
                bbox,
                quad,
            })
        }
    })
}

/// Packs `records` as one group: the marker byte, each record prefixed by
/// its length, then a zero byte. Every record must be of `kind`.
pub fn pack_group(kind: GroupKind, records: &[Record]) -> Result<Vec<u8>> {
    let mut res = Vec::new();
    res.push(kind.marker());
    let mut delta = Delta::default();
    let mut body = Vec::new();
    for r in records {
        if r.kind() != kind {
            return Err(Error::InvalidInput(format!(
                "{:?} record in {:?} group",
                r.kind(),
                kind
            )));
        }
        body.clear();
        pack_record(&mut body, &mut delta, r);
        res.reserve(varint_length(body.len() as u64) + body.len());
        write_varint(&mut res, body.len() as u64);
        res.extend(&body);
    }
    res.push(0);
    Ok(res)
}

/// Calls `f` with every record in `data`, a sequence of packed groups.
pub fn read_groups<F>(data: &[u8], mut f: F) -> Result<()>
where
    F: FnMut(Record) -> Result<()>,
{
    let mut c = Cursor::new(data);
    while !c.at_end() {
        let kind = GroupKind::from_marker(c.read_byte()?)?;
        let mut delta = Delta::default();
        loop {
            let len = c.read_uint()? as usize;
            if len == 0 {
                break;
            }
            let start = c.position();
            let rec = read_record(kind, &mut c, &mut delta)?;
            if c.position() - start != len {
                return Err(Error::InvalidData(format!(
                    "{:?} record at {} has length {}, expected {}",
                    kind,
                    start,
                    c.position() - start,
                    len
                )));
            }
            f(rec)?;
        }
    }
    Ok(())
}

/// Everything appended to one pile, split by group kind. Records keep
/// their append order.
#[derive(Debug, Default, Clone)]
pub struct PileContents {
    pub nodes: Vec<Node>,
    pub ways: Vec<LocalWay>,
    pub relations: Vec<LocalRelation>,
    pub foreign_nodes: Vec<NodeProxy>,
    pub foreign_ways: Vec<BoundsProxy>,
    pub foreign_relations: Vec<BoundsProxy>,
    pub ghosts: Vec<GhostWay>,
    pub memberships: Vec<Membership>,
    pub bounds: Vec<LocalBounds>,
}

impl PileContents {
    pub fn read(data: &[u8]) -> Result<PileContents> {
        let mut pc = PileContents::default();
        read_groups(data, |r| {
            match r {
                Record::Node(n) => pc.nodes.push(n),
                Record::Way(w) => pc.ways.push(w),
                Record::Relation(r) => pc.relations.push(r),
                Record::ForeignNode(n) => pc.foreign_nodes.push(n),
                Record::ForeignWay(p) => pc.foreign_ways.push(p),
                Record::ForeignRelation(p) => pc.foreign_relations.push(p),
                Record::Ghost(g) => pc.ghosts.push(g),
                Record::Membership(m) => pc.memberships.push(m),
                Record::Bounds(b) => pc.bounds.push(b),
            }
            Ok(())
        })?;
        Ok(pc)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.ways.is_empty()
            && self.relations.is_empty()
            && self.foreign_nodes.is_empty()
            && self.foreign_ways.is_empty()
            && self.foreign_relations.is_empty()
            && self.ghosts.is_empty()
            && self.memberships.is_empty()
            && self.bounds.is_empty()
    }

    pub fn bounds_of(&self, element: &ElementId) -> Option<&LocalBounds> {
        self.bounds.iter().find(|b| b.element == *element)
    }
}

/// Collects records for many piles and packs them into one group per
/// pile and kind.
#[derive(Debug, Default)]
pub struct PileRecords {
    records: std::collections::BTreeMap<(u32, GroupKind), Vec<Record>>,
    count: usize,
}

impl PileRecords {
    pub fn new() -> PileRecords {
        PileRecords::default()
    }

    pub fn add(&mut self, pile: u32, rec: Record) {
        self.records
            .entry((pile, rec.kind()))
            .or_insert_with(Vec::new)
            .push(rec);
        self.count += 1;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Packed groups, one entry per pile, in pile order.
    pub fn pack(self) -> Result<Vec<(u32, Vec<u8>)>> {
        let mut res: Vec<(u32, Vec<u8>)> = Vec::new();
        for ((pile, kind), recs) in self.records {
            let g = pack_group(kind, &recs)?;
            match res.last_mut() {
                Some((p, d)) if *p == pile => d.extend(g),
                _ => res.push((pile, g)),
            }
        }
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{tags_from, Tile};

    fn sample_records() -> Vec<Record> {
        let q = TileQuad::from_tile(Tile::new(3, 2, 2)).add_tile(&Tile::new(3, 3, 2));
        vec![
            Record::Node(Node::new(1001, -1275000, 515072000, tags_from(&[("amenity", "pub")]))),
            Record::Node(Node::new(998, -1276000, 515071000, Vec::new())),
            Record::Way(LocalWay {
                way: Way::new(50, tags_from(&[("highway", "primary"), ("name", "Strand")]), vec![1001, 998, 1003]),
                quad: q,
                locator: 1,
            }),
            Record::Relation(LocalRelation {
                relation: Relation::new(
                    7,
                    tags_from(&[("type", "multipolygon")]),
                    vec![
                        Member::new(String::from("outer"), ElementType::Way, 50),
                        Member::new(String::from(""), ElementType::Relation, 3),
                    ],
                ),
                quad: TileQuad::NONE,
                locator: 0,
            }),
            Record::ForeignNode(NodeProxy { id: 1003, lon: 5, lat: -7 }),
            Record::ForeignWay(BoundsProxy { id: 51, bbox: Bbox::new(-10, -20, 30, 40), quad: q }),
            Record::ForeignRelation(BoundsProxy { id: 8, bbox: Bbox::empty(), quad: TileQuad::NONE }),
            Record::Ghost(GhostWay { id: 50, quad: q, refs: vec![1003] }),
            Record::Membership(Membership {
                parent: 7,
                quad: q,
                members: vec![ElementId::way(50), ElementId::node(1001)],
            }),
            Record::Bounds(LocalBounds { element: ElementId::relation(7), bbox: Bbox::planet(), quad: q }),
        ]
    }

    #[test]
    fn test_groups_read_back() {
        let mut recs = PileRecords::new();
        for r in sample_records() {
            recs.add(4, r);
        }
        recs.add(2, Record::Node(Node::new(5, 0, 0, Vec::new())));
        assert_eq!(recs.len(), 11);

        let packed = recs.pack().unwrap();
        assert_eq!(packed.len(), 2);
        assert_eq!(packed[0].0, 2);
        assert_eq!(packed[1].0, 4);

        let mut got = Vec::new();
        read_groups(&packed[1].1, |r| {
            got.push(r);
            Ok(())
        })
        .unwrap();
        assert_eq!(got, sample_records());

        let pc = PileContents::read(&packed[1].1).unwrap();
        assert_eq!(pc.nodes.len(), 2);
        assert_eq!(pc.ways[0].way.refs, vec![1001, 998, 1003]);
        assert_eq!(pc.relations[0].quad, TileQuad::NONE);
        assert!(pc.foreign_relations[0].bbox.is_empty());
        assert_eq!(pc.bounds_of(&ElementId::relation(7)).unwrap().bbox, Bbox::planet());
        assert!(pc.bounds_of(&ElementId::way(7)).is_none());
    }

    #[test]
    fn test_appended_groups_concatenate() {
        let a = pack_group(GroupKind::LocalNodes, &[Record::Node(Node::new(1, 10, 10, Vec::new()))]).unwrap();
        let b = pack_group(GroupKind::LocalNodes, &[Record::Node(Node::new(2, 20, 20, Vec::new()))]).unwrap();
        let mut data = a.clone();
        data.extend(b);
        let pc = PileContents::read(&data).unwrap();
        assert_eq!(pc.nodes.iter().map(|n| n.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(pc.nodes[1].lon, 20);

        let empty = pack_group(GroupKind::GhostWays, &[]).unwrap();
        assert_eq!(empty, vec![7, 0]);
        assert!(PileContents::read(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_bad_data() {
        assert!(pack_group(GroupKind::LocalWays, &[Record::Node(Node::new(1, 0, 0, Vec::new()))]).is_err());
        assert!(PileContents::read(&[12, 0]).is_err());
        let mut g = pack_group(GroupKind::LocalNodes, &[Record::Node(Node::new(1, 10, 10, Vec::new()))]).unwrap();
        g.pop();
        g.pop();
        assert!(PileContents::read(&g).is_err());
    }
}
