use std::collections::BTreeMap;
use std::fmt;

pub const ID_SPLIT_SHIFT: i64 = 16;
pub const ID_SPLIT_VAL: usize = (1 << ID_SPLIT_SHIFT) as usize;
pub const ID_SPLIT_MASK: i64 = (1 << ID_SPLIT_SHIFT) - 1;

/// A dense block of values for ids `off .. off + ID_SPLIT_VAL`.
#[derive(Clone)]
pub struct IdTableTile<V> {
    pub off: i64,
    pub count: usize,
    vals: Vec<Option<V>>,
}

impl<V: Copy> IdTableTile<V> {
    pub fn new(off: i64) -> IdTableTile<V> {
        IdTableTile {
            off: off,
            vals: vec![None; ID_SPLIT_VAL],
            count: 0,
        }
    }

    pub fn get(&self, i: usize) -> Option<V> {
        self.vals[i]
    }

    pub fn set(&mut self, i: usize, v: V) -> bool {
        let newv = self.vals[i].is_none();
        self.vals[i] = Some(v);
        if newv {
            self.count += 1;
        }
        newv
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, V)> + '_ {
        let o = self.off;
        self.vals
            .iter()
            .enumerate()
            .filter_map(move |(i, v)| v.map(|v| (o + (i as i64), v)))
    }
}

/// Maps feature ids to small copyable values (a pile, a footprint). Ids
/// are split into blocks of `ID_SPLIT_VAL` consecutive values, each block
/// stored densely, so runs of nearby ids are cheap.
#[derive(Clone)]
pub struct IdTable<V> {
    tiles: BTreeMap<i64, Box<IdTableTile<V>>>,
    count: usize,
}

fn split(id: i64) -> (i64, usize) {
    (id >> ID_SPLIT_SHIFT, (id & ID_SPLIT_MASK) as usize)
}

impl<V: Copy> IdTable<V> {
    pub fn new() -> IdTable<V> {
        IdTable {
            tiles: BTreeMap::new(),
            count: 0,
        }
    }

    pub fn has_value(&self, id: i64) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: i64) -> Option<V> {
        let (idt, idi) = split(id);
        match self.tiles.get(&idt) {
            Some(t) => t.get(idi),
            None => None,
        }
    }

    /// Returns true if `id` had no value before.
    pub fn set(&mut self, id: i64, v: V) -> bool {
        let (idt, idi) = split(id);
        let t = self
            .tiles
            .entry(idt)
            .or_insert_with(|| Box::new(IdTableTile::new(idt << ID_SPLIT_SHIFT)));
        let newv = t.set(idi, v);
        if newv {
            self.count += 1;
        }
        newv
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Moves every value of `other` into this table. Values in `other`
    /// replace existing ones.
    pub fn merge(&mut self, other: IdTable<V>) {
        for (k, t) in other.tiles {
            if !self.tiles.contains_key(&k) {
                self.count += t.count;
                self.tiles.insert(k, t);
            } else {
                for (id, v) in t.iter() {
                    self.set(id, v);
                }
            }
        }
    }
}

impl<V: Copy> Default for IdTable<V> {
    fn default() -> Self {
        IdTable::new()
    }
}

impl<V> fmt::Display for IdTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ids in {} blocks", self.count, self.tiles.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let mut t = IdTable::<u32>::new();
        assert!(t.set(5, 3));
        assert!(!t.set(5, 4));
        assert!(t.set(ID_SPLIT_VAL as i64 * 3 + 7, 9));
        assert!(t.set(-2, 11));
        assert_eq!(t.get(5), Some(4));
        assert_eq!(t.get(6), None);
        assert_eq!(t.get(-2), Some(11));
        assert_eq!(t.get(ID_SPLIT_VAL as i64 * 3 + 7), Some(9));
        assert_eq!(t.get(ID_SPLIT_VAL as i64 * 3 + 6), None);
        assert_eq!(t.len(), 3);
        assert_eq!(t.to_string(), "3 ids in 3 blocks");
    }

    #[test]
    fn test_merge() {
        let mut a = IdTable::<u32>::new();
        a.set(1, 1);
        a.set(2, 1);
        let mut b = IdTable::<u32>::new();
        b.set(2, 2);
        b.set(3, 2);
        b.set(ID_SPLIT_VAL as i64 + 1, 2);
        a.merge(b);
        assert_eq!(a.len(), 4);
        assert_eq!(a.get(2), Some(2));
        assert_eq!(a.get(ID_SPLIT_VAL as i64 + 1), Some(2));
        assert_eq!(a.to_string(), "4 ids in 2 blocks");
    }
}
