use std::collections::HashMap;
use std::sync::Arc;

use crate::callback::{run_workers, CallFinish};
use crate::catalog::TileCatalog;
use crate::elements::{ElementId, Tile};
use crate::message;
use crate::pilestore::{PileContents, PileStore};
use crate::utils::{Error, Result, ThreadTimer, Timings};

/// Low bit of a placeholder word: the reference has not been linked.
pub const UNRESOLVED: u32 = 1;
const FLAG_MASK: u32 = 3;
const MAX_LOGGED_MISSING: usize = 10;

/// A reference from one compacted tile to a feature in another. The
/// four bytes at `placeholder` are a little-endian word whose two low
/// bits are flags.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Import {
    pub placeholder: u32,
    pub target: ElementId,
    pub pile: u32,
}

/// One pile's features packed into its final form.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CompactedTile {
    pub pile: u32,
    pub data: Vec<u8>,
    /// Features stored in `data`, with their offsets.
    pub exports: Vec<(ElementId, u32)>,
    pub imports: Vec<Import>,
}

/// Turns a resolved pile into a [`CompactedTile`]. Features in other
/// tiles are referenced through [`Import`]s, filled in by
/// [`link_tiles`].
pub trait TileCompactor: Send + Sync + 'static {
    fn compact(&self, pile: u32, tile: Option<Tile>, contents: &PileContents)
        -> Result<CompactedTile>;
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LinkedTile {
    pub pile: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    pub tiles: usize,
    pub linked: usize,
    pub unresolved: usize,
    pub timings: Timings,
}

/// Offsets of every exported feature, by pile.
pub struct ExportTable(HashMap<(u32, ElementId), u32>);

impl ExportTable {
    pub fn new(tiles: &[CompactedTile]) -> ExportTable {
        let mut m = HashMap::new();
        for t in tiles {
            for (e, off) in &t.exports {
                m.insert((t.pile, *e), *off);
            }
        }
        ExportTable(m)
    }

    pub fn get(&self, pile: u32, e: &ElementId) -> Option<u32> {
        self.0.get(&(pile, *e)).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

fn read_word(data: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

fn write_word(data: &mut [u8], pos: usize, v: u32) {
    data[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
}

/// Patches every import of `tile` whose target `exports` knows about.
/// Imports with no matching export keep their flags, including
/// [`UNRESOLVED`], and are counted in the second value returned.
pub fn link_tile(tile: CompactedTile, exports: &ExportTable) -> Result<(LinkedTile, usize, usize)> {
    let mut data = tile.data;
    let mut linked = 0;
    let mut unresolved = 0;
    for imp in &tile.imports {
        let pos = imp.placeholder as usize;
        if pos + 4 > data.len() {
            return Err(Error::InvalidData(format!(
                "pile {}: placeholder {} outside tile of {} bytes",
                tile.pile,
                pos,
                data.len()
            )));
        }
        match exports.get(imp.pile, &imp.target) {
            Some(off) => {
                if off > (u32::MAX >> 2) {
                    return Err(Error::InvalidData(format!(
                        "pile {}: offset {} too large",
                        imp.pile, off
                    )));
                }
                let flags = read_word(&data, pos) & FLAG_MASK;
                write_word(&mut data, pos, (off << 2) | (flags & !UNRESOLVED));
                linked += 1;
            }
            None => {
                if unresolved < MAX_LOGGED_MISSING {
                    message!(
                        "pile {}: {} not exported by pile {}",
                        tile.pile,
                        imp.target,
                        imp.pile
                    );
                }
                let w = read_word(&data, pos);
                write_word(&mut data, pos, w | UNRESOLVED);
                unresolved += 1;
            }
        }
    }
    Ok((
        LinkedTile {
            pile: tile.pile,
            data,
        },
        linked,
        unresolved,
    ))
}

struct LinkWorker {
    exports: Arc<ExportTable>,
    tiles: Vec<LinkedTile>,
    linked: usize,
    unresolved: usize,
    error: Option<Error>,
    tm: f64,
}

impl CallFinish for LinkWorker {
    type CallType = CompactedTile;
    type ReturnType = (Vec<LinkedTile>, LinkStats);

    fn call(&mut self, tile: CompactedTile) {
        if self.error.is_some() {
            return;
        }
        let tx = ThreadTimer::new();
        match link_tile(tile, &self.exports) {
            Ok((t, l, u)) => {
                self.tiles.push(t);
                self.linked += l;
                self.unresolved += u;
            }
            Err(e) => {
                self.error = Some(e);
            }
        }
        self.tm += tx.since();
    }

    fn finish(&mut self) -> Result<(Vec<LinkedTile>, LinkStats)> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let mut stats = LinkStats::default();
        stats.tiles = self.tiles.len();
        stats.linked = self.linked;
        stats.unresolved = self.unresolved;
        stats.timings.add("link", self.tm);
        Ok((std::mem::take(&mut self.tiles), stats))
    }
}

/// Links every tile against the exports of all of them. The result is in
/// pile order.
pub fn link_tiles(tiles: Vec<CompactedTile>, numchan: usize) -> Result<(Vec<LinkedTile>, LinkStats)> {
    let exports = Arc::new(ExportTable::new(&tiles));
    let numchan = usize::min(numchan, tiles.len());
    let results = run_workers(tiles, numchan, |_| {
        Box::new(LinkWorker {
            exports: exports.clone(),
            tiles: Vec::new(),
            linked: 0,
            unresolved: 0,
            error: None,
            tm: 0.0,
        })
    })?;

    let mut linked = Vec::new();
    let mut stats = LinkStats::default();
    for (tt, st) in results {
        linked.extend(tt);
        stats.tiles += st.tiles;
        stats.linked += st.linked;
        stats.unresolved += st.unresolved;
        stats.timings.combine(st.timings);
    }
    linked.sort_by_key(|t| t.pile);
    if stats.unresolved > 0 {
        message!("{} references left unresolved", stats.unresolved);
    }
    Ok((linked, stats))
}

struct CompactWorker {
    catalog: Arc<TileCatalog>,
    store: Arc<PileStore>,
    compactor: Arc<dyn TileCompactor>,
    tiles: Vec<CompactedTile>,
    error: Option<Error>,
    tm: f64,
}

impl CallFinish for CompactWorker {
    type CallType = u32;
    type ReturnType = (Vec<CompactedTile>, Timings);

    fn call(&mut self, pile: u32) {
        if self.error.is_some() {
            return;
        }
        let tx = ThreadTimer::new();
        let res = self
            .store
            .load(pile)
            .and_then(|d| PileContents::read(&d))
            .and_then(|pc| self.compactor.compact(pile, self.catalog.tile_of(pile), &pc));
        match res {
            Ok(t) => self.tiles.push(t),
            Err(e) => self.error = Some(e),
        }
        self.tm += tx.since();
    }

    fn finish(&mut self) -> Result<(Vec<CompactedTile>, Timings)> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let mut tms = Timings::new();
        tms.add("compact", self.tm);
        Ok((std::mem::take(&mut self.tiles), tms))
    }
}

/// Hands every non-empty pile to `compactor`. The result is in pile order.
pub fn compact_piles(
    catalog: Arc<TileCatalog>,
    store: Arc<PileStore>,
    compactor: Arc<dyn TileCompactor>,
    numchan: usize,
) -> Result<(Vec<CompactedTile>, Timings)> {
    let piles: Vec<u32> = catalog.piles().collect();
    let numchan = usize::min(numchan, piles.len());
    let results = run_workers(piles, numchan, |_| {
        Box::new(CompactWorker {
            catalog: catalog.clone(),
            store: store.clone(),
            compactor: compactor.clone(),
            tiles: Vec::new(),
            error: None,
            tm: 0.0,
        })
    })?;
    let mut tiles = Vec::new();
    let mut tms = Timings::new();
    for (tt, t) in results {
        tiles.extend(tt.into_iter().filter(|t| !t.data.is_empty()));
        tms.combine(t);
    }
    tiles.sort_by_key(|t| t.pile);
    Ok((tiles, tms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(pile: u32, words: &[u32], exports: Vec<(ElementId, u32)>, imports: Vec<Import>) -> CompactedTile {
        let mut data = Vec::new();
        for w in words {
            data.extend_from_slice(&w.to_le_bytes());
        }
        CompactedTile {
            pile,
            data,
            exports,
            imports,
        }
    }

    #[test]
    fn test_link_patches_offsets() {
        let a = tile(
            3,
            &[0, UNRESOLVED | 2, UNRESOLVED],
            vec![(ElementId::way(5), 0)],
            vec![
                Import { placeholder: 4, target: ElementId::node(7), pile: 4 },
                Import { placeholder: 8, target: ElementId::relation(9), pile: 4 },
            ],
        );
        let b = tile(
            4,
            &[0, 0, 0, UNRESOLVED],
            vec![(ElementId::node(7), 12)],
            vec![Import { placeholder: 12, target: ElementId::way(5), pile: 3 }],
        );
        let (linked, stats) = link_tiles(vec![b, a], 2).unwrap();
        assert_eq!(stats.tiles, 2);
        assert_eq!(stats.linked, 2);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(linked[0].pile, 3);

        let w = |t: &LinkedTile, i: usize| read_word(&t.data, i * 4);
        // offset 12, the other flag bit kept
        assert_eq!(w(&linked[0], 1), (12 << 2) | 2);
        // relation 9 was never exported
        assert_eq!(w(&linked[0], 2), UNRESOLVED);
        assert_eq!(w(&linked[1], 3), 0);
    }

    #[test]
    fn test_bad_placeholder() {
        let a = tile(
            3,
            &[0],
            Vec::new(),
            vec![Import { placeholder: 2, target: ElementId::node(7), pile: 3 }],
        );
        let ex = ExportTable::new(&[]);
        assert!(link_tile(a, &ex).is_err());
    }

    #[test]
    fn test_export_lookup_is_per_pile() {
        let a = tile(3, &[0], vec![(ElementId::node(1), 0)], Vec::new());
        let ex = ExportTable::new(&[a]);
        assert_eq!(ex.len(), 1);
        assert_eq!(ex.get(3, &ElementId::node(1)), Some(0));
        assert_eq!(ex.get(4, &ElementId::node(1)), None);
        assert_eq!(ex.get(3, &ElementId::way(1)), None);
    }
}
