use std::cmp::Reverse;
use std::fmt;

use crate::catalog::{TileCatalog, PURGATORY};
use crate::elements::Tile;

/// Piles which may be processed at the same time.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Batch {
    /// `None` for the Purgatory batch.
    pub zoom: Option<u32>,
    pub quadrant: u32,
    pub piles: Vec<u32>,
}

const QUADRANT_NAMES: [&str; 4] = ["even,even", "odd,even", "even,odd", "odd,odd"];

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.zoom {
            Some(z) => write!(
                f,
                "zoom {} ({}): {} piles",
                z,
                QUADRANT_NAMES[(self.quadrant & 3) as usize],
                self.piles.len()
            ),
            None => write!(f, "purgatory"),
        }
    }
}

pub fn batch_key(tile: &Tile) -> (Reverse<u32>, u32) {
    (Reverse(tile.zoom), tile.quadrant_key())
}

/// Splits the catalog's piles into batches: finest zoom first, then by
/// quadrant key, four batches per zoom level at most. Purgatory comes
/// last on its own.
///
/// A footprint's tiles all have different quadrant keys, and every tile of
/// a feature's footprint at a finer zoom than its own comes earlier, so by
/// the time the batch holding a footprint's completing tile runs, every
/// other pile which can contribute to that footprint is done.
pub fn pile_batches(catalog: &TileCatalog) -> Vec<Batch> {
    let mut piles: Vec<(Tile, u32)> = catalog
        .piles()
        .filter_map(|p| catalog.tile_of(p).map(|t| (t, p)))
        .collect();
    piles.sort_by_key(|(t, p)| (batch_key(t), *p));

    let mut res: Vec<Batch> = Vec::new();
    for (t, p) in piles {
        match res.last_mut() {
            Some(b) if b.zoom == Some(t.zoom) && b.quadrant == t.quadrant_key() => {
                b.piles.push(p);
            }
            _ => res.push(Batch {
                zoom: Some(t.zoom),
                quadrant: t.quadrant_key(),
                piles: vec![p],
            }),
        }
    }
    res.push(Batch {
        zoom: None,
        quadrant: 0,
        piles: vec![PURGATORY],
    });
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::TileQuad;

    #[test]
    fn test_batch_order() {
        let mut tiles = vec![Tile::root()];
        for r in 0..2 {
            for c in 0..2 {
                tiles.push(Tile::new(1, c, r));
            }
        }
        for r in 0..4 {
            for c in 0..4 {
                tiles.push(Tile::new(2, c, r));
            }
        }
        let cat = TileCatalog::from_tiles(&tiles).unwrap();
        let batches = pile_batches(&cat);

        // four for each of zoom 2 and 1, one for the root, then purgatory
        assert_eq!(batches.len(), 10);
        assert_eq!(batches[0].zoom, Some(2));
        assert_eq!(batches[0].quadrant, 0);
        assert_eq!(batches[0].piles.len(), 4);
        assert_eq!(batches[3].quadrant, 3);
        assert_eq!(batches[4].zoom, Some(1));
        assert_eq!(batches[8].zoom, Some(0));
        assert_eq!(batches[9].piles, vec![PURGATORY]);
        assert_eq!(batches[9].to_string(), "purgatory");
        assert_eq!(batches[1].to_string(), "zoom 2 (odd,even): 4 piles");

        let total: usize = batches.iter().map(|b| b.piles.len()).sum();
        assert_eq!(total, cat.pile_count());

        // a 2x2 footprint completes in the last of its batches
        let q = TileQuad::from_tile(Tile::new(2, 0, 0)).add_tile(&Tile::new(2, 1, 1));
        let q = q.add_tile(&Tile::new(2, 1, 0)).add_tile(&Tile::new(2, 0, 1));
        let done = cat.pile_of(&q.completing_tile().unwrap()).unwrap();
        let pos = |p: u32| batches.iter().position(|b| b.piles.contains(&p)).unwrap();
        assert_eq!(pos(done), 3);
        for t in q.tiles() {
            assert!(pos(cat.pile_of(&t).unwrap()) <= pos(done));
        }
    }
}
