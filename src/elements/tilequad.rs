use std::fmt;

use crate::elements::tile::Tile;

pub const NW: u8 = 1;
pub const NE: u8 = 2;
pub const SW: u8 = 4;
pub const SE: u8 = 8;

const ZOOM_MASK: i64 = 31;
const MASK_SHIFT: i64 = 5;
const ROW_SHIFT: i64 = 9;
const COLUMN_SHIFT: i64 = 29;
const COORD_MASK: i64 = (1 << 20) - 1;

/// The footprint of a feature: one tile, or up to four tiles of the 2x2
/// block whose north-west corner is the stored tile, all at one zoom
/// level. A single tile is stored with no occupancy bits.
///
/// The block need not be aligned to a parent tile, so zooming out always
/// gives another 2x2 block. `TileQuad::NONE` stands for "no footprint":
/// every operation accepts it and none of them fail.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TileQuad(i64);

impl TileQuad {
    pub const NONE: TileQuad = TileQuad(-1);

    pub fn new(i: i64) -> TileQuad {
        if i < 0 {
            return TileQuad::NONE;
        }
        TileQuad(i)
    }

    fn pack(zoom: u32, column: u32, row: u32, mask: u8) -> TileQuad {
        TileQuad(
            ((column as i64 & COORD_MASK) << COLUMN_SHIFT)
                | ((row as i64 & COORD_MASK) << ROW_SHIFT)
                | (((mask & 15) as i64) << MASK_SHIFT)
                | (zoom as i64 & ZOOM_MASK),
        )
    }

    /// Builds a normalized quad: the stored tile is moved to the first
    /// occupied column and row, and a single occupied tile drops its
    /// occupancy bits.
    fn from_parts(zoom: u32, mut column: u32, mut row: u32, mut mask: u8) -> TileQuad {
        if mask == 0 {
            return TileQuad::pack(zoom, column, row, 0);
        }
        if mask & (NW | SW) == 0 {
            column += 1;
            mask >>= 1;
        }
        if mask & (NW | NE) == 0 {
            row += 1;
            mask >>= 2;
        }
        if mask.count_ones() == 1 {
            mask = 0;
        }
        TileQuad::pack(zoom, column, row, mask)
    }

    pub fn from_tile(tile: Tile) -> TileQuad {
        TileQuad::pack(tile.zoom, tile.column, tile.row, 0)
    }

    /// Smallest quad containing all `tiles`, zooming out until they fit in
    /// a 2x2 block.
    pub fn from_tiles(tiles: &[Tile]) -> TileQuad {
        if tiles.is_empty() {
            return TileQuad::NONE;
        }
        let zoom = tiles.iter().map(|t| t.zoom).min().unwrap_or(0);
        let mut current: Vec<Tile> = tiles.iter().map(|t| t.ancestor(zoom)).collect();
        loop {
            match fit_block(&current) {
                Some(q) => {
                    return q;
                }
                None => {
                    current = current.iter().filter_map(|t| t.parent()).collect();
                    if current.is_empty() {
                        return TileQuad::from_tile(Tile::root());
                    }
                }
            }
        }
    }

    pub fn as_int(&self) -> i64 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 < 0
    }

    pub fn zoom(&self) -> u32 {
        (self.0 & ZOOM_MASK) as u32
    }

    /// The north-west tile of the block.
    pub fn origin(&self) -> Tile {
        Tile::new(
            self.zoom(),
            ((self.0 >> COLUMN_SHIFT) & COORD_MASK) as u32,
            ((self.0 >> ROW_SHIFT) & COORD_MASK) as u32,
        )
    }

    pub fn mask(&self) -> u8 {
        ((self.0 >> MASK_SHIFT) & 15) as u8
    }

    pub fn len(&self) -> usize {
        if self.is_none() {
            return 0;
        }
        match self.mask() {
            0 => 1,
            m => m.count_ones() as usize,
        }
    }

    pub fn is_single(&self) -> bool {
        !self.is_none() && self.mask() == 0
    }

    fn effective_mask(&self) -> u8 {
        match self.mask() {
            0 => NW,
            m => m,
        }
    }

    fn tile_at(&self, bit: u8) -> Tile {
        let o = self.origin();
        match bit {
            NE => Tile::new(o.zoom, o.column + 1, o.row),
            SW => Tile::new(o.zoom, o.column, o.row + 1),
            SE => Tile::new(o.zoom, o.column + 1, o.row + 1),
            _ => o,
        }
    }

    /// The occupied tiles, in NW, NE, SW, SE order.
    pub fn tiles(&self) -> impl Iterator<Item = Tile> {
        let q = *self;
        let m = if q.is_none() { 0 } else { q.effective_mask() };
        [NW, NE, SW, SE]
            .iter()
            .filter(move |b| (m & **b) != 0)
            .map(move |b| q.tile_at(*b))
            .collect::<Vec<Tile>>()
            .into_iter()
    }

    pub fn contains(&self, tile: &Tile) -> bool {
        self.locator_of(tile).is_some()
    }

    /// True if `tile` is one of the quad's tiles or lies inside one of them.
    pub fn covers_tile(&self, tile: &Tile) -> bool {
        if self.is_none() || tile.zoom < self.zoom() {
            return false;
        }
        self.contains(&tile.ancestor(self.zoom()))
    }

    /// Position of `tile` within the 2x2 block: 0 for NW, 1 for NE, 2 for
    /// SW and 3 for SE.
    pub fn locator_of(&self, tile: &Tile) -> Option<u8> {
        if self.is_none() || tile.zoom != self.zoom() {
            return None;
        }
        let m = self.effective_mask();
        for (i, b) in [NW, NE, SW, SE].iter().enumerate() {
            if (m & *b) != 0 && self.tile_at(*b) == *tile {
                return Some(i as u8);
            }
        }
        None
    }

    /// The tile reached last when tiles are processed zoom by zoom in
    /// quadrant order (even/even, odd/even, even/odd, odd/odd). Only once
    /// this tile is reached has every tile of the quad been visited.
    pub fn completing_tile(&self) -> Option<Tile> {
        self.tiles().max_by_key(|t| t.quadrant_key())
    }

    pub fn zoomed_to(&self, zoom: u32) -> TileQuad {
        if self.is_none() || zoom >= self.zoom() {
            return *self;
        }
        let tiles: Vec<Tile> = self.tiles().map(|t| t.ancestor(zoom)).collect();
        TileQuad::from_tiles(&tiles)
    }

    pub fn zoom_out(&self, levels: u32) -> TileQuad {
        if self.is_none() {
            return *self;
        }
        let z = self.zoom();
        self.zoomed_to(if levels > z { 0 } else { z - levels })
    }

    pub fn add_tile(&self, tile: &Tile) -> TileQuad {
        if self.is_none() {
            return TileQuad::from_tile(*tile);
        }
        let mut tiles: Vec<Tile> = self.tiles().collect();
        tiles.push(*tile);
        TileQuad::from_tiles(&tiles)
    }

    pub fn add_quad(&self, other: &TileQuad) -> TileQuad {
        if self.is_none() {
            return *other;
        }
        if other.is_none() {
            return *self;
        }
        let mut tiles: Vec<Tile> = self.tiles().collect();
        tiles.extend(other.tiles());
        TileQuad::from_tiles(&tiles)
    }

    /// Removes every tile of the quad lying within `tile`. Gives
    /// `TileQuad::NONE` when nothing is left.
    pub fn subtract_tile(&self, tile: &Tile) -> TileQuad {
        if self.is_none() {
            return *self;
        }
        let mut mask = self.effective_mask();
        for b in [NW, NE, SW, SE].iter() {
            if (mask & *b) != 0 && tile.is_ancestor_of(&self.tile_at(*b)) {
                mask &= !*b;
            }
        }
        if mask == 0 {
            return TileQuad::NONE;
        }
        let o = self.origin();
        TileQuad::from_parts(o.zoom, o.column, o.row, mask)
    }
}

fn fit_block(tiles: &[Tile]) -> Option<TileQuad> {
    let zoom = tiles[0].zoom;
    let minc = tiles.iter().map(|t| t.column).min()?;
    let minr = tiles.iter().map(|t| t.row).min()?;
    let maxc = tiles.iter().map(|t| t.column).max()?;
    let maxr = tiles.iter().map(|t| t.row).max()?;
    if maxc - minc > 1 || maxr - minr > 1 {
        return None;
    }
    let mut mask = 0;
    for t in tiles {
        mask |= match (t.column - minc, t.row - minr) {
            (0, 0) => NW,
            (1, 0) => NE,
            (0, 1) => SW,
            _ => SE,
        };
    }
    Some(TileQuad::from_parts(zoom, minc, minr, mask))
}

impl fmt::Display for TileQuad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "NONE");
        }
        write!(f, "{}", self.origin())?;
        if self.mask() != 0 {
            write!(f, "[{:04b}]", self.mask())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(tiles: &[(u32, u32, u32)]) -> TileQuad {
        let t: Vec<Tile> = tiles.iter().map(|(z, c, r)| Tile::new(*z, *c, *r)).collect();
        TileQuad::from_tiles(&t)
    }

    #[test]
    fn test_single_tile() {
        let t = Tile::new(4, 5, 6);
        let q = TileQuad::from_tile(t);
        assert_eq!(q.mask(), 0);
        assert_eq!(q.len(), 1);
        assert!(q.is_single());
        assert_eq!(q.tiles().collect::<Vec<_>>(), vec![t]);
        assert_eq!(q.completing_tile(), Some(t));
        assert_eq!(q.locator_of(&t), Some(0));
    }

    #[test]
    fn test_pair_and_block() {
        let q = quad(&[(4, 5, 6), (4, 6, 6)]);
        assert_eq!(q.origin(), Tile::new(4, 5, 6));
        assert_eq!(q.mask(), NW | NE);
        assert_eq!(q.len(), 2);
        assert_eq!(q.locator_of(&Tile::new(4, 6, 6)), Some(1));
        assert_eq!(q.locator_of(&Tile::new(4, 5, 7)), None);

        let q4 = quad(&[(4, 5, 6), (4, 6, 7)]);
        assert_eq!(q4.mask(), NW | SE);
        assert_eq!(q4.len(), 2);

        let full = q4.add_tile(&Tile::new(4, 6, 6)).add_tile(&Tile::new(4, 5, 7));
        assert_eq!(full.len(), 4);
        assert_eq!(full.origin(), Tile::new(4, 5, 6));
    }

    #[test]
    fn test_normalizes_origin() {
        // only the eastern column is occupied
        let q = quad(&[(3, 3, 2), (3, 3, 3)]);
        assert_eq!(q.origin(), Tile::new(3, 3, 2));
        assert_eq!(q.mask(), NW | SW);
        let r = q.subtract_tile(&Tile::new(3, 3, 2));
        assert_eq!(r, TileQuad::from_tile(Tile::new(3, 3, 3)));
        assert_eq!(r.subtract_tile(&Tile::new(3, 3, 3)), TileQuad::NONE);
    }

    #[test]
    fn test_union_zooms_out() {
        // columns 1 and 3 don't fit in one block at zoom 3
        let q = quad(&[(3, 1, 0), (3, 3, 0)]);
        assert_eq!(q.zoom(), 2);
        assert_eq!(q.tiles().collect::<Vec<_>>(), vec![Tile::new(2, 0, 0), Tile::new(2, 1, 0)]);

        // finer tile is zoomed out to the coarser one first
        let a = TileQuad::from_tile(Tile::new(2, 1, 1));
        let b = a.add_tile(&Tile::new(5, 17, 8));
        assert_eq!(b.zoom(), 2);
        assert_eq!(b.tiles().collect::<Vec<_>>(), vec![Tile::new(2, 1, 1), Tile::new(2, 2, 1)]);

        let c = TileQuad::from_tile(Tile::new(6, 0, 0)).add_quad(&TileQuad::from_tile(Tile::new(6, 63, 63)));
        assert_eq!(c, TileQuad::from_tile(Tile::root()));
    }

    #[test]
    fn test_none_is_neutral() {
        let q = quad(&[(4, 5, 6), (4, 6, 6)]);
        assert_eq!(TileQuad::NONE.add_quad(&q), q);
        assert_eq!(q.add_quad(&TileQuad::NONE), q);
        assert_eq!(TileQuad::NONE.zoom_out(2), TileQuad::NONE);
        assert_eq!(TileQuad::NONE.tiles().count(), 0);
        assert_eq!(TileQuad::NONE.len(), 0);
        assert_eq!(TileQuad::NONE.completing_tile(), None);
        assert_eq!(TileQuad::new(-5), TileQuad::NONE);
        assert!(!TileQuad::NONE.covers_tile(&Tile::root()));
    }

    #[test]
    fn test_zoom_out_unaligned_block() {
        // columns 1,2 rows 1,2 at zoom 2 straddle all four zoom 1 tiles
        let q = quad(&[(2, 1, 1), (2, 2, 2)]);
        let z = q.zoom_out(1);
        assert_eq!(z.zoom(), 1);
        assert_eq!(z.len(), 2);
        assert_eq!(z.tiles().collect::<Vec<_>>(), vec![Tile::new(1, 0, 0), Tile::new(1, 1, 1)]);
        assert_eq!(q.zoom_out(5), TileQuad::from_tile(Tile::root()));
        assert_eq!(q.zoomed_to(4), q);
    }

    #[test]
    fn test_subtract_coarser_tile() {
        let q = quad(&[(4, 7, 7), (4, 8, 8)]);
        // zoom 1 tile (0,0) holds 7,7 but not 8,8
        let r = q.subtract_tile(&Tile::new(1, 0, 0));
        assert_eq!(r, TileQuad::from_tile(Tile::new(4, 8, 8)));
        assert_eq!(q.subtract_tile(&Tile::root()), TileQuad::NONE);
        // finer tile leaves the quad alone
        assert_eq!(q.subtract_tile(&Tile::new(5, 14, 14)), q);
    }

    #[test]
    fn test_completing_tile() {
        let q = quad(&[(4, 4, 4), (4, 5, 4), (4, 4, 5), (4, 5, 5)]);
        assert_eq!(q.completing_tile(), Some(Tile::new(4, 5, 5)));

        let ew = quad(&[(4, 5, 4), (4, 6, 4)]);
        assert_eq!(ew.completing_tile(), Some(Tile::new(4, 5, 4)));

        let ns = quad(&[(4, 6, 4), (4, 6, 5)]);
        assert_eq!(ns.completing_tile(), Some(Tile::new(4, 6, 5)));
    }

    #[test]
    fn test_covers_tile() {
        let q = quad(&[(3, 2, 2), (3, 3, 2)]);
        assert!(q.covers_tile(&Tile::new(3, 3, 2)));
        assert!(q.covers_tile(&Tile::new(6, 31, 16)));
        assert!(!q.covers_tile(&Tile::new(6, 32, 16)));
        assert!(!q.covers_tile(&Tile::new(2, 1, 1)));
    }
}
