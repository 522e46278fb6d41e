use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};

use regex::Regex;

use crate::elements::{Tile, TileQuad};
use crate::utils::{Error, Result};

/// Features whose location cannot be determined.
pub const PURGATORY: u32 = 1;
/// The pile of the root tile 0/0/0.
pub const ROOT_PILE: u32 = 2;

const TILE_REGEX: &str = r"^\s*(\d+)/(\d+)/(\d+)\s*$";

/// Maps the tiles which back a partition ("piles") to dense pile numbers
/// and back.
#[derive(Debug, Clone)]
pub struct TileCatalog {
    tiles: Vec<Tile>,
    piles: HashMap<Tile, u32>,
    max_zoom: u32,
}

impl TileCatalog {
    /// Assigns piles 2, 3, ... to `tiles` in order. The first tile must be
    /// the root.
    pub fn from_tiles(tiles: &[Tile]) -> Result<TileCatalog> {
        if tiles.first() != Some(&Tile::root()) {
            return Err(Error::InvalidInput(String::from(
                "first catalog tile must be 0/0/0",
            )));
        }
        let mut piles = HashMap::with_capacity(tiles.len());
        let mut max_zoom = 0;
        for (i, t) in tiles.iter().enumerate() {
            let t = Tile::checked(t.zoom, t.column, t.row)?;
            if piles.insert(t, ROOT_PILE + i as u32).is_some() {
                return Err(Error::InvalidInput(format!("tile {} repeated", t)));
            }
            max_zoom = u32::max(max_zoom, t.zoom);
        }
        Ok(TileCatalog {
            tiles: tiles.to_vec(),
            piles,
            max_zoom,
        })
    }

    /// Reads the text table: one `<pile hex>\t<zoom>/<column>/<row>` line
    /// per pile, `#` starts a comment line.
    pub fn from_reader<R: Read>(reader: R) -> Result<TileCatalog> {
        let re = match Regex::new(TILE_REGEX) {
            Ok(r) => r,
            Err(e) => {
                return Err(Error::InvalidInput(format!("{:?}", e)));
            }
        };

        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .comment(Some(b'#'))
            .from_reader(reader);

        let mut by_pile: Vec<Option<Tile>> = Vec::new();
        for (line, row) in rdr.records().enumerate() {
            let rec = row?;
            if rec.len() != 2 {
                return Err(Error::InvalidInput(format!(
                    "catalog line {}: expected 2 fields, found {}",
                    line,
                    rec.len()
                )));
            }
            let pile = match u32::from_str_radix(rec[0].trim(), 16) {
                Ok(p) => p,
                Err(_) => {
                    return Err(Error::InvalidInput(format!(
                        "catalog line {}: bad pile {:?}",
                        line, &rec[0]
                    )));
                }
            };
            if pile < ROOT_PILE {
                return Err(Error::InvalidInput(format!(
                    "catalog line {}: pile {} is reserved",
                    line, pile
                )));
            }
            let tile = parse_tile(&re, &rec[1], line)?;

            let idx = (pile - ROOT_PILE) as usize;
            if by_pile.len() <= idx {
                by_pile.resize(idx + 1, None);
            }
            if by_pile[idx].is_some() {
                return Err(Error::InvalidInput(format!(
                    "catalog line {}: pile {:x} repeated",
                    line, pile
                )));
            }
            by_pile[idx] = Some(tile);
        }

        let mut tiles = Vec::with_capacity(by_pile.len());
        for (i, t) in by_pile.into_iter().enumerate() {
            match t {
                Some(t) => tiles.push(t),
                None => {
                    return Err(Error::InvalidInput(format!(
                        "catalog has no pile {:x}",
                        i as u32 + ROOT_PILE
                    )));
                }
            }
        }
        TileCatalog::from_tiles(&tiles)
    }

    pub fn from_file(fname: &str) -> Result<TileCatalog> {
        TileCatalog::from_reader(File::open(fname)?)
    }

    pub fn write<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(writer);
        for (i, t) in self.tiles.iter().enumerate() {
            wtr.write_record(&[format!("{:x}", i as u32 + ROOT_PILE), t.to_string()])?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Number of piles, including Purgatory.
    pub fn pile_count(&self) -> usize {
        self.tiles.len() + 1
    }

    /// Every pile number, Purgatory first.
    pub fn piles(&self) -> impl Iterator<Item = u32> {
        PURGATORY..(self.tiles.len() as u32 + ROOT_PILE)
    }

    pub fn max_zoom(&self) -> u32 {
        self.max_zoom
    }

    pub fn pile_of(&self, tile: &Tile) -> Option<u32> {
        self.piles.get(tile).copied()
    }

    pub fn tile_of(&self, pile: u32) -> Option<Tile> {
        if pile < ROOT_PILE {
            return None;
        }
        self.tiles.get((pile - ROOT_PILE) as usize).copied()
    }

    /// The pile of `tile`, or of its nearest ancestor which is a pile.
    pub fn resolve(&self, tile: &Tile) -> u32 {
        let mut t = *tile;
        loop {
            if let Some(p) = self.pile_of(&t) {
                return p;
            }
            match t.parent() {
                Some(p) => t = p,
                None => return ROOT_PILE,
            }
        }
    }

    /// The pile of the deepest catalog tile containing the point.
    pub fn pile_of_point(&self, lon: i32, lat: i32) -> u32 {
        self.resolve(&Tile::containing(lon, lat, self.max_zoom))
    }

    /// Zooms `quad` out until every one of its tiles is a pile. The root is
    /// always a pile, so this never fails.
    pub fn validate(&self, quad: &TileQuad) -> TileQuad {
        let mut q = *quad;
        if q.is_none() {
            return q;
        }
        if q.zoom() > self.max_zoom {
            q = q.zoomed_to(self.max_zoom);
        }
        loop {
            if q.tiles().all(|t| self.piles.contains_key(&t)) {
                return q;
            }
            if q.zoom() == 0 {
                return TileQuad::from_tile(Tile::root());
            }
            q = q.zoom_out(1);
        }
    }

    /// Piles of every tile of `quad`, in NW, NE, SW, SE order. `quad` must
    /// already be validated.
    pub fn piles_of_quad(&self, quad: &TileQuad) -> Vec<u32> {
        quad.tiles().filter_map(|t| self.pile_of(&t)).collect()
    }
}

fn parse_tile(re: &Regex, s: &str, line: usize) -> Result<Tile> {
    let bad = || Error::InvalidInput(format!("catalog line {}: bad tile {:?}", line, s));
    let caps = re.captures(s).ok_or_else(bad)?;

    let mut vals = [0u32; 3];
    for (i, v) in vals.iter_mut().enumerate() {
        *v = match caps.get(i + 1).map(|m| m.as_str().parse::<u32>()) {
            Some(Ok(x)) => x,
            _ => {
                return Err(bad());
            }
        };
    }
    Tile::checked(vals[0], vals[1], vals[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_catalog() -> TileCatalog {
        let mut tiles = vec![Tile::root()];
        for c in 0..2 {
            for r in 0..2 {
                tiles.push(Tile::new(1, c, r));
            }
        }
        for c in 0..4 {
            for r in 0..2 {
                tiles.push(Tile::new(2, c, r));
            }
        }
        TileCatalog::from_tiles(&tiles).unwrap()
    }

    #[test]
    fn test_read_text_table() {
        let text = "# test catalog\n2\t0/0/0\n3\t1/0/0\n5\t1/1/1\n4\t1/1/0\n";
        let cat = TileCatalog::from_reader(text.as_bytes()).unwrap();
        assert_eq!(cat.pile_count(), 4 + 1);
        assert_eq!(cat.pile_of(&Tile::new(1, 1, 1)), Some(5));
        assert_eq!(cat.tile_of(4), Some(Tile::new(1, 1, 0)));
        assert_eq!(cat.tile_of(PURGATORY), None);
        assert_eq!(cat.max_zoom(), 1);
        assert_eq!(cat.piles().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);

        let mut out = Vec::new();
        cat.write(&mut out).unwrap();
        let again = TileCatalog::from_reader(&out[..]).unwrap();
        for p in 2..6 {
            assert_eq!(again.tile_of(p), cat.tile_of(p));
        }
    }

    #[test]
    fn test_bad_tables() {
        assert!(TileCatalog::from_reader("2\t1/0/0\n".as_bytes()).is_err());
        assert!(TileCatalog::from_reader("2\t0/0/0\n4\t1/0/0\n".as_bytes()).is_err());
        assert!(TileCatalog::from_reader("2\t0/0/0\n3\t1/2/0\n".as_bytes()).is_err());
        assert!(TileCatalog::from_reader("2\t0/0/0\n3\tone/0/0\n".as_bytes()).is_err());
        assert!(TileCatalog::from_reader("1\t0/0/0\n".as_bytes()).is_err());
        assert!(TileCatalog::from_reader("2\t0/0/0\n2\t1/0/0\n".as_bytes()).is_err());
    }

    #[test]
    fn test_resolve_nearest_ancestor() {
        let cat = small_catalog();
        // 2/1/1 is a pile, 3/3/3 lies inside it
        let p = cat.pile_of(&Tile::new(2, 1, 1)).unwrap();
        assert_eq!(cat.resolve(&Tile::new(3, 3, 3)), p);
        // southern half only goes to zoom 1
        assert_eq!(cat.resolve(&Tile::new(4, 2, 12)), cat.pile_of(&Tile::new(1, 0, 1)).unwrap());
        assert_eq!(cat.pile_of_point(-1275000, 515072000), cat.pile_of(&Tile::new(2, 1, 1)).unwrap());
    }

    #[test]
    fn test_validate() {
        let cat = small_catalog();
        let q = TileQuad::from_tile(Tile::new(2, 1, 1)).add_tile(&Tile::new(2, 2, 1));
        assert_eq!(cat.validate(&q), q);

        // 2/1/2 has no pile: the block collapses to zoom 1
        let q2 = TileQuad::from_tile(Tile::new(2, 1, 1)).add_tile(&Tile::new(2, 1, 2));
        let v2 = cat.validate(&q2);
        assert_eq!(v2.zoom(), 1);
        assert_eq!(v2.tiles().collect::<Vec<_>>(), vec![Tile::new(1, 0, 0), Tile::new(1, 0, 1)]);

        // finer than the catalog
        let q3 = TileQuad::from_tile(Tile::new(6, 20, 20));
        assert_eq!(cat.validate(&q3), TileQuad::from_tile(Tile::new(2, 1, 1)));
        assert_eq!(cat.validate(&TileQuad::NONE), TileQuad::NONE);
    }

    #[test]
    fn test_validate_idempotent() {
        let cat = small_catalog();
        for z in 0..5 {
            let n = 1 << z;
            for c in 0..n - 1 {
                for r in 0..n - 1 {
                    let q = TileQuad::from_tile(Tile::new(z, c, r)).add_tile(&Tile::new(z, c + 1, r + 1));
                    let v = cat.validate(&q);
                    assert_eq!(cat.validate(&v), v);
                    assert!(v.tiles().all(|t| cat.pile_of(&t).is_some()));
                    for t in q.tiles() {
                        assert!(v.covers_tile(&t));
                    }
                    if v != q {
                        assert_eq!(cat.validate(&q.zoom_out(1)), v);
                    }
                }
            }
        }
    }
}
