use std::f64::consts::PI;
use std::fmt;

use crate::utils::{Error, Result};

pub const MAX_ZOOM: u32 = 20;

const MAX_MERCATOR_LATITUDE: f64 = 85.0511287798;

pub fn coordinate_as_integer(v: f64) -> i32 {
    if v > 0.0 {
        return ((v * 10000000.0) + 0.5) as i32;
    }
    ((v * 10000000.0) - 0.5) as i32
}

pub fn coordinate_as_float(v: i32) -> f64 {
    (v as f64) * 0.0000001
}

fn latitude_mercator(y: f64, scale: f64) -> f64 {
    (PI * (1.0 + y / 90.0) / 4.0).tan().ln() * scale / PI
}

fn latitude_un_mercator(d: f64, scale: f64) -> f64 {
    ((d * PI / scale).exp().atan() * 4.0 / PI - 1.0) * 90.0
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Bbox {
    pub minlon: i32,
    pub minlat: i32,
    pub maxlon: i32,
    pub maxlat: i32,
}
impl Bbox {
    pub fn new(minlon: i32, minlat: i32, maxlon: i32, maxlat: i32) -> Bbox {
        Bbox {
            minlon,
            minlat,
            maxlon,
            maxlat,
        }
    }
    pub fn empty() -> Bbox {
        Bbox::new(1800000000, 900000000, -1800000000, -900000000)
    }
    pub fn planet() -> Bbox {
        Bbox::new(-1800000000, -900000000, 1800000000, 900000000)
    }

    pub fn is_empty(&self) -> bool {
        self.minlon > self.maxlon || self.minlat > self.maxlat
    }

    pub fn contains(&self, other: &Bbox) -> bool {
        if self.minlon > other.minlon {
            return false;
        }
        if self.minlat > other.minlat {
            return false;
        }
        if self.maxlon < other.maxlon {
            return false;
        }
        if self.maxlat < other.maxlat {
            return false;
        }
        true
    }
    pub fn contains_point(&self, ln: i32, lt: i32) -> bool {
        if self.minlon > ln {
            return false;
        }
        if self.minlat > lt {
            return false;
        }
        if self.maxlon < ln {
            return false;
        }
        if self.maxlat < lt {
            return false;
        }
        true
    }

    pub fn expand(&mut self, lon: i32, lat: i32) {
        if lon < self.minlon {
            self.minlon = lon;
        }
        if lat < self.minlat {
            self.minlat = lat;
        }
        if lon > self.maxlon {
            self.maxlon = lon;
        }
        if lat > self.maxlat {
            self.maxlat = lat;
        }
    }

    pub fn expand_box(&mut self, other: &Bbox) {
        if other.is_empty() {
            return;
        }
        self.expand(other.minlon, other.minlat);
        self.expand(other.maxlon, other.maxlat);
    }

    pub fn overlaps(&self, other: &Bbox) -> bool {
        if self.minlon > other.maxlon {
            return false;
        }
        if self.minlat > other.maxlat {
            return false;
        }
        if other.minlon > self.maxlon {
            return false;
        }
        if other.minlat > self.maxlat {
            return false;
        }
        return true;
    }
}

impl fmt::Display for Bbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:-10} {:-10} {:-10} {:-10}]",
            self.minlon, self.minlat, self.maxlon, self.maxlat
        )
    }
}

/// A cell of the web-mercator quadtree. Row 0 is the northernmost row.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Tile {
    pub zoom: u32,
    pub column: u32,
    pub row: u32,
}

impl Tile {
    pub fn new(zoom: u32, column: u32, row: u32) -> Tile {
        Tile { zoom, column, row }
    }

    pub fn root() -> Tile {
        Tile::new(0, 0, 0)
    }

    pub fn checked(zoom: u32, column: u32, row: u32) -> Result<Tile> {
        if zoom > MAX_ZOOM {
            return Err(Error::InvalidInput(format!("zoom {} out of range", zoom)));
        }
        let extent = 1u32 << zoom;
        if column >= extent || row >= extent {
            return Err(Error::InvalidInput(format!(
                "tile {}/{}/{} out of range",
                zoom, column, row
            )));
        }
        Ok(Tile::new(zoom, column, row))
    }

    /// Finds the tile at `zoom` which contains the point `(lon, lat)`
    /// (fixed point, 1e-7 degrees).
    pub fn containing(lon: i32, lat: i32, zoom: u32) -> Tile {
        let extent = (1u64 << zoom) as f64;
        let max_index = (1u32 << zoom) - 1;

        let x = (coordinate_as_float(lon) + 180.0) / 360.0;
        let mut column = (x * extent).floor();
        if column < 0.0 {
            column = 0.0;
        }

        let mut lat_f = coordinate_as_float(lat);
        if lat_f > MAX_MERCATOR_LATITUDE {
            lat_f = MAX_MERCATOR_LATITUDE;
        } else if lat_f < -MAX_MERCATOR_LATITUDE {
            lat_f = -MAX_MERCATOR_LATITUDE;
        }
        let y = (1.0 - latitude_mercator(lat_f, 1.0)) / 2.0;
        let mut row = (y * extent).floor();
        if row < 0.0 {
            row = 0.0;
        }

        Tile::new(
            zoom,
            u32::min(column as u32, max_index),
            u32::min(row as u32, max_index),
        )
    }

    pub fn parent(&self) -> Option<Tile> {
        if self.zoom == 0 {
            return None;
        }
        Some(Tile::new(self.zoom - 1, self.column >> 1, self.row >> 1))
    }

    /// Returns the ancestor of this tile at `zoom`, or the tile itself if
    /// `zoom` is not coarser.
    pub fn ancestor(&self, zoom: u32) -> Tile {
        if zoom >= self.zoom {
            return *self;
        }
        let d = self.zoom - zoom;
        Tile::new(zoom, self.column >> d, self.row >> d)
    }

    /// True if `other` is this tile or lies within it.
    pub fn is_ancestor_of(&self, other: &Tile) -> bool {
        if other.zoom < self.zoom {
            return false;
        }
        other.ancestor(self.zoom) == *self
    }

    /// Column parity plus twice the row parity: 0 for (even, even),
    /// 1 for (odd, even), 2 for (even, odd), 3 for (odd, odd).
    pub fn quadrant_key(&self) -> u32 {
        (self.column & 1) + 2 * (self.row & 1)
    }

    pub fn bbox(&self) -> Bbox {
        let extent = (1u64 << self.zoom) as f64;
        let min_x = (self.column as f64) / extent * 360.0 - 180.0;
        let max_x = ((self.column + 1) as f64) / extent * 360.0 - 180.0;

        let max_y = latitude_un_mercator(1.0 - 2.0 * (self.row as f64) / extent, 1.0);
        let min_y = latitude_un_mercator(1.0 - 2.0 * ((self.row + 1) as f64) / extent, 1.0);

        Bbox::new(
            coordinate_as_integer(min_x),
            coordinate_as_integer(min_y),
            coordinate_as_integer(max_x),
            coordinate_as_integer(max_y),
        )
    }

    /// Packs the tile into a quadtree key: interleaved column and row bits
    /// from the most significant end, zoom in the low five bits. Sorting by
    /// this key gives a depth-first traversal of the quadtree.
    pub fn as_int(&self) -> i64 {
        let mut ans: i64 = 0;
        let mut scale = 1;
        for i in 0..(self.zoom as usize) {
            ans += ((((self.column >> i) & 1) | (((self.row >> i) & 1) << 1)) as i64) * scale;
            scale *= 4;
        }
        ans <<= 63 - 2 * (self.zoom as usize);
        ans += self.zoom as i64;
        ans
    }

    pub fn from_int(qt: i64) -> Result<Tile> {
        if qt < 0 {
            return Err(Error::InvalidInput(format!("out of range {}", qt)));
        }

        if (qt & 31) > (MAX_ZOOM as i64) {
            return Err(Error::InvalidInput(format!("out of range {}", qt & 31)));
        }

        let mut res = Tile::new((qt & 31) as u32, 0, 0);

        for i in 0..res.zoom {
            res.column <<= 1;
            res.row <<= 1;
            let t = (qt >> (61 - 2 * i)) & 3;
            if t == 1 || t == 3 {
                res.column |= 1;
            }
            if t == 2 || t == 3 {
                res.row |= 1;
            }
        }
        Ok(res)
    }

    pub fn as_string(&self) -> String {
        let mut r = String::with_capacity(self.zoom as usize);
        for i in (0..self.zoom).rev() {
            let q = ((self.column >> i) & 1) | (((self.row >> i) & 1) << 1);
            r.push(match q {
                0 => 'A',
                1 => 'B',
                2 => 'C',
                _ => 'D',
            });
        }
        r
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.column, self.row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_containing() {
        assert_eq!(Tile::containing(0, 0, 0), Tile::root());
        // just east of greenwich, just north of the equator
        assert_eq!(Tile::containing(10, 10, 1), Tile::new(1, 1, 0));
        assert_eq!(Tile::containing(-10, -10, 1), Tile::new(1, 0, 1));
        // london
        assert_eq!(Tile::containing(-1275000, 515072000, 12), Tile::new(12, 2046, 1362));
        // poles and antimeridian clamp into range
        assert_eq!(Tile::containing(1800000000, 900000000, 3), Tile::new(3, 7, 0));
        assert_eq!(Tile::containing(-1800000000, -900000000, 3), Tile::new(3, 0, 7));
    }

    #[test]
    fn test_ancestors() {
        let t = Tile::new(5, 19, 7);
        assert_eq!(t.parent(), Some(Tile::new(4, 9, 3)));
        assert_eq!(t.ancestor(2), Tile::new(2, 2, 0));
        assert_eq!(t.ancestor(7), t);
        assert!(Tile::new(2, 2, 0).is_ancestor_of(&t));
        assert!(t.is_ancestor_of(&t));
        assert!(!t.is_ancestor_of(&Tile::new(2, 2, 0)));
        assert!(Tile::root().is_ancestor_of(&t));
        assert_eq!(Tile::root().parent(), None);
    }

    #[test]
    fn test_quadrant_key() {
        assert_eq!(Tile::new(3, 2, 4).quadrant_key(), 0);
        assert_eq!(Tile::new(3, 3, 4).quadrant_key(), 1);
        assert_eq!(Tile::new(3, 2, 5).quadrant_key(), 2);
        assert_eq!(Tile::new(3, 3, 5).quadrant_key(), 3);
    }

    #[test]
    fn test_as_int() {
        for t in &[Tile::root(), Tile::new(1, 1, 0), Tile::new(12, 2046, 1362), Tile::new(20, 1048575, 3)] {
            assert_eq!(Tile::from_int(t.as_int()).unwrap(), *t);
        }
        assert_eq!(Tile::new(2, 1, 2).as_string(), "CB");
        assert!(Tile::from_int(-1).is_err());
        assert!(Tile::checked(3, 8, 0).is_err());
    }

    #[test]
    fn test_tile_bbox() {
        let b = Tile::root().bbox();
        assert_eq!(b.minlon, -1800000000);
        assert_eq!(b.maxlon, 1800000000);
        assert!(b.maxlat > 850000000 && b.maxlat < 860000000);

        let t = Tile::new(12, 2046, 1362);
        assert!(t.bbox().contains_point(-1275000, 515072000));
        let mut bx = Bbox::empty();
        assert!(bx.is_empty());
        bx.expand_box(&t.bbox());
        assert_eq!(bx, t.bbox());
    }
}
