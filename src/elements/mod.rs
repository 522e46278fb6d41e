pub mod feature;
pub mod tile;
pub mod tilequad;

pub use feature::{tags_from, ElementId, ElementType, Feature, Member, Node, Relation, Tag, Way};
pub use tile::{coordinate_as_float, coordinate_as_integer, Bbox, Tile, MAX_ZOOM};
pub use tilequad::TileQuad;
