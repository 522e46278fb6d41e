mod archive;
mod linker;

pub use archive::{read_archive_tile, write_archive, ArchiveEntry, ArchiveIndex};
pub use linker::{
    compact_piles, link_tile, link_tiles, CompactedTile, ExportTable, Import, LinkStats,
    LinkedTile, TileCompactor, UNRESOLVED,
};
