use serde::{Deserialize, Serialize};

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use crate::catalog::TileCatalog;
use crate::linker::linker::LinkedTile;
use crate::logging::messenger;
use crate::pbfformat::{pack_file_block, read_file_block_at};
use crate::utils::{now_timestamp, timestamp_string, Error, Result};

const TILE_BLOCK: &str = "TileData";

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArchiveEntry {
    pub pile: u32,
    /// `z/c/r`, or "purgatory".
    pub tile: String,
    pub pos: u64,
    pub len: u64,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArchiveIndex {
    pub created: String,
    pub entries: Vec<ArchiveEntry>,
}

impl ArchiveIndex {
    pub fn index_filename(archive: &str) -> String {
        format!("{}-index.json", archive)
    }

    pub fn from_file(archive: &str) -> Result<ArchiveIndex> {
        let ff = File::open(ArchiveIndex::index_filename(archive))?;
        Ok(serde_json::from_reader(BufReader::new(ff))?)
    }

    pub fn write(&self, archive: &str) -> Result<()> {
        let ff = File::create(ArchiveIndex::index_filename(archive))?;
        let mut w = BufWriter::new(ff);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.flush()?;
        Ok(())
    }

    pub fn find(&self, pile: u32) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.pile == pile)
    }
}

/// Writes each tile as a file block to `fname` and the offsets to
/// `<fname>-index.json`.
pub fn write_archive(
    fname: &str,
    catalog: &TileCatalog,
    tiles: &[LinkedTile],
    compress: bool,
) -> Result<ArchiveIndex> {
    let mut out = BufWriter::new(File::create(fname)?);
    let mut entries = Vec::with_capacity(tiles.len());
    let mut pos = 0;
    let total: usize = tiles.iter().map(|t| t.data.len()).sum();
    let pb = messenger().start_progress_bytes(&format!("write {}", fname), total as u64);
    let mut done = 0;
    for t in tiles {
        let tile = match catalog.tile_of(t.pile) {
            Some(t) => t.to_string(),
            None => String::from("purgatory"),
        };
        let block = pack_file_block(TILE_BLOCK, &t.data, compress)?;
        out.write_all(&block)?;
        entries.push(ArchiveEntry {
            pile: t.pile,
            tile,
            pos,
            len: block.len() as u64,
        });
        pos += block.len() as u64;
        done += t.data.len();
        pb.progress_bytes(done as u64);
    }
    out.flush()?;
    pb.finish();

    let index = ArchiveIndex {
        created: timestamp_string(now_timestamp()),
        entries,
    };
    index.write(fname)?;
    Ok(index)
}

pub fn read_archive_tile(fname: &str, entry: &ArchiveEntry) -> Result<Vec<u8>> {
    let mut ff = BufReader::new(File::open(fname)?);
    let fb = read_file_block_at(&mut ff, entry.pos)?;
    if fb.block_type != TILE_BLOCK {
        return Err(Error::InvalidData(format!(
            "{} @ {}: expected {}, found {}",
            fname, entry.pos, TILE_BLOCK, fb.block_type
        )));
    }
    fb.data()
}
