pub mod fileblock;
pub mod read_pbf;
pub mod write_pbf;

pub use crate::pbfformat::fileblock::{pack_file_block, read_file_block_at, FileBlock};
pub use crate::pbfformat::read_pbf::{un_zig_zag, Cursor};
pub use crate::pbfformat::write_pbf::{
    pack_delta_int_ref, varint_length, write_int, write_string, write_varint, zig_zag,
};
