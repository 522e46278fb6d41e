use std::io::{Read, Seek, SeekFrom, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::pbfformat::read_pbf::{read_uint32, IterTags, PbfTag};
use crate::pbfformat::write_pbf::{pack_data, pack_value, write_uint32};
use crate::utils::{Error, Result};

pub fn read_file_data<R: Read>(file: &mut R, nbytes: u64) -> Result<Vec<u8>> {
    let mut res = vec![0u8; nbytes as usize];
    file.read_exact(&mut res)?;
    Ok(res)
}

#[derive(Debug)]
pub struct FileBlock {
    pub pos: u64,
    pub len: u64,
    pub block_type: String,
    pub data_raw: Vec<u8>,
    pub is_comp: bool,
}
impl FileBlock {
    pub fn new() -> FileBlock {
        FileBlock {
            pos: 0,
            len: 0,
            block_type: String::new(),
            data_raw: Vec::new(),
            is_comp: false,
        }
    }

    pub fn data(&self) -> Result<Vec<u8>> {
        if !self.is_comp {
            return Ok(self.data_raw.clone());
        }

        let mut comp = Vec::new();
        let mut xx = ZlibDecoder::new(&self.data_raw[..]);

        match xx.read_to_end(&mut comp) {
            Ok(_) => Ok(comp),
            Err(e) => Err(Error::InvalidData(format!(
                "failed to decompress data at pos {}: {:?}",
                self.pos, e
            ))),
        }
    }
}

fn read_file_block_with_pos<F: Read>(file: &mut F, mut pos: u64) -> Result<(u64, FileBlock)> {
    let mut fb = FileBlock::new();
    fb.pos = pos;

    let a = read_file_data(file, 4)?;
    pos += 4;

    let (l, _) = read_uint32(&a, 0)?;

    let b = read_file_data(file, l)?;
    pos += l;

    let mut ln = 0;
    for tg in IterTags::new(&b) {
        match tg? {
            PbfTag::Value(3, v) => ln = v,
            PbfTag::Data(1, d) => fb.block_type = String::from_utf8_lossy(d).to_string(),
            tg => {
                return Err(Error::InvalidData(format!("?? wrong tag @ {} {:?}", pos, tg)));
            }
        }
    }
    fb.len = 4 + l + ln;

    let c = read_file_data(file, ln)?;
    pos += ln;

    for tg in IterTags::new(&c) {
        match tg? {
            PbfTag::Data(1, d) => fb.data_raw = d.to_vec(),
            PbfTag::Value(2, _) => fb.is_comp = true,
            PbfTag::Data(3, d) => fb.data_raw = d.to_vec(),
            tg => {
                return Err(Error::InvalidData(format!("?? wrong tag @ {} {:?}", pos, tg)));
            }
        }
    }

    Ok((pos, fb))
}

pub fn read_file_block_at<F: Read + Seek>(file: &mut F, pos: u64) -> Result<FileBlock> {
    file.seek(SeekFrom::Start(pos))?;
    let (_, fb) = read_file_block_with_pos(file, pos)?;
    Ok(fb)
}

pub fn pack_file_block(blockname: &str, data: &[u8], compress: bool) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    if compress {
        let mut e = ZlibEncoder::new(Vec::new(), flate2::Compression::new(6));
        e.write_all(&data[..])?;

        let comp = e.finish()?;
        body.reserve(comp.len() + 25);
        pack_value(&mut body, 2, data.len() as u64);
        pack_data(&mut body, 3, &comp[..]);
    } else {
        body.reserve(data.len() + 5);
        pack_data(&mut body, 1, &data[..]);
    }

    let mut head = Vec::with_capacity(25);
    pack_data(&mut head, 1, blockname.as_bytes());
    pack_value(&mut head, 3, body.len() as u64);

    let mut result = Vec::with_capacity(4 + head.len() + body.len());
    write_uint32(&mut result, head.len() as u32);
    result.extend(head);
    result.extend(body);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_pack_unpack_file_block() {
        let data: Vec<u8> = (0..2000).map(|i| (i % 7) as u8).collect();
        for compress in &[true, false] {
            let packed = pack_file_block("PileData", &data, *compress).unwrap();
            let fb = read_file_block_at(&mut Cursor::new(&packed), 0).unwrap();
            assert_eq!(fb.block_type, "PileData");
            assert_eq!(fb.is_comp, *compress);
            assert_eq!(fb.len, packed.len() as u64);
            assert_eq!(fb.data().unwrap(), data);
        }
    }

    #[test]
    fn test_read_block_at_offset() {
        let mut file = Vec::new();
        file.extend(pack_file_block("A", b"first", true).unwrap());
        let second = file.len() as u64;
        file.extend(pack_file_block("B", b"second", true).unwrap());

        let mut cur = Cursor::new(file);
        let fb = read_file_block_at(&mut cur, second).unwrap();
        assert_eq!(fb.block_type, "B");
        assert_eq!(fb.data().unwrap(), b"second".to_vec());
        assert_eq!(cur.position(), cur.get_ref().len() as u64);
    }
}
