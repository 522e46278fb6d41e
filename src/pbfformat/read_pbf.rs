use crate::utils::{Error, Result};

#[derive(PartialEq, Debug)]
pub enum PbfTag<'a> {
    Value(u64, u64),
    Data(u64, &'a [u8]),
}

fn too_short(pos: usize) -> Error {
    Error::InvalidData(format!("data too short at {}", pos))
}

pub fn read_uint32(data: &[u8], pos: usize) -> Result<(u64, usize)> {
    if (pos + 4) > data.len() {
        return Err(too_short(pos));
    }
    let mut res: u64 = 0;

    res |= data[pos + 3] as u64;
    res |= (data[pos + 2] as u64) << 8;
    res |= (data[pos + 1] as u64) << 16;
    res |= (data[pos + 0] as u64) << 24;

    Ok((res, pos + 4))
}

pub fn un_zig_zag(uv: u64) -> i64 {
    let x = (uv >> 1) as i64;
    if (uv & 1) != 0 {
        return x ^ -1;
    }
    x
}

pub fn read_uint(data: &[u8], pos: usize) -> Result<(u64, usize)> {
    let mut res: u64 = 0;
    for i in 0..10 {
        if pos + i >= data.len() {
            return Err(too_short(pos));
        }
        let x = data[pos + i];
        let y = (x & 127) as u64;
        res |= y << (7 * i);

        if (x & 128) == 0 {
            return Ok((res, pos + i + 1));
        }
    }
    Ok((res, pos + 10))
}

pub fn read_int(data: &[u8], pos: usize) -> Result<(i64, usize)> {
    let (v, p) = read_uint(data, pos)?;
    Ok((un_zig_zag(v), p))
}

pub fn read_data<'a>(data: &'a [u8], pos: usize) -> Result<(&'a [u8], usize)> {
    let (ln, pos) = read_uint(data, pos)?;

    let l = ln as usize;
    if pos + l > data.len() {
        return Err(too_short(pos));
    }
    Ok((&data[pos..pos + l], pos + l))
}

pub fn read_tag<'a>(data: &'a [u8], pos: usize) -> Result<(PbfTag<'a>, usize)> {
    let (t, pos) = read_uint(data, pos)?;

    if (t & 7) == 0 {
        let (v, pos) = read_uint(data, pos)?;
        return Ok((PbfTag::Value(t >> 3, v), pos));
    }
    if (t & 7) == 2 {
        let (s, pos) = read_data(data, pos)?;
        return Ok((PbfTag::Data(t >> 3, s), pos));
    }
    Err(Error::InvalidData(format!("unexpected tag {} at {}", t, pos)))
}

pub struct IterTags<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> IterTags<'a> {
    pub fn new(data: &'a [u8]) -> IterTags<'a> {
        IterTags { data, pos: 0 }
    }
}

impl<'a> Iterator for IterTags<'a> {
    type Item = Result<PbfTag<'a>>;

    fn next(&mut self) -> Option<Result<PbfTag<'a>>> {
        if self.pos < self.data.len() {
            return match read_tag(self.data, self.pos) {
                Ok((t, npos)) => {
                    self.pos = npos;
                    Some(Ok(t))
                }
                Err(e) => {
                    self.pos = self.data.len();
                    Some(Err(e))
                }
            };
        }
        None
    }
}

/// Reads varints from a byte slice, keeping track of the position.
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Cursor<'a> {
        Cursor { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }
    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        if self.pos >= self.data.len() {
            return Err(too_short(self.pos));
        }
        let b = self.data[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub fn read_uint(&mut self) -> Result<u64> {
        let (v, p) = read_uint(self.data, self.pos)?;
        self.pos = p;
        Ok(v)
    }

    pub fn read_int(&mut self) -> Result<i64> {
        let (v, p) = read_int(self.data, self.pos)?;
        self.pos = p;
        Ok(v)
    }

    pub fn read_data(&mut self) -> Result<&'a [u8]> {
        let (v, p) = read_data(self.data, self.pos)?;
        self.pos = p;
        Ok(v)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let d = self.read_data()?;
        match std::str::from_utf8(d) {
            Ok(s) => Ok(String::from(s)),
            Err(e) => Err(Error::InvalidData(format!("{:?} at {}", e, self.pos))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_all_tags() {
        let data: Vec<u8> = vec![8, 27, 16, 181, 254, 132, 214, 241, 2, 26, 4, 102, 114, 111, 103];
        let decoded: Vec<PbfTag> = IterTags::new(&data).map(|t| t.unwrap()).collect();

        let should_equal = vec![
            PbfTag::Value(1, 27),
            PbfTag::Value(2, 99233120053),
            PbfTag::Data(3, b"frog"),
        ];

        assert_eq!(decoded, should_equal);
    }

    #[test]
    fn test_read_uint32() {
        let data: Vec<u8> = vec![11, 60, 198, 127];
        let (r, p) = read_uint32(&data, 0).unwrap();
        assert_eq!(r, 188532351);
        assert_eq!(p, 4);
    }

    #[test]
    fn test_truncated_varint() {
        let data: Vec<u8> = vec![0x80, 0x80];
        assert!(read_uint(&data, 0).is_err());
        let mut c = Cursor::new(&data);
        assert!(c.read_int().is_err());
    }
}
