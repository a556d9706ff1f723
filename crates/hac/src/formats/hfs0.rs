//! HFS0 ("Hashed FileSystem 0"): a PFS0-like container whose entries also
//! carry a SHA-256 hash of (a prefix of) their data. Used by XCI gamecard
//! images; this library only needs to parse it, not build it.

use binrw::{BinRead, BinWrite};
use snafu::{ResultExt, Snafu};

pub const MAGIC: [u8; 4] = *b"HFS0";

#[derive(Snafu, Debug)]
pub enum Hfs0Error {
    #[snafu(display("invalid HFS0 magic"))]
    InvalidMagic,
    #[snafu(display("HFS0 parse error: {source}"))]
    Binrw { source: binrw::Error },
}

#[derive(BinRead, BinWrite)]
#[brw(little, magic = b"HFS0")]
struct Header {
    file_count: u32,
    string_table_size: u32,
    reserved: u32,
}

#[derive(BinRead, BinWrite, Clone, Copy)]
#[brw(little)]
struct RawEntry {
    offset: u64,
    size: u64,
    string_table_offset: u32,
    hash_size: u32,
    reserved: u64,
    hash: [u8; 0x20],
}

#[derive(Debug, Clone)]
pub struct Hfs0Entry {
    pub name: String,
    pub offset: u64,
    pub size: u64,
    pub hash_size: u32,
    pub hash: [u8; 0x20],
}

#[derive(Debug, Clone)]
pub struct Hfs0 {
    pub entries: Vec<Hfs0Entry>,
}

impl Hfs0 {
    pub fn parse(data: &[u8]) -> Result<Self, Hfs0Error> {
        if data.len() < 4 || data[0..4] != MAGIC {
            return InvalidMagicSnafu.fail();
        }
        let mut cursor = std::io::Cursor::new(data);
        let header = Header::read(&mut cursor).context(BinrwSnafu)?;

        let mut raw_entries = Vec::with_capacity(header.file_count as usize);
        for _ in 0..header.file_count {
            raw_entries.push(RawEntry::read(&mut cursor).context(BinrwSnafu)?);
        }

        let string_table_start = cursor.position() as usize;
        let string_table_end = string_table_start + header.string_table_size as usize;
        let string_table = &data[string_table_start..string_table_end];
        let data_start = string_table_end;

        let entries = raw_entries
            .into_iter()
            .map(|raw| {
                let name_start = raw.string_table_offset as usize;
                let name_end = string_table[name_start..]
                    .iter()
                    .position(|&b| b == 0)
                    .map(|i| name_start + i)
                    .unwrap_or(string_table.len());
                let name = String::from_utf8_lossy(&string_table[name_start..name_end]).into_owned();
                Hfs0Entry {
                    name,
                    offset: data_start as u64 + raw.offset,
                    size: raw.size,
                    hash_size: raw.hash_size,
                    hash: raw.hash,
                }
            })
            .collect();

        Ok(Hfs0 { entries })
    }

    pub fn file_data<'a>(&self, container: &'a [u8], name: &str) -> Option<&'a [u8]> {
        let entry = self.entries.iter().find(|e| e.name == name)?;
        let start = entry.offset as usize;
        let end = start + entry.size as usize;
        container.get(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::pfs0::{build_pfs0, Pfs0File};

    #[test]
    fn rejects_wrong_magic() {
        let data = build_pfs0(&[Pfs0File::new("a", b"b".to_vec())]);
        assert!(Hfs0::parse(&data).is_err());
    }
}
