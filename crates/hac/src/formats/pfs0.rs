//! PFS0 ("Partition FileSystem 0"): a flat archive of named byte blobs,
//! optionally preceded by a SHA-256 hash table over fixed-size blocks of the
//! archive (the form NCA PFS0 sections use).

use crate::crypto::sha256;
use binrw::{BinRead, BinWrite};
use num_integer::Integer;
use std::io::Cursor;

pub const MAGIC: [u8; 4] = *b"PFS0";

/// One named byte blob, in insertion order.
#[derive(Clone)]
pub struct Pfs0File {
    pub name: String,
    pub data: Vec<u8>,
}

impl Pfs0File {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[derive(BinRead, BinWrite)]
#[brw(little, magic = b"PFS0")]
struct Header {
    file_count: u32,
    string_table_size: u32,
    reserved: u32,
}

#[derive(BinRead, BinWrite)]
#[brw(little)]
struct FileEntry {
    offset: u64,
    size: u64,
    string_table_offset: u32,
    reserved: u32,
}

fn align_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) / alignment * alignment
}

/// Builds a PFS0 archive: header, file entry table, string table (padded to
/// 0x20), then the concatenated file data with no per-file padding.
pub fn build_pfs0(files: &[Pfs0File]) -> Vec<u8> {
    let string_table_raw: u32 = files.iter().map(|f| f.name.len() as u32 + 1).sum();
    let string_table_size = align_up(string_table_raw, 0x20);

    let header = Header {
        file_count: files.len() as u32,
        string_table_size,
        reserved: 0,
    };

    let mut out = Cursor::new(Vec::new());
    header.write(&mut out).expect("writing to a Vec cannot fail");

    let mut data_offset = 0u64;
    let mut string_offset = 0u32;
    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        entries.push(FileEntry {
            offset: data_offset,
            size: file.data.len() as u64,
            string_table_offset: string_offset,
            reserved: 0,
        });
        data_offset += file.data.len() as u64;
        string_offset += file.name.len() as u32 + 1;
    }
    for entry in &entries {
        entry.write(&mut out).expect("writing to a Vec cannot fail");
    }

    let mut string_table = Vec::with_capacity(string_table_size as usize);
    for file in files {
        string_table.extend_from_slice(file.name.as_bytes());
        string_table.push(0);
    }
    string_table.resize(string_table_size as usize, 0);
    std::io::Write::write_all(&mut out, &string_table).expect("writing to a Vec cannot fail");

    for file in files {
        std::io::Write::write_all(&mut out, &file.data).expect("writing to a Vec cannot fail");
    }

    out.into_inner()
}

/// Builds a SHA-256 hash table over fixed-size blocks of `pfs0_bytes`
/// (zero-padding the final partial block before hashing), padded up to a
/// multiple of 0x200.
pub fn create_pfs0_hash_table(pfs0_bytes: &[u8], block_size: usize) -> Vec<u8> {
    let num_blocks = Integer::div_ceil(&pfs0_bytes.len(), &block_size);
    let mut table = Vec::with_capacity(num_blocks * 0x20);
    for i in 0..num_blocks {
        let start = i * block_size;
        let end = std::cmp::min(start + block_size, pfs0_bytes.len());
        let mut block = vec![0u8; block_size];
        block[..end - start].copy_from_slice(&pfs0_bytes[start..end]);
        table.extend_from_slice(&sha256(&block));
    }
    let padded_len = align_up(table.len() as u32, 0x200) as usize;
    table.resize(padded_len, 0);
    table
}

/// `SHA-256(hashTable[0..hashTableSize])`, excluding any padding.
pub fn calculate_pfs0_master_hash(hash_table: &[u8], hash_table_size: usize) -> [u8; 0x20] {
    sha256(&hash_table[..hash_table_size])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_file_layout() {
        let files = vec![Pfs0File::new("hello.txt", b"hello".to_vec())];
        let pfs0 = build_pfs0(&files);

        assert_eq!(&pfs0[0..4], b"PFS0");
        assert_eq!(u32::from_le_bytes(pfs0[4..8].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(pfs0[8..12].try_into().unwrap()), 0x20);

        let entry_offset = 0x10;
        assert_eq!(
            u64::from_le_bytes(pfs0[entry_offset..entry_offset + 8].try_into().unwrap()),
            0
        );
        assert_eq!(
            u64::from_le_bytes(
                pfs0[entry_offset + 8..entry_offset + 16]
                    .try_into()
                    .unwrap()
            ),
            5
        );
        assert_eq!(
            u32::from_le_bytes(
                pfs0[entry_offset + 16..entry_offset + 20]
                    .try_into()
                    .unwrap()
            ),
            0
        );

        let string_table_offset = 0x10 + 0x18;
        assert_eq!(
            &pfs0[string_table_offset..string_table_offset + 10],
            b"hello.txt\0"
        );
        for &b in &pfs0[string_table_offset + 10..string_table_offset + 0x20] {
            assert_eq!(b, 0);
        }

        let data_offset = string_table_offset + 0x20;
        assert_eq!(&pfs0[data_offset..data_offset + 5], b"hello");
        assert_eq!(pfs0.len(), data_offset + 5);
    }

    #[test]
    fn hash_table_master_hash() {
        let data = vec![0x42u8; 0x100];
        let table = create_pfs0_hash_table(&data, 0x40);
        assert_eq!(table.len() % 0x200, 0);

        let expected_blocks = Integer::div_ceil(&data.len(), &0x40usize);
        let expected_size = expected_blocks * 0x20;
        let master = calculate_pfs0_master_hash(&table, expected_size);

        let mut concatenated = Vec::new();
        for chunk in data.chunks(0x40) {
            concatenated.extend_from_slice(&sha256(chunk));
        }
        assert_eq!(master, sha256(&concatenated));
    }
}
