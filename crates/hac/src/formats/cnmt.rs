//! CNMT: the content-metadata record table packaged into the Meta NCA,
//! listing the hash/id/size/type of every other NCA in the package.

use crate::brw_utils::{read_u48, write_u48};
use binrw::{BinRead, BinWrite};
use std::io::Cursor;

pub const META_TYPE_APPLICATION: u8 = 0x80;
const EXTENDED_HEADER_SIZE: u16 = 0x10;
const PATCH_TITLE_ID_DELTA: u64 = 0x800;

/// One content record: the full NCA hash, its first-16-bytes-as-id, size,
/// and type/id_offset tag.
#[derive(BinRead, BinWrite, Clone, Copy, Debug)]
#[brw(little)]
pub struct ContentRecord {
    pub hash: [u8; 0x20],
    pub nca_id: [u8; 0x10],
    #[br(parse_with = read_u48)]
    #[bw(write_with = write_u48)]
    pub size: u64,
    pub content_type: u8,
    pub id_offset: u8,
}

impl ContentRecord {
    pub fn new(hash: [u8; 0x20], size: u64, content_type: u8, id_offset: u8) -> Self {
        let mut nca_id = [0u8; 0x10];
        nca_id.copy_from_slice(&hash[..0x10]);
        Self {
            hash,
            nca_id,
            size,
            content_type,
            id_offset,
        }
    }
}

/// Serializes the CNMT record for a package: header, extended application
/// header (carrying `patchTitleId = titleId + 0x800`), content records, and
/// a trailing zeroed digest.
pub fn build_cnmt(title_id: u64, title_version: u32, records: &[ContentRecord]) -> Vec<u8> {
    let mut out = vec![0u8; 0x30];
    out[0x00..0x08].copy_from_slice(&title_id.to_le_bytes());
    out[0x08..0x0C].copy_from_slice(&title_version.to_le_bytes());
    out[0x0C] = META_TYPE_APPLICATION;
    out[0x0E..0x10].copy_from_slice(&EXTENDED_HEADER_SIZE.to_le_bytes());
    out[0x10..0x12].copy_from_slice(&(records.len() as u16).to_le_bytes());

    out.resize(0x20, 0);
    let patch_title_id = title_id.wrapping_add(PATCH_TITLE_ID_DELTA);
    out[0x20..0x28].copy_from_slice(&patch_title_id.to_le_bytes());
    out.resize(0x30, 0);

    let mut cursor = Cursor::new(&mut out);
    std::io::Seek::seek(&mut cursor, std::io::SeekFrom::End(0)).unwrap();
    for record in records {
        record.write(&mut cursor).expect("writing to a Vec cannot fail");
    }
    drop(cursor);

    out.extend_from_slice(&[0u8; 0x20]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_program_record_layout() {
        let hash = {
            let mut h = [0u8; 0x20];
            for (i, b) in h.iter_mut().enumerate() {
                *b = i as u8;
            }
            h
        };
        let record = ContentRecord::new(hash, 0x100000, 1, 0);
        let cnmt = build_cnmt(0x0100000000001000, 0, &[record]);

        assert_eq!(&cnmt[0x00..0x08], &0x0100000000001000u64.to_le_bytes());
        assert_eq!(cnmt[0x0C], META_TYPE_APPLICATION);
        assert_eq!(u16::from_le_bytes(cnmt[0x0E..0x10].try_into().unwrap()), 0x10);
        assert_eq!(u16::from_le_bytes(cnmt[0x10..0x12].try_into().unwrap()), 1);
        assert_eq!(&cnmt[0x20..0x28], &0x0100000000001800u64.to_le_bytes());

        let record_base = 0x30;
        assert_eq!(&cnmt[record_base..record_base + 0x20], &hash[..]);
        assert_eq!(&cnmt[record_base + 0x20..record_base + 0x30], &hash[..0x10]);
        assert_eq!(&cnmt[record_base + 0x30..record_base + 0x34], &[0x00, 0x00, 0x10, 0x00]);
        assert_eq!(&cnmt[record_base + 0x34..record_base + 0x36], &[0x00, 0x00]);
        assert_eq!(cnmt[record_base + 0x36], 1);
        assert_eq!(cnmt[record_base + 0x37], 0);

        assert_eq!(cnmt.len(), 0x30 + 0x38 + 0x20);
        assert_eq!(&cnmt[cnmt.len() - 0x20..], &[0u8; 0x20][..]);
    }

    #[test]
    fn size_round_trips_up_to_48_bits() {
        for size in [0u64, 1, 0xFFFF, 0x1_0000_0000, (1u64 << 48) - 1] {
            let record = ContentRecord::new([0u8; 0x20], size, 0, 0);
            let cnmt = build_cnmt(0x0100000000001000, 0, &[record]);
            let low = u32::from_le_bytes(cnmt[0x60..0x64].try_into().unwrap()) as u64;
            let high = u16::from_le_bytes(cnmt[0x64..0x66].try_into().unwrap()) as u64;
            assert_eq!((high << 32) | low, size);
        }
    }
}
