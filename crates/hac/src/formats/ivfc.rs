//! IVFC: a six-level SHA-256 Merkle tree built bottom-up over data already
//! aligned to 0x4000, used as the RomFS section's integrity superblock.

use crate::crypto::sha256;

pub const MAGIC: [u8; 4] = *b"IVFC";
const ID: u32 = 0x20000;
const MASTER_HASH_SIZE: u32 = 0x20;
const NUM_LEVELS: u32 = 7;
const NUM_HASH_LEVELS: usize = 6;
const BLOCK_SIZE: usize = 0x4000;
const BLOCK_SIZE_LOG2: u32 = 0x0E;
pub const HEADER_SIZE: usize = 0xE0;

fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) / alignment * alignment
}

fn hash_level(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(align_up(input.len(), BLOCK_SIZE) / BLOCK_SIZE * 0x20);
    for chunk in input.chunks(BLOCK_SIZE) {
        if chunk.len() == BLOCK_SIZE {
            out.extend_from_slice(&sha256(chunk));
        } else {
            let mut padded = vec![0u8; BLOCK_SIZE];
            padded[..chunk.len()].copy_from_slice(chunk);
            out.extend_from_slice(&sha256(&padded));
        }
    }
    out
}

fn pad_to_block(mut data: Vec<u8>) -> Vec<u8> {
    let padded_len = align_up(data.len(), BLOCK_SIZE);
    data.resize(padded_len, 0);
    data
}

/// One built IVFC tree: the `0xE0`-byte header plus the five intermediate
/// hash levels (level 6, the data itself, is the caller's input and is not
/// duplicated here).
pub struct IvfcTree {
    pub header: [u8; HEADER_SIZE],
    /// Top-down: level 1 (closest to the master hash) first, level 5 last.
    pub hash_levels: Vec<Vec<u8>>,
    pub data_len: u64,
}

/// Builds the six-level hash tree over `data` (already 0x4000-aligned by
/// the caller, per the data region's own layout rules).
pub fn build_ivfc(data: &[u8]) -> IvfcTree {
    // Level 6 is `data` itself. Levels 5..1 are produced bottom-up, each
    // padded to a 0x4000 multiple before becoming the input to the level
    // above it.
    let mut levels_bottom_up = Vec::with_capacity(NUM_HASH_LEVELS - 1);
    let mut current = pad_to_block(data.to_vec());
    for _ in 0..NUM_HASH_LEVELS - 1 {
        let level = hash_level(&current);
        current = pad_to_block(level.clone());
        levels_bottom_up.push(level);
    }
    // levels_bottom_up[0] = level5 ... [4] = level1
    let mut hash_levels_top_down = levels_bottom_up;
    hash_levels_top_down.reverse();
    // hash_levels_top_down[0] = level1 ... [4] = level5

    let master_hash = sha256(&pad_to_block(hash_levels_top_down[0].clone()));

    let mut logical_offset = 0u64;
    let mut level_descriptors = Vec::with_capacity(NUM_LEVELS as usize);
    for level in &hash_levels_top_down {
        let hash_data_size = align_up(level.len(), BLOCK_SIZE) as u64;
        level_descriptors.push((logical_offset, hash_data_size));
        logical_offset += hash_data_size;
    }
    level_descriptors.push((logical_offset, data.len() as u64));

    let mut header = [0u8; HEADER_SIZE];
    header[0x00..0x04].copy_from_slice(&MAGIC);
    header[0x04..0x08].copy_from_slice(&ID.to_le_bytes());
    header[0x08..0x0C].copy_from_slice(&MASTER_HASH_SIZE.to_le_bytes());
    header[0x0C..0x10].copy_from_slice(&NUM_LEVELS.to_le_bytes());
    for (i, (offset, size)) in level_descriptors.iter().enumerate() {
        let base = 0x10 + i * 0x18;
        header[base..base + 8].copy_from_slice(&offset.to_le_bytes());
        header[base + 8..base + 16].copy_from_slice(&size.to_le_bytes());
        header[base + 16..base + 20].copy_from_slice(&BLOCK_SIZE_LOG2.to_le_bytes());
    }
    header[0xC0..0xE0].copy_from_slice(&master_hash);

    IvfcTree {
        header,
        hash_levels: hash_levels_top_down,
        data_len: data.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_hash_is_sha256_of_padded_level_one() {
        let data = vec![0xABu8; BLOCK_SIZE * 3];
        let tree = build_ivfc(&data);
        let expected = sha256(&pad_to_block(tree.hash_levels[0].clone()));
        assert_eq!(&tree.header[0xC0..0xE0], &expected[..]);
    }

    #[test]
    fn header_fields() {
        let data = vec![0u8; BLOCK_SIZE];
        let tree = build_ivfc(&data);
        assert_eq!(&tree.header[0x00..0x04], b"IVFC");
        assert_eq!(u32::from_le_bytes(tree.header[0x04..0x08].try_into().unwrap()), ID);
        assert_eq!(
            u32::from_le_bytes(tree.header[0x0C..0x10].try_into().unwrap()),
            NUM_LEVELS
        );
        let last_base = 0x10 + 6 * 0x18;
        let last_size = u64::from_le_bytes(header_slice(&tree.header, last_base, 8).try_into().unwrap());
        assert_eq!(last_size, data.len() as u64);
    }

    fn header_slice(header: &[u8; HEADER_SIZE], offset: usize, len: usize) -> &[u8] {
        &header[offset..offset + len]
    }

    #[test]
    fn small_data_produces_five_levels() {
        let data = vec![1u8; 10];
        let tree = build_ivfc(&data);
        assert_eq!(tree.hash_levels.len(), 5);
        assert_eq!(tree.data_len, 10);
    }
}
