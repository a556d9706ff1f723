//! NCA assembler: composes section bodies and header fields into a signed,
//! encrypted content archive. The header field offsets below mirror the
//! binary layout a decoder would expect (see the module doc for the
//! corresponding reader-side struct this was derived from).

use crate::crypto::{CryptoBackend, CryptoError};
use crate::formats::ivfc::build_ivfc;
use crate::formats::pfs0::{calculate_pfs0_master_hash, create_pfs0_hash_table};
use snafu::Snafu;

pub const CONTENT_TYPE_PROGRAM: u8 = 0;
pub const CONTENT_TYPE_META: u8 = 1;
pub const CONTENT_TYPE_CONTROL: u8 = 2;
pub const CONTENT_TYPE_MANUAL: u8 = 3;

const NCA_MAGIC: [u8; 4] = *b"NCA3";
const HEADER_SIZE: usize = 0x400;
const FS_HEADER_SIZE: usize = 0x200;
const ENVELOPE_HEADER_SIZE: usize = 0xC00;
const MEDIA_UNIT_SIZE: u64 = 0x200;

pub const CRYPT_TYPE_NONE: u8 = 1;
pub const CRYPT_TYPE_CTR: u8 = 3;

#[derive(Snafu, Debug)]
pub enum NcaBuildError {
    #[snafu(display("NCA must have at least one, and at most 4, sections"))]
    InvalidSectionCount,
    #[snafu(display("crypto backend error during NCA assembly: {source}"))]
    Crypto { source: CryptoError },
}

fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) / alignment * alignment
}

/// One section's logical content, before placement/encryption.
pub enum NcaSectionInput {
    /// A PFS0 archive, hashed in fixed-size blocks (ExeFS=0x10000,
    /// Logo/Meta=0x1000).
    Pfs0 { pfs0: Vec<u8>, block_size: u32, crypt_type: u8 },
    /// A RomFS image, hashed via a six-level IVFC tree.
    RomFs { data: Vec<u8>, crypt_type: u8 },
}

impl NcaSectionInput {
    fn crypt_type(&self) -> u8 {
        match self {
            NcaSectionInput::Pfs0 { crypt_type, .. } => *crypt_type,
            NcaSectionInput::RomFs { crypt_type, .. } => *crypt_type,
        }
    }
}

pub struct NcaBuildOptions {
    pub content_type: u8,
    pub key_generation: u8,
    /// The plaintext per-content AES-CTR key placed in the key area and
    /// used to encrypt section bodies.
    pub content_key: [u8; 0x10],
    /// The key-area encryption key (wraps `content_key` inside the NCA).
    pub key_area_encryption_key: [u8; 0x10],
    pub header_key: [u8; 0x20],
    pub title_id: u64,
    pub sdk_version: u32,
    pub sign: bool,
    pub plaintext: bool,
}

struct BuiltSection {
    data: Vec<u8>,
    fs_header: [u8; FS_HEADER_SIZE],
    crypt_type: u8,
}

fn build_pfs0_section(pfs0: &[u8], block_size: u32, crypt_type: u8) -> BuiltSection {
    let hash_table = create_pfs0_hash_table(pfs0, block_size as usize);
    let master_hash = calculate_pfs0_master_hash(&hash_table, hash_table.len());

    let mut data = hash_table;
    data.extend_from_slice(pfs0);

    let mut fs_header = [0u8; FS_HEADER_SIZE];
    fs_header[0x00..0x02].copy_from_slice(&2u16.to_le_bytes());
    fs_header[0x02] = 1; // fs_type = Pfs0
    fs_header[0x03] = 2; // hash_type = Sha256
    fs_header[0x04] = crypt_type;

    fs_header[0x08..0x28].copy_from_slice(&master_hash);
    fs_header[0x28..0x2C].copy_from_slice(&block_size.to_le_bytes());
    fs_header[0x2C..0x30].copy_from_slice(&2u32.to_le_bytes());
    // level_info[0] = hash table region
    fs_header[0x30..0x38].copy_from_slice(&0u64.to_le_bytes());
    fs_header[0x38..0x40].copy_from_slice(&(hash_table.len() as u64).to_le_bytes());
    // level_info[1] = pfs0 data region
    let pfs0_offset = hash_table.len() as u64;
    fs_header[0x40..0x48].copy_from_slice(&pfs0_offset.to_le_bytes());
    fs_header[0x48..0x50].copy_from_slice(&(pfs0.len() as u64).to_le_bytes());

    BuiltSection { data, fs_header, crypt_type }
}

fn build_romfs_section(romfs: &[u8], crypt_type: u8) -> BuiltSection {
    let padded_len = align_up(romfs.len() as u64, 0x4000) as usize;
    let mut padded = romfs.to_vec();
    padded.resize(padded_len, 0);
    let tree = build_ivfc(&padded);

    let mut data = Vec::new();
    for level in &tree.hash_levels {
        data.extend_from_slice(level);
    }
    data.extend_from_slice(romfs);

    let mut fs_header = [0u8; FS_HEADER_SIZE];
    fs_header[0x00..0x02].copy_from_slice(&2u16.to_le_bytes());
    fs_header[0x02] = 0; // fs_type = Romfs
    fs_header[0x03] = 3; // hash_type = Ivfc
    fs_header[0x04] = crypt_type;
    fs_header[0x08..0x08 + 0xE0].copy_from_slice(&tree.header);

    BuiltSection { data, fs_header, crypt_type }
}

/// Assembles a complete NCA envelope: section composition, header fields,
/// section hashes, RSA signature, key-area/section/header encryption.
pub fn assemble_nca(
    sections: &[NcaSectionInput],
    opts: &NcaBuildOptions,
    crypto: &dyn CryptoBackend,
) -> Result<Vec<u8>, NcaBuildError> {
    if sections.is_empty() || sections.len() > 4 {
        return InvalidSectionCountSnafu.fail();
    }

    tracing::debug!(
        content_type = opts.content_type,
        section_count = sections.len(),
        key_generation = opts.key_generation,
        "assembling NCA",
    );

    let built: Vec<BuiltSection> = sections
        .iter()
        .map(|s| match s {
            NcaSectionInput::Pfs0 { pfs0, block_size, .. } => build_pfs0_section(pfs0, *block_size, s.crypt_type()),
            NcaSectionInput::RomFs { data, .. } => build_romfs_section(data, s.crypt_type()),
        })
        .collect();

    let mut section_offsets = Vec::with_capacity(built.len());
    let mut cursor = ENVELOPE_HEADER_SIZE as u64;
    for section in &built {
        let padded_size = align_up(section.data.len() as u64, MEDIA_UNIT_SIZE);
        section_offsets.push((cursor, padded_size));
        cursor += padded_size;
    }
    let total_size = cursor;

    let mut envelope = vec![0u8; total_size as usize];
    for (section, (offset, _)) in built.iter().zip(&section_offsets) {
        envelope[*offset as usize..*offset as usize + section.data.len()].copy_from_slice(&section.data);
    }

    envelope[0x200..0x204].copy_from_slice(&NCA_MAGIC);
    envelope[0x204] = 0; // distribution = Download
    envelope[0x205] = opts.content_type;
    envelope[0x206] = if opts.key_generation == 1 { 0 } else { 2 };
    envelope[0x207] = 0; // key_area_key_index
    envelope[0x208..0x210].copy_from_slice(&total_size.to_le_bytes());
    envelope[0x210..0x218].copy_from_slice(&opts.title_id.to_le_bytes());
    envelope[0x21C..0x220].copy_from_slice(&opts.sdk_version.to_le_bytes());
    envelope[0x220] = if opts.key_generation > 2 { opts.key_generation } else { 0 };

    for (i, (offset, padded_size)) in section_offsets.iter().enumerate() {
        let base = 0x240 + i * 0x10;
        let start_media = (offset / MEDIA_UNIT_SIZE) as u32;
        let end_media = ((offset + padded_size) / MEDIA_UNIT_SIZE) as u32;
        envelope[base..base + 4].copy_from_slice(&start_media.to_le_bytes());
        envelope[base + 4..base + 8].copy_from_slice(&end_media.to_le_bytes());
        envelope[base + 8] = 1;
    }

    for (i, section) in built.iter().enumerate() {
        let fs_header_base = HEADER_SIZE + i * FS_HEADER_SIZE;
        let mut fs_header = section.fs_header;
        fs_header[0x04] = section.crypt_type;
        fs_header[0x140..0x148].copy_from_slice(&(i as u64).to_le_bytes());
        envelope[fs_header_base..fs_header_base + FS_HEADER_SIZE].copy_from_slice(&fs_header);
    }

    for i in 0..built.len() {
        let fs_header_base = HEADER_SIZE + i * FS_HEADER_SIZE;
        let hash = crypto.sha256(&envelope[fs_header_base..fs_header_base + FS_HEADER_SIZE]);
        envelope[0x280 + i * 0x20..0x280 + (i + 1) * 0x20].copy_from_slice(&hash);
    }

    envelope[0x320..0x330].copy_from_slice(&opts.content_key);

    if opts.sign {
        let signature = crypto
            .rsa_pss_sign(&envelope[0x200..0x400])
            .map_err(|source| NcaBuildError::Crypto { source })?;
        envelope[0x100..0x200].copy_from_slice(&signature);
    }

    if !opts.plaintext {
        for (i, (offset, padded_size)) in section_offsets.iter().enumerate() {
            if built[i].crypt_type != CRYPT_TYPE_CTR {
                continue;
            }
            let mut ctr = [0u8; 0x10];
            let section_ctr_bytes = (i as u64).to_le_bytes();
            for (dst, src) in ctr[0..8].iter_mut().zip(section_ctr_bytes.iter().rev()) {
                *dst = *src;
            }
            ctr[8..16].copy_from_slice(&(offset / 16).to_be_bytes());

            let end = (*offset + *padded_size) as usize;
            crypto.aes_ctr(&opts.content_key, &mut envelope[*offset as usize..end], &ctr);
        }

        crypto
            .aes_ecb_encrypt(&opts.key_area_encryption_key, &mut envelope[0x300..0x340])
            .map_err(|source| NcaBuildError::Crypto { source })?;

        crypto
            .aes_xts_encrypt(&opts.header_key, &mut envelope[0..ENVELOPE_HEADER_SIZE], 0x200, 0)
            .map_err(|source| NcaBuildError::Crypto { source })?;
    }

    Ok(envelope)
}

/// SHA-256 of the full envelope, and the lowercase-hex NCA id derived from
/// its first 16 bytes.
pub fn nca_hash_and_id(envelope: &[u8], crypto: &dyn CryptoBackend) -> ([u8; 0x20], String) {
    let hash = crypto.sha256(envelope);
    let id = hex::encode(&hash[..0x10]);
    tracing::info!(nca_id = %id, size = envelope.len(), "assembled NCA");
    (hash, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DefaultCryptoBackend;
    use crate::formats::pfs0::{build_pfs0, Pfs0File};

    fn test_opts() -> NcaBuildOptions {
        NcaBuildOptions {
            content_type: CONTENT_TYPE_CONTROL,
            key_generation: 1,
            content_key: [0x11; 0x10],
            key_area_encryption_key: [0x22; 0x10],
            header_key: [0x33; 0x20],
            title_id: 0x0100000000001000,
            sdk_version: 0x000C1100,
            sign: true,
            plaintext: false,
        }
    }

    #[test]
    fn assembles_single_pfs0_section() {
        let pfs0 = build_pfs0(&[Pfs0File::new("a", b"hello".to_vec())]);
        let sections = vec![NcaSectionInput::Pfs0 {
            pfs0,
            block_size: 0x1000,
            crypt_type: CRYPT_TYPE_NONE,
        }];
        let envelope = assemble_nca(&sections, &test_opts(), &DefaultCryptoBackend).unwrap();
        assert_eq!(envelope.len() % 0x200, 0);
        assert!(envelope.len() >= ENVELOPE_HEADER_SIZE);
    }

    #[test]
    fn total_size_is_header_plus_padded_sections() {
        let pfs0 = build_pfs0(&[Pfs0File::new("a", vec![0u8; 5000])]);
        let sections = vec![NcaSectionInput::Pfs0 {
            pfs0,
            block_size: 0x1000,
            crypt_type: CRYPT_TYPE_NONE,
        }];
        let envelope = assemble_nca(&sections, &test_opts(), &DefaultCryptoBackend).unwrap();
        assert_eq!(envelope.len() % 0x200, 0);
    }

    #[test]
    fn plaintext_skips_encryption_but_keeps_layout() {
        let pfs0 = build_pfs0(&[Pfs0File::new("a", b"hi".to_vec())]);
        let sections = vec![NcaSectionInput::Pfs0 {
            pfs0,
            block_size: 0x1000,
            crypt_type: CRYPT_TYPE_NONE,
        }];
        let mut opts = test_opts();
        opts.plaintext = true;
        opts.sign = false;
        let envelope = assemble_nca(&sections, &opts, &DefaultCryptoBackend).unwrap();
        assert_eq!(&envelope[0x200..0x204], b"NCA3");
    }

    #[test]
    fn rejects_too_many_sections() {
        let sections: Vec<_> = (0..5)
            .map(|_| NcaSectionInput::Pfs0 {
                pfs0: build_pfs0(&[]),
                block_size: 0x1000,
                crypt_type: CRYPT_TYPE_NONE,
            })
            .collect();
        assert!(matches!(
            assemble_nca(&sections, &test_opts(), &DefaultCryptoBackend),
            Err(NcaBuildError::InvalidSectionCount)
        ));
    }
}
