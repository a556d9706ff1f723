//! NCZ stream decoder: parses the NCZ section table, drives zstd
//! decompression (block-indexed or single-stream), and re-encrypts each
//! decompressed region with its owning section's AES-CTR key as it is
//! pushed into the caller's sink.

use crate::crypto::CryptoBackend;
use crate::sink::{Sink, SinkError};
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use std::io::Read;

const NCA_HEADER_SIZE: usize = 0x4000;
const SECTION_MAGIC: [u8; 8] = *b"NCZESECT";
const SECTION_RECORD_SIZE: usize = 0x40;
const BLOCK_MAGIC: [u8; 8] = *b"NCZBLOCK";
const BLOCK_PROBE_SIZE: usize = 24;
const BLOCK_EXPONENT_MIN: u8 = 14;
const BLOCK_EXPONENT_MAX: u8 = 32;
const STREAM_FLUSH_BUFFER_SIZE: usize = 512 * 1024;

#[derive(Snafu, Debug)]
pub enum NczError {
    #[snafu(display("not an NCZ file: missing NCZESECT magic"))]
    NotNcz,
    #[snafu(display("NCZ input is truncated"))]
    Truncated,
    #[snafu(display("invalid NCZ block size exponent {exponent}, must be in 14..=32"))]
    InvalidBlockSizeExponent { exponent: u8 },
    #[snafu(display("invalid NCZ block version {version}, must be 2"))]
    InvalidBlockVersion { version: u8 },
    #[snafu(display("invalid NCZ block type {block_type}, must be 1"))]
    InvalidBlockType { block_type: u8 },
    #[snafu(display("no NCZ section covers NCA offset {offset:#x}"))]
    NoSectionForOffset { offset: u64 },
    #[snafu(display("zstd decompression failed: {source}"))]
    Zstd { source: std::io::Error },
    #[snafu(display("sink rejected a write: {source}"))]
    Sink { source: SinkError },
}

#[derive(Debug, Clone)]
pub struct NczSection {
    pub offset: u64,
    pub size: u64,
    pub crypto_type: u64,
    pub key: [u8; 0x10],
    pub counter: [u8; 0x10],
}

#[derive(Debug, Clone)]
pub struct NczBlockHeader {
    pub version: u8,
    pub block_type: u8,
    pub block_size_exponent: u8,
    pub block_count: u32,
    pub decompressed_size: u64,
}

#[derive(Debug)]
pub struct NczDecodeResult {
    pub nca_size: u64,
    pub sections: Vec<NczSection>,
    pub block_header: Option<NczBlockHeader>,
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap())
}

fn parse_sections(source: &[u8]) -> Result<(Vec<NczSection>, usize), NczError> {
    ensure!(source.len() >= NCA_HEADER_SIZE + 16, TruncatedSnafu);
    ensure!(source[NCA_HEADER_SIZE..NCA_HEADER_SIZE + 8] == SECTION_MAGIC, NotNczSnafu);
    let section_count = read_u64(source, NCA_HEADER_SIZE + 8) as usize;

    let table_start = NCA_HEADER_SIZE + 16;
    let table_end = table_start + section_count * SECTION_RECORD_SIZE;
    ensure!(source.len() >= table_end, TruncatedSnafu);

    let mut sections = Vec::with_capacity(section_count);
    for i in 0..section_count {
        let base = table_start + i * SECTION_RECORD_SIZE;
        let offset = read_u64(source, base);
        let size = read_u64(source, base + 8);
        let crypto_type = read_u64(source, base + 16);
        let mut key = [0u8; 0x10];
        key.copy_from_slice(&source[base + 32..base + 48]);
        let mut counter = [0u8; 0x10];
        counter.copy_from_slice(&source[base + 48..base + 64]);
        sections.push(NczSection {
            offset,
            size,
            crypto_type,
            key,
            counter,
        });
    }

    Ok((sections, table_end))
}

enum Payload {
    Block {
        header: NczBlockHeader,
        compressed_sizes: Vec<u32>,
        data_start: usize,
    },
    Stream {
        data_start: usize,
    },
}

fn parse_payload(source: &[u8], table_end: usize) -> Result<Payload, NczError> {
    ensure!(source.len() >= table_end + BLOCK_PROBE_SIZE, TruncatedSnafu);
    let probe = &source[table_end..table_end + BLOCK_PROBE_SIZE];

    if probe[0..8] != BLOCK_MAGIC {
        return Ok(Payload::Stream { data_start: table_end });
    }

    let version = probe[8];
    let block_type = probe[9];
    let block_size_exponent = probe[11];
    ensure!(version == 2, InvalidBlockVersionSnafu { version });
    ensure!(block_type == 1, InvalidBlockTypeSnafu { block_type });
    ensure!(
        (BLOCK_EXPONENT_MIN..=BLOCK_EXPONENT_MAX).contains(&block_size_exponent),
        InvalidBlockSizeExponentSnafu { exponent: block_size_exponent }
    );
    let block_count = u32::from_le_bytes(probe[12..16].try_into().unwrap());
    let decompressed_size = read_u64(probe, 16);

    let sizes_start = table_end + BLOCK_PROBE_SIZE;
    let sizes_end = sizes_start + block_count as usize * 4;
    ensure!(source.len() >= sizes_end, TruncatedSnafu);
    let compressed_sizes: Vec<u32> = source[sizes_start..sizes_end]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect();

    Ok(Payload::Block {
        header: NczBlockHeader {
            version,
            block_type,
            block_size_exponent,
            block_count,
            decompressed_size,
        },
        compressed_sizes,
        data_start: sizes_end,
    })
}

fn reencrypt(mut buf: &mut [u8], mut offset: u64, sections: &[NczSection], crypto: &dyn CryptoBackend) -> Result<(), NczError> {
    while !buf.is_empty() {
        let section = sections
            .iter()
            .find(|s| s.offset <= offset && offset < s.offset + s.size)
            .context(NoSectionForOffsetSnafu { offset })?;
        let chunk_len = std::cmp::min(section.offset + section.size - offset, buf.len() as u64) as usize;
        let (chunk, rest) = buf.split_at_mut(chunk_len);
        if section.crypto_type >= 3 {
            let mut ctr = [0u8; 0x10];
            ctr[0..8].copy_from_slice(&section.counter[0..8]);
            ctr[8..16].copy_from_slice(&(offset / 16).to_be_bytes());
            crypto.aes_ctr(&section.key, chunk, &ctr);
        }
        offset += chunk_len as u64;
        buf = rest;
    }
    Ok(())
}

/// Decompresses and re-encrypts an NCZ file, streaming the reconstructed
/// NCA bytes into `sink` in strictly increasing offset order.
pub fn decompress_ncz(source: &[u8], sink: &mut dyn Sink, crypto: &dyn CryptoBackend) -> Result<NczDecodeResult, NczError> {
    ensure!(source.len() >= NCA_HEADER_SIZE, TruncatedSnafu);
    sink.write(&source[0..NCA_HEADER_SIZE]).context(SinkSnafu)?;

    let (sections, table_end) = parse_sections(source)?;
    tracing::debug!(section_count = sections.len(), "parsed NCZ section table");
    let payload = parse_payload(source, table_end)?;

    let mut written: u64 = NCA_HEADER_SIZE as u64;

    let result = match payload {
        Payload::Block {
            header,
            compressed_sizes,
            data_start,
        } => {
            tracing::debug!(
                block_count = header.block_count,
                decompressed_size = header.decompressed_size,
                "NCZ payload is block-mode",
            );
            let block_size = 1u64 << header.block_size_exponent;
            let mut cursor = data_start;
            for (i, &compressed_size) in compressed_sizes.iter().enumerate() {
                let compressed_size = compressed_size as usize;
                let expected_decompressed_size = if i + 1 == compressed_sizes.len() {
                    header.decompressed_size - block_size * i as u64
                } else {
                    block_size
                } as usize;

                ensure!(source.len() >= cursor + compressed_size, TruncatedSnafu);
                let compressed = &source[cursor..cursor + compressed_size];
                cursor += compressed_size;

                let mut block = if compressed_size < expected_decompressed_size {
                    zstd::bulk::decompress(compressed, expected_decompressed_size).context(ZstdSnafu)?
                } else {
                    compressed.to_vec()
                };

                reencrypt(&mut block, written, &sections, crypto)?;
                sink.write(&block).context(SinkSnafu)?;
                written += block.len() as u64;
            }

            NczDecodeResult {
                nca_size: NCA_HEADER_SIZE as u64 + header.decompressed_size,
                sections,
                block_header: Some(header),
            }
        }
        Payload::Stream { data_start } => {
            tracing::debug!("NCZ payload is stream-mode");
            let nca_size = sections.iter().map(|s| s.offset + s.size).max().unwrap_or(written);

            let mut decoder = zstd::stream::read::Decoder::new(&source[data_start..]).context(ZstdSnafu)?;
            let mut buffer = vec![0u8; STREAM_FLUSH_BUFFER_SIZE];
            loop {
                let mut filled = 0;
                while filled < buffer.len() {
                    let read = decoder.read(&mut buffer[filled..]).context(ZstdSnafu)?;
                    if read == 0 {
                        break;
                    }
                    filled += read;
                }
                if filled == 0 {
                    break;
                }
                let chunk = &mut buffer[..filled];
                reencrypt(chunk, written, &sections, crypto)?;
                sink.write(chunk).context(SinkSnafu)?;
                written += filled as u64;
                if filled < buffer.len() {
                    break;
                }
            }

            NczDecodeResult {
                nca_size,
                sections,
                block_header: None,
            }
        }
    };

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DefaultCryptoBackend;
    use crate::sink::VecSink;

    fn build_ncz_stream_mode(nca_header: &[u8; NCA_HEADER_SIZE], section: &NczSection, plaintext: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(nca_header);
        out.extend_from_slice(&SECTION_MAGIC);
        out.extend_from_slice(&1u64.to_le_bytes());

        out.extend_from_slice(&section.offset.to_le_bytes());
        out.extend_from_slice(&section.size.to_le_bytes());
        out.extend_from_slice(&section.crypto_type.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&section.key);
        out.extend_from_slice(&section.counter);

        let compressed = zstd::stream::encode_all(plaintext, 0).unwrap();
        out.extend_from_slice(&compressed);
        out
    }

    #[test]
    fn decodes_stream_mode_with_ctr_reencryption() {
        let nca_header = [0xABu8; NCA_HEADER_SIZE];
        let plaintext = vec![0u8; 0x10000];
        let section = NczSection {
            offset: NCA_HEADER_SIZE as u64,
            size: plaintext.len() as u64,
            crypto_type: 3,
            key: [0x42; 0x10],
            counter: [0x11; 0x10],
        };
        let ncz = build_ncz_stream_mode(&nca_header, &section, &plaintext);

        let mut sink = VecSink::default();
        let result = decompress_ncz(&ncz, &mut sink, &DefaultCryptoBackend).unwrap();

        assert_eq!(result.nca_size, NCA_HEADER_SIZE as u64 + plaintext.len() as u64);
        assert_eq!(&sink.0[0..NCA_HEADER_SIZE], &nca_header[..]);

        let mut expected = plaintext.clone();
        let mut ctr = [0u8; 0x10];
        ctr[0..8].copy_from_slice(&section.counter[0..8]);
        ctr[8..16].copy_from_slice(&0u64.to_be_bytes());
        DefaultCryptoBackend.aes_ctr(&section.key, &mut expected, &ctr);

        assert_eq!(&sink.0[NCA_HEADER_SIZE..], &expected[..]);
    }

    #[test]
    fn rejects_missing_section_magic() {
        let mut data = vec![0u8; NCA_HEADER_SIZE + 16];
        data[NCA_HEADER_SIZE..NCA_HEADER_SIZE + 8].copy_from_slice(b"XXXXXXXX");
        let mut sink = VecSink::default();
        let result = decompress_ncz(&data, &mut sink, &DefaultCryptoBackend);
        assert!(matches!(result, Err(NczError::NotNcz)));
    }
}
