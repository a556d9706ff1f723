use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes128;
use ctr::Ctr128BE;
use rsa::pss::SigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use sha2::Digest;
use snafu::{ResultExt, Snafu};
use std::sync::OnceLock;

#[derive(Snafu, Debug)]
pub enum CryptoError {
    #[snafu(display("data length {len} is not a multiple of the AES block size"))]
    UnalignedBlock { len: usize },
    #[snafu(display("data length {len} is not a multiple of sector size {sector_size}"))]
    UnalignedSector { len: usize, sector_size: usize },
    #[snafu(display("sector size {sector_size} is not a multiple of 16"))]
    InvalidSectorSize { sector_size: usize },
    #[snafu(display("RSA signing failed: {source}"))]
    RsaSign { source: rsa::signature::Error },
    #[snafu(display("RSA key generation failed: {source}"))]
    RsaKeyGen { source: rsa::Error },
}

pub fn aes_ecb_encrypt_block(key: &[u8; 0x10], block: &mut [u8; 0x10]) {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    cipher.encrypt_block(GenericArray::from_mut_slice(block));
}

pub fn aes_ecb_decrypt_block(key: &[u8; 0x10], block: &mut [u8; 0x10]) {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    cipher.decrypt_block(GenericArray::from_mut_slice(block));
}

/// Encrypts `data` in place, block by block. `data.len()` must be a multiple of 16.
pub fn aes_ecb_encrypt(key: &[u8; 0x10], data: &mut [u8]) -> Result<(), CryptoError> {
    if data.len() % 0x10 != 0 {
        return UnalignedBlockSnafu { len: data.len() }.fail();
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(0x10) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

pub fn aes_ecb_decrypt(key: &[u8; 0x10], data: &mut [u8]) -> Result<(), CryptoError> {
    if data.len() % 0x10 != 0 {
        return UnalignedBlockSnafu { len: data.len() }.fail();
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(0x10) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

/// AES-128-CTR is its own inverse; encrypt and decrypt are the same operation.
pub fn aes_ctr(key: &[u8; 0x10], data: &mut [u8], counter: &[u8; 0x10]) {
    let key = GenericArray::from_slice(key);
    let iv = GenericArray::from_slice(counter);
    let mut cipher = Ctr128BE::<Aes128>::new(key, iv);
    cipher.apply_keystream(data);
}

/// Doubles a 16-byte value in GF(2^128) under Nintendo's big-endian tweak
/// convention: the array is a big-endian 128-bit integer, shifted left by
/// one bit, with a carry out of the top bit reduced by XOR-ing 0x87 into
/// the low byte.
fn gf128_double_be(tweak: &mut [u8; 0x10]) {
    let mut carry = 0u8;
    for byte in tweak.iter_mut().rev() {
        let new_carry = *byte >> 7;
        *byte = (*byte << 1) | carry;
        carry = new_carry;
    }
    if carry != 0 {
        tweak[0x0F] ^= 0x87;
    }
}

fn xts_tweak(key2: &[u8; 0x10], sector: u64) -> [u8; 0x10] {
    let mut tweak = [0u8; 0x10];
    tweak[0x08..].copy_from_slice(&sector.to_be_bytes());
    aes_ecb_encrypt_block(key2, &mut tweak);
    tweak
}

fn check_xts_params(len: usize, sector_size: usize) -> Result<(), CryptoError> {
    if sector_size % 0x10 != 0 {
        return InvalidSectorSizeSnafu { sector_size }.fail();
    }
    if len % sector_size != 0 {
        return UnalignedSectorSnafu { len, sector_size }.fail();
    }
    Ok(())
}

/// Software AES-128-XTS fallback for Nintendo's variant (§4.12): a K1/K2 split
/// 32-byte key, big-endian per-sector tweak, GF(2^128) doubling between blocks
/// within a sector, recomputed fresh at the start of each sector.
pub fn aes_xts_encrypt(
    key: &[u8; 0x20],
    data: &mut [u8],
    sector_size: usize,
    start_sector: u64,
) -> Result<(), CryptoError> {
    check_xts_params(data.len(), sector_size)?;
    let key1: [u8; 0x10] = key[0x00..0x10].try_into().unwrap();
    let key2: [u8; 0x10] = key[0x10..0x20].try_into().unwrap();

    for (i, sector) in data.chunks_exact_mut(sector_size).enumerate() {
        let mut tweak = xts_tweak(&key2, start_sector + i as u64);
        for block in sector.chunks_exact_mut(0x10) {
            for (b, t) in block.iter_mut().zip(tweak.iter()) {
                *b ^= t;
            }
            let block_arr: &mut [u8; 0x10] = block.try_into().unwrap();
            aes_ecb_encrypt_block(&key1, block_arr);
            for (b, t) in block.iter_mut().zip(tweak.iter()) {
                *b ^= t;
            }
            gf128_double_be(&mut tweak);
        }
    }
    Ok(())
}

pub fn aes_xts_decrypt(
    key: &[u8; 0x20],
    data: &mut [u8],
    sector_size: usize,
    start_sector: u64,
) -> Result<(), CryptoError> {
    check_xts_params(data.len(), sector_size)?;
    let key1: [u8; 0x10] = key[0x00..0x10].try_into().unwrap();
    let key2: [u8; 0x10] = key[0x10..0x20].try_into().unwrap();

    for (i, sector) in data.chunks_exact_mut(sector_size).enumerate() {
        let mut tweak = xts_tweak(&key2, start_sector + i as u64);
        for block in sector.chunks_exact_mut(0x10) {
            for (b, t) in block.iter_mut().zip(tweak.iter()) {
                *b ^= t;
            }
            let block_arr: &mut [u8; 0x10] = block.try_into().unwrap();
            aes_ecb_decrypt_block(&key1, block_arr);
            for (b, t) in block.iter_mut().zip(tweak.iter()) {
                *b ^= t;
            }
            gf128_double_be(&mut tweak);
        }
    }
    Ok(())
}

pub fn sha256(data: &[u8]) -> [u8; 0x20] {
    let mut hasher = sha2::Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Process-wide lazily-generated RSA-2048 signing key. A fresh keypair is
/// generated the first time a signature is requested and reused after that;
/// its public modulus is what gets patched into the ACID.
static SIGNING_KEY: OnceLock<RsaPrivateKey> = OnceLock::new();

fn signing_key() -> Result<&'static RsaPrivateKey, CryptoError> {
    if let Some(key) = SIGNING_KEY.get() {
        return Ok(key);
    }
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).context(RsaKeyGenSnafu)?;
    Ok(SIGNING_KEY.get_or_init(|| key))
}

/// RSA-2048-PSS(SHA-256, salt length 32) signature over `data`.
pub fn rsa_pss_sign(data: &[u8]) -> Result<[u8; 256], CryptoError> {
    let key = signing_key()?;
    let signing_key = SigningKey::<sha2::Sha256>::new_with_salt_len(key.clone(), 32);
    let signature = signing_key
        .try_sign_with_rng(&mut rand::thread_rng(), data)
        .context(RsaSignSnafu)?;
    let bytes = signature.to_bytes();
    let mut out = [0u8; 256];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// The public modulus of the process-wide signing key, patched into the ACID.
pub fn rsa_public_modulus() -> Result<[u8; 256], CryptoError> {
    let key = signing_key()?;
    let modulus = key.to_public_key().n().to_bytes_be();
    let mut out = [0u8; 256];
    out[256 - modulus.len()..].copy_from_slice(&modulus);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gf128_double_small() {
        let mut t = [0u8; 0x10];
        t[0] = 0x01;
        gf128_double_be(&mut t);
        let mut expected = [0u8; 0x10];
        expected[0] = 0x02;
        assert_eq!(t, expected);
    }

    #[test]
    fn gf128_double_with_reduction() {
        let mut t = [0u8; 0x10];
        t[0] = 0x80;
        gf128_double_be(&mut t);
        let mut expected = [0u8; 0x10];
        expected[0x0F] = 0x87;
        assert_eq!(t, expected);
    }

    fn ramp_512() -> Vec<u8> {
        (0..512).map(|i| (i % 256) as u8).collect()
    }

    fn xts_key() -> [u8; 0x20] {
        hex::decode("00112233445566778899AABBCCDDEEFFAABBCCDDEEFF00112233445566778899")
            .unwrap()[..0x20]
            .try_into()
            .unwrap()
    }

    #[test]
    fn xts_nintendo_tweak_sector_0() {
        let key = xts_key();
        let mut data = ramp_512();
        aes_xts_encrypt(&key, &mut data, 512, 0).unwrap();
        assert_eq!(
            hex::encode(&data[..32]),
            "7575d42fde6b2f7190ff26861970b889b0f7d93951047e4913017c4a6dd4a1cc"
        );
    }

    #[test]
    fn xts_nintendo_tweak_sector_1() {
        let key = xts_key();
        let mut data = ramp_512();
        aes_xts_encrypt(&key, &mut data, 512, 1).unwrap();
        assert_eq!(
            hex::encode(&data[..32]),
            "d573fc38797f8affbe2bd3b104b0ef085667c568fed42c7773f8e936e780d1f5"
        );
    }

    #[test]
    fn xts_round_trip() {
        let key = xts_key();
        let original = ramp_512();
        let mut data = original.clone();
        aes_xts_encrypt(&key, &mut data, 512, 7).unwrap();
        assert_ne!(data, original);
        aes_xts_decrypt(&key, &mut data, 512, 7).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn xts_determinism() {
        let key = xts_key();
        let original = ramp_512();
        let mut a = original.clone();
        let mut b = original;
        aes_xts_encrypt(&key, &mut a, 512, 3).unwrap();
        aes_xts_encrypt(&key, &mut b, 512, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn ctr_is_involution() {
        let key = [0x42; 0x10];
        let counter = [0x11; 0x10];
        let original = vec![0xAAu8; 64];
        let mut data = original.clone();
        aes_ctr(&key, &mut data, &counter);
        assert_ne!(data, original);
        aes_ctr(&key, &mut data, &counter);
        assert_eq!(data, original);
    }

    #[test]
    fn rsa_sign_then_recoverable_modulus() {
        let signature = rsa_pss_sign(b"hello").unwrap();
        assert_eq!(signature.len(), 256);
        let modulus = rsa_public_modulus().unwrap();
        assert_eq!(modulus.len(), 256);
    }
}
