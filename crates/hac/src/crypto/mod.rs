pub mod keyset;
mod primitives;

pub use keyset::{KeyAreaKeyIndex, KeySet};
pub use primitives::{
    aes_ctr, aes_ecb_decrypt, aes_ecb_encrypt, aes_xts_decrypt, aes_xts_encrypt, rsa_pss_sign,
    rsa_public_modulus, sha256, CryptoError,
};

/// Narrow seam for the crypto primitives the rest of the crate drives,
/// matching the backend-injection design: callers may substitute a faster
/// native implementation (e.g. hardware AES-XTS) without touching callers.
pub trait CryptoBackend: Send + Sync {
    fn aes_ecb_encrypt(&self, key: &[u8; 0x10], data: &mut [u8]) -> Result<(), CryptoError>;
    fn aes_ecb_decrypt(&self, key: &[u8; 0x10], data: &mut [u8]) -> Result<(), CryptoError>;
    fn aes_ctr(&self, key: &[u8; 0x10], data: &mut [u8], counter: &[u8; 0x10]);
    fn aes_xts_encrypt(
        &self,
        key: &[u8; 0x20],
        data: &mut [u8],
        sector_size: usize,
        start_sector: u64,
    ) -> Result<(), CryptoError>;
    fn aes_xts_decrypt(
        &self,
        key: &[u8; 0x20],
        data: &mut [u8],
        sector_size: usize,
        start_sector: u64,
    ) -> Result<(), CryptoError>;
    fn sha256(&self, data: &[u8]) -> [u8; 0x20];
    fn rsa_pss_sign(&self, data: &[u8]) -> Result<[u8; 256], CryptoError>;
    fn rsa_public_modulus(&self) -> Result<[u8; 256], CryptoError>;
}

/// The software-only backend: AES-ECB/CTR primitives, the big-endian XTS
/// fallback from §4.12, and a lazily-generated RSA signing key.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCryptoBackend;

impl CryptoBackend for DefaultCryptoBackend {
    fn aes_ecb_encrypt(&self, key: &[u8; 0x10], data: &mut [u8]) -> Result<(), CryptoError> {
        primitives::aes_ecb_encrypt(key, data)
    }

    fn aes_ecb_decrypt(&self, key: &[u8; 0x10], data: &mut [u8]) -> Result<(), CryptoError> {
        primitives::aes_ecb_decrypt(key, data)
    }

    fn aes_ctr(&self, key: &[u8; 0x10], data: &mut [u8], counter: &[u8; 0x10]) {
        primitives::aes_ctr(key, data, counter)
    }

    fn aes_xts_encrypt(
        &self,
        key: &[u8; 0x20],
        data: &mut [u8],
        sector_size: usize,
        start_sector: u64,
    ) -> Result<(), CryptoError> {
        primitives::aes_xts_encrypt(key, data, sector_size, start_sector)
    }

    fn aes_xts_decrypt(
        &self,
        key: &[u8; 0x20],
        data: &mut [u8],
        sector_size: usize,
        start_sector: u64,
    ) -> Result<(), CryptoError> {
        primitives::aes_xts_decrypt(key, data, sector_size, start_sector)
    }

    fn sha256(&self, data: &[u8]) -> [u8; 0x20] {
        primitives::sha256(data)
    }

    fn rsa_pss_sign(&self, data: &[u8]) -> Result<[u8; 256], CryptoError> {
        primitives::rsa_pss_sign(data)
    }

    fn rsa_public_modulus(&self) -> Result<[u8; 256], CryptoError> {
        primitives::rsa_public_modulus()
    }
}
