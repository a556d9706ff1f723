//! Nintendo's master-key derivation chain (see the key derivation table this
//! module implements): parses a `name = hex` keyfile and runs the chain
//! bottom-up to produce a header key and the per-generation key-area keys.

use crate::crypto::primitives::{aes_ctr, aes_ecb_decrypt_block, aes_ecb_encrypt_block};
use snafu::Snafu;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};

pub const NUM_KEYBLOBS: usize = 6;
pub const NUM_GENERATIONS: usize = 32;
pub const NUM_TSEC_ROOT_KEYS: usize = NUM_GENERATIONS - NUM_KEYBLOBS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAreaKeyIndex {
    Application = 0,
    Ocean = 1,
    System = 2,
}

pub struct KeyName {
    pub key_name: &'static str,
    pub index: Option<u8>,
}

impl Debug for KeyName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}_{:02x}", self.key_name, index),
            None => write!(f, "{}", self.key_name),
        }
    }
}

impl Display for KeyName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

#[derive(Snafu, Debug)]
pub enum KeySetParseError {
    #[snafu(display("malformed keyfile at line {line}, column {col}: {msg}"))]
    Ini { line: usize, col: usize, msg: String },
    #[snafu(display("key {name} is not valid hex: {source}"))]
    InvalidHex {
        name: String,
        source: hex::FromHexError,
    },
}

#[derive(Snafu, Debug)]
#[snafu(display("missing key: {key_name}"))]
pub struct MissingKeyError {
    pub key_name: KeyName,
}

/// Raw, unvalidated key material read straight from a keyfile: zero or more
/// hex blobs per name. Interpreted by [`KeySet::derive`].
#[derive(Default, Clone)]
struct RawKeys {
    values: HashMap<String, Vec<u8>>,
}

impl RawKeys {
    fn parse(text: &str) -> Result<Self, KeySetParseError> {
        let ini = ini::Ini::load_from_str_noescape(text).map_err(|e| KeySetParseError::Ini {
            line: e.line,
            col: e.col,
            msg: e.msg,
        })?;
        let mut values = HashMap::new();
        for (name, value) in ini.general_section().iter() {
            let name = name.trim().to_ascii_lowercase();
            let bytes = hex::decode(value.trim()).map_err(|source| KeySetParseError::InvalidHex {
                name: name.clone(),
                source,
            })?;
            values.insert(name, bytes);
        }
        Ok(Self { values })
    }

    fn get(&self, name: &str) -> Option<&[u8]> {
        self.values.get(name).map(Vec::as_slice)
    }

    fn get_array<const N: usize>(&self, name: &str) -> Option<[u8; N]> {
        self.get(name).and_then(|v| <[u8; N]>::try_from(v).ok())
    }

    fn get_indexed_array<const N: usize>(&self, name: &str, index: usize) -> Option<[u8; N]> {
        self.get_array(&format!("{name}_{index:02x}"))
    }
}

/// The derived key surface: a 32-byte header key, and key-area keys indexed
/// by `[generation 0..31][variant]`. All intermediates used along the way are
/// kept too, since nothing downstream needs to recompute them.
#[derive(Clone)]
pub struct KeySet {
    header_key: Option<[u8; 0x20]>,
    key_area_keys: [[Option<[u8; 0x10]>; 3]; NUM_GENERATIONS],

    keyblob_keys: [Option<[u8; 0x10]>; NUM_KEYBLOBS],
    keyblob_mac_keys: [Option<[u8; 0x10]>; NUM_KEYBLOBS],
    keyblobs: [Option<[u8; 0x90]>; NUM_KEYBLOBS],
    package1_keys: [Option<[u8; 0x10]>; NUM_KEYBLOBS],
    tsec_root_keys: [Option<[u8; 0x10]>; NUM_TSEC_ROOT_KEYS],
    master_keks: [Option<[u8; 0x10]>; NUM_GENERATIONS],
    master_keys: [Option<[u8; 0x10]>; NUM_GENERATIONS],
}

impl KeySet {
    /// Parses a keyfile and runs the derivation chain (§4.2). Missing inputs
    /// silently leave their outputs unset rather than failing.
    pub fn from_file_contents(text: &str) -> Result<Self, KeySetParseError> {
        let raw = RawKeys::parse(text)?;
        Ok(Self::derive(&raw))
    }

    fn derive(raw: &RawKeys) -> Self {
        let mut keyset = KeySet {
            header_key: None,
            key_area_keys: [[None; 3]; NUM_GENERATIONS],
            keyblob_keys: [None; NUM_KEYBLOBS],
            keyblob_mac_keys: [None; NUM_KEYBLOBS],
            keyblobs: [None; NUM_KEYBLOBS],
            package1_keys: [None; NUM_KEYBLOBS],
            tsec_root_keys: [None; NUM_TSEC_ROOT_KEYS],
            master_keks: [None; NUM_GENERATIONS],
            master_keys: [None; NUM_GENERATIONS],
        };

        let secure_boot_key = raw.get_array::<0x10>("secure_boot_key");
        let tsec_key = raw.get_array::<0x10>("tsec_key");
        let keyblob_mac_key_source = raw.get_array::<0x10>("keyblob_mac_key_source");

        for i in 0..NUM_KEYBLOBS {
            let source = raw.get_indexed_array::<0x10>("keyblob_key_source", i);
            if let (Some(secure_boot_key), Some(tsec_key), Some(source)) =
                (secure_boot_key, tsec_key, source)
            {
                let mut inner = source;
                aes_ecb_decrypt_block(&tsec_key, &mut inner);
                let mut outer = inner;
                aes_ecb_decrypt_block(&secure_boot_key, &mut outer);
                keyset.keyblob_keys[i] = Some(outer);
            }

            if let (Some(keyblob_key), Some(mac_source)) =
                (keyset.keyblob_keys[i], keyblob_mac_key_source)
            {
                let mut mac = mac_source;
                aes_ecb_decrypt_block(&keyblob_key, &mut mac);
                keyset.keyblob_mac_keys[i] = Some(mac);
            }

            if let (Some(keyblob_key), Some(encrypted)) =
                (keyset.keyblob_keys[i], raw.get(&format!("encrypted_keyblob_{i:02x}")))
            {
                if encrypted.len() >= 0xB0 {
                    let ctr: [u8; 0x10] = encrypted[0x10..0x20].try_into().unwrap();
                    let mut body: [u8; 0x90] = encrypted[0x20..0xB0].try_into().unwrap();
                    aes_ctr(&keyblob_key, &mut body, &ctr);
                    keyset.package1_keys[i] = Some(body[0x80..0x90].try_into().unwrap());
                    keyset.master_keks[i] = Some(body[0x00..0x10].try_into().unwrap());
                    keyset.keyblobs[i] = Some(body);
                }
            }
        }

        let tsec_root_kek = raw.get_array::<0x10>("tsec_root_kek");
        for j in 0..NUM_TSEC_ROOT_KEYS {
            let i = j + NUM_KEYBLOBS;
            if let (Some(tsec_root_kek), Some(signature)) = (
                tsec_root_kek,
                raw.get_indexed_array::<0x10>("tsec_auth_signature", j),
            ) {
                let mut root_key = signature;
                aes_ecb_encrypt_block(&tsec_root_kek, &mut root_key);
                keyset.tsec_root_keys[j] = Some(root_key);
            }

            if let (Some(tsec_root_key), Some(master_kek_source)) = (
                keyset.tsec_root_keys[j],
                raw.get_indexed_array::<0x10>("master_kek_source", i),
            ) {
                let mut kek = master_kek_source;
                aes_ecb_decrypt_block(&tsec_root_key, &mut kek);
                keyset.master_keks[i] = Some(kek);
            }
        }

        let master_key_source = raw.get_array::<0x10>("master_key_source");
        for i in 0..NUM_GENERATIONS {
            if let (Some(master_kek), Some(master_key_source)) =
                (keyset.master_keks[i], master_key_source)
            {
                let mut key = master_key_source;
                aes_ecb_decrypt_block(&master_kek, &mut key);
                keyset.master_keys[i] = Some(key);
            }
        }

        let aes_kek_generation_source = raw.get_array::<0x10>("aes_kek_generation_source");
        let aes_key_generation_source = raw.get_array::<0x10>("aes_key_generation_source");
        let variant_sources = [
            ("key_area_key_application_source", KeyAreaKeyIndex::Application),
            ("key_area_key_ocean_source", KeyAreaKeyIndex::Ocean),
            ("key_area_key_system_source", KeyAreaKeyIndex::System),
        ];
        for i in 0..NUM_GENERATIONS {
            let Some(master_key) = keyset.master_keys[i] else {
                continue;
            };
            let Some(kek_gen_source) = aes_kek_generation_source else {
                continue;
            };
            let Some(key_gen_source) = aes_key_generation_source else {
                continue;
            };
            for (source_name, variant) in variant_sources {
                let Some(variant_source) = raw.get_array::<0x10>(source_name) else {
                    continue;
                };
                let mut x = kek_gen_source;
                aes_ecb_decrypt_block(&master_key, &mut x);
                let mut kek = variant_source;
                aes_ecb_decrypt_block(&x, &mut kek);
                let mut kak = key_gen_source;
                aes_ecb_decrypt_block(&kek, &mut kak);
                keyset.key_area_keys[i][variant as usize] = Some(kak);
            }
        }

        if let (Some(master_key_0), Some(header_kek_source), Some(header_key_source)) = (
            keyset.master_keys[0],
            raw.get_array::<0x10>("header_kek_source"),
            raw.get_array::<0x20>("header_key_source"),
        ) {
            let mut header_kek = header_kek_source;
            aes_ecb_decrypt_block(&master_key_0, &mut header_kek);

            let mut header_key = header_key_source;
            aes_ecb_decrypt_block(&header_kek, (&mut header_key[0x00..0x10]).try_into().unwrap());
            aes_ecb_decrypt_block(&header_kek, (&mut header_key[0x10..0x20]).try_into().unwrap());
            keyset.header_key = Some(header_key);
        }

        keyset
    }

    pub fn header_key(&self) -> Result<[u8; 0x20], MissingKeyError> {
        self.header_key.ok_or(MissingKeyError {
            key_name: KeyName {
                key_name: "header_key",
                index: None,
            },
        })
    }

    pub fn key_area_key(
        &self,
        generation: u8,
        variant: KeyAreaKeyIndex,
    ) -> Result<[u8; 0x10], MissingKeyError> {
        self.key_area_keys[generation as usize][variant as usize].ok_or(MissingKeyError {
            key_name: KeyName {
                key_name: "key_area_key",
                index: Some(generation),
            },
        })
    }

    pub fn master_key(&self, generation: u8) -> Option<[u8; 0x10]> {
        self.master_keys[generation as usize]
    }

    pub fn package1_key(&self, keyblob_index: u8) -> Option<[u8; 0x10]> {
        self.package1_keys[keyblob_index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_keyfile() {
        let text = "# a comment\n; another\nSecure_Boot_KEY = 000102030405060708090a0b0c0d0e0f\n\nmaster_key_source=101112131415161718191a1b1c1d1e1f\n";
        let raw = RawKeys::parse(text).unwrap();
        assert_eq!(
            raw.get("secure_boot_key").unwrap(),
            &hex::decode("000102030405060708090a0b0c0d0e0f").unwrap()[..]
        );
        assert_eq!(
            raw.get("master_key_source").unwrap(),
            &hex::decode("101112131415161718191a1b1c1d1e1f").unwrap()[..]
        );
    }

    #[test]
    fn missing_inputs_leave_keyset_empty() {
        let keyset = KeySet::from_file_contents("").unwrap();
        assert!(keyset.header_key().is_err());
        assert!(keyset
            .key_area_key(1, KeyAreaKeyIndex::Application)
            .is_err());
    }

    #[test]
    fn derives_header_key_from_master_key_zero() {
        // A minimal keyfile that only populates what's needed to reach
        // master_keys[0] and then the header key, bypassing the keyblob
        // chain by providing master_kek_source/tsec directly is out of
        // scope for this harness-free path; instead exercise the keyblob
        // path end to end with arbitrary (but fixed) bytes and check it's
        // deterministic and populates downstream keys.
        let secure_boot_key = "000102030405060708090a0b0c0d0e0f";
        let tsec_key = "101112131415161718191a1b1c1d1e1f";
        let keyblob_key_source_00 = "202122232425262728292a2b2c2d2e2f";
        let keyblob_mac_key_source = "303132333435363738393a3b3c3d3e3f";
        let mut encrypted_keyblob_00 = vec![0u8; 0xB0];
        for (i, b) in encrypted_keyblob_00.iter_mut().enumerate() {
            *b = i as u8;
        }
        let keyfile = format!(
            "secure_boot_key = {secure_boot_key}\ntsec_key = {tsec_key}\nkeyblob_key_source_00 = {keyblob_key_source_00}\nkeyblob_mac_key_source = {keyblob_mac_key_source}\nencrypted_keyblob_00 = {}\n",
            hex::encode(&encrypted_keyblob_00)
        );
        let keyset_a = KeySet::from_file_contents(&keyfile).unwrap();
        let keyset_b = KeySet::from_file_contents(&keyfile).unwrap();
        assert!(keyset_a.keyblob_keys[0].is_some());
        assert_eq!(keyset_a.keyblob_keys[0], keyset_b.keyblob_keys[0]);
        assert_eq!(keyset_a.master_keks[0], keyset_b.master_keks[0]);
        assert!(keyset_a.master_keks[0].is_some());
    }
}
