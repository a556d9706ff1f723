//! Orchestrates a full NSP build (§4.11): key derivation, NPDM/NACP
//! patching, RomFS/IVFC encoding, per-content NCA assembly, CNMT
//! construction, and final PFS0 packaging, in the fixed file order the
//! format requires.

use crate::crypto::keyset::{KeySet, KeySetParseError, MissingKeyError};
use crate::crypto::{CryptoBackend, CryptoError, DefaultCryptoBackend};
use crate::formats::cnmt::{build_cnmt, ContentRecord};
use crate::formats::nacp::patch_nacp;
use crate::formats::nca::{
    assemble_nca, nca_hash_and_id, NcaBuildError, NcaBuildOptions, NcaSectionInput,
    CONTENT_TYPE_CONTROL, CONTENT_TYPE_MANUAL, CONTENT_TYPE_META, CONTENT_TYPE_PROGRAM,
    CRYPT_TYPE_CTR, CRYPT_TYPE_NONE,
};
use crate::formats::npdm::{patch_npdm, NpdmError};
use crate::formats::pfs0::{build_pfs0, Pfs0File};
use crate::formats::romfs::{build_romfs, RomFsEntry};
use crate::ids::{NcaId, TitleId};
use snafu::{ensure, ResultExt, Snafu};
use std::collections::HashMap;

const EXEFS_BLOCK_SIZE: u32 = 0x10000;
const LOGO_BLOCK_SIZE: u32 = 0x1000;
const META_BLOCK_SIZE: u32 = 0x1000;
const IVFC_ALIGNMENT: usize = 0x4000;

const DEFAULT_KEY_GENERATION: u8 = 1;
const DEFAULT_KEY_AREA_KEY: [u8; 0x10] = [0x04; 0x10];
const DEFAULT_SDK_VERSION: u32 = 0x000C_1100;

#[derive(Snafu, Debug)]
pub enum BuildNspError {
    #[snafu(display("invalid keyfile: {source}"))]
    KeySetParse { source: KeySetParseError },
    #[snafu(display("missing required input: {name}"))]
    MissingInput { name: &'static str },
    #[snafu(display("missing key material: {source}"))]
    MissingKey { source: MissingKeyError },
    #[snafu(display("NPDM patch failed: {source}"))]
    Npdm { source: NpdmError },
    #[snafu(display("NCA assembly failed: {source}"))]
    Nca { source: NcaBuildError },
    #[snafu(display("crypto backend failure: {source}"))]
    Crypto { source: CryptoError },
}

/// Either raw keyfile text (parsed into a fresh [`KeySet`]) or an
/// already-derived one, matching the `keys: text|KeySet` option.
pub enum KeysInput {
    Text(String),
    KeySet(KeySet),
}

pub struct BuildNspOptions {
    pub keys: KeysInput,
    pub exefs: HashMap<String, Vec<u8>>,
    pub control: HashMap<String, Vec<u8>>,
    pub romfs: Option<RomFsEntry>,
    pub logo: Option<HashMap<String, Vec<u8>>>,
    pub htmldoc: Option<RomFsEntry>,
    pub legalinfo: Option<RomFsEntry>,

    pub title_id: Option<u64>,
    pub key_generation: u8,
    /// Overrides the key-area encryption key directly; this is a raw key
    /// value, not derived from `keys` (the `KeySet`'s own key-area keys are
    /// unused by this orchestration, by design — see DESIGN.md).
    pub key_area_key: [u8; 0x10],
    pub sdk_version: u32,
    pub plaintext: bool,
    pub no_logo: bool,
    pub no_patch_nacp_logo: bool,
    pub no_patch_acid_key: bool,
    pub no_sign_nca_sig2: bool,
    pub title_name: Option<String>,
    pub title_publisher: Option<String>,

    pub crypto: Option<Box<dyn CryptoBackend>>,
}

impl BuildNspOptions {
    pub fn new(keys: KeysInput, exefs: HashMap<String, Vec<u8>>, control: HashMap<String, Vec<u8>>) -> Self {
        Self {
            keys,
            exefs,
            control,
            romfs: None,
            logo: None,
            htmldoc: None,
            legalinfo: None,
            title_id: None,
            key_generation: DEFAULT_KEY_GENERATION,
            key_area_key: DEFAULT_KEY_AREA_KEY,
            sdk_version: DEFAULT_SDK_VERSION,
            plaintext: false,
            no_logo: false,
            no_patch_nacp_logo: false,
            no_patch_acid_key: false,
            no_sign_nca_sig2: false,
            title_name: None,
            title_publisher: None,
            crypto: None,
        }
    }
}

pub struct BuildNspResult {
    pub nsp: Vec<u8>,
    pub title_id: TitleId,
    pub nca_ids: Vec<String>,
    pub filename: String,
}

fn pad_to_ivfc_boundary(data: &mut Vec<u8>) {
    let padded = (data.len() + IVFC_ALIGNMENT - 1) / IVFC_ALIGNMENT * IVFC_ALIGNMENT;
    data.resize(padded, 0);
}

fn sorted_pfs0_files(map: &HashMap<String, Vec<u8>>) -> Vec<Pfs0File> {
    let mut names: Vec<&String> = map.keys().collect();
    names.sort();
    names.into_iter().map(|name| Pfs0File::new(name.clone(), map[name].clone())).collect()
}

fn romfs_from_map(map: &HashMap<String, Vec<u8>>) -> RomFsEntry {
    let mut root = RomFsEntry::empty_directory();
    let mut names: Vec<&String> = map.keys().collect();
    names.sort();
    for name in names {
        root.insert_file(name, map[name].clone());
    }
    root
}

#[allow(clippy::too_many_arguments)]
fn assemble_manual_nca(
    entry: &RomFsEntry,
    crypt_type: u8,
    opts: &BuildNspOptions,
    header_key: [u8; 0x20],
    title_id: u64,
    sign: bool,
    crypto: &dyn CryptoBackend,
) -> Result<(NcaId, Vec<u8>), BuildNspError> {
    let mut data = build_romfs(entry);
    pad_to_ivfc_boundary(&mut data);
    let sections = vec![NcaSectionInput::RomFs { data, crypt_type }];
    let nca_opts = NcaBuildOptions {
        content_type: CONTENT_TYPE_MANUAL,
        key_generation: opts.key_generation,
        content_key: rand::random(),
        key_area_encryption_key: opts.key_area_key,
        header_key,
        title_id,
        sdk_version: opts.sdk_version,
        sign,
        plaintext: opts.plaintext,
    };
    let envelope = assemble_nca(&sections, &nca_opts, crypto).context(NcaSnafu)?;
    let (hash, _) = nca_hash_and_id(&envelope, crypto);
    Ok((NcaId::from_hash(&hash), envelope))
}

/// Builds a complete NSP from exefs/control/romfs inputs, returning the
/// packaged bytes alongside the title id, per-NCA ids (in NSP file order),
/// and the conventional `<hexTitleId>.nsp` filename.
pub fn build_nsp(mut opts: BuildNspOptions) -> Result<BuildNspResult, BuildNspError> {
    let keyset = match opts.keys {
        KeysInput::Text(ref text) => KeySet::from_file_contents(text).context(KeySetParseSnafu)?,
        KeysInput::KeySet(ref keyset) => keyset.clone(),
    };
    let header_key = keyset.header_key().context(MissingKeySnafu)?;

    let crypto_owned = opts.crypto.take().unwrap_or_else(|| Box::new(DefaultCryptoBackend));
    let crypto: &dyn CryptoBackend = crypto_owned.as_ref();

    ensure!(opts.exefs.contains_key("main.npdm"), MissingInputSnafu { name: "main.npdm" });
    ensure!(opts.control.contains_key("control.nacp"), MissingInputSnafu { name: "control.nacp" });
    ensure!(opts.control.len() >= 2, MissingInputSnafu { name: "icon" });

    let mut exefs = std::mem::take(&mut opts.exefs);
    let patch_acid_key = if opts.no_patch_acid_key {
        None
    } else {
        Some(crypto.rsa_public_modulus().context(CryptoSnafu)?)
    };
    let npdm = exefs.get_mut("main.npdm").expect("checked above");
    let title_id = patch_npdm(npdm, opts.title_id, patch_acid_key.as_ref()).context(NpdmSnafu)?;
    tracing::debug!(title_id = %TitleId(title_id), "NPDM patched");

    let mut control = std::mem::take(&mut opts.control);
    if opts.title_name.is_some() || opts.title_publisher.is_some() {
        let title = opts.title_name.clone().unwrap_or_default();
        let publisher = opts.title_publisher.clone().unwrap_or_default();
        let nacp = control.get_mut("control.nacp").expect("checked above");
        patch_nacp(nacp, &title, &publisher, !opts.no_patch_nacp_logo);
    }

    let section_crypt_type = if opts.plaintext { CRYPT_TYPE_NONE } else { CRYPT_TYPE_CTR };
    let sign = !opts.no_sign_nca_sig2;

    // --- Program NCA: ExeFS, optional RomFS, optional Logo. ---
    let exefs_pfs0 = build_pfs0(&sorted_pfs0_files(&exefs));
    let mut program_sections = vec![NcaSectionInput::Pfs0 {
        pfs0: exefs_pfs0,
        block_size: EXEFS_BLOCK_SIZE,
        crypt_type: section_crypt_type,
    }];
    if let Some(romfs_entry) = &opts.romfs {
        let mut data = build_romfs(romfs_entry);
        pad_to_ivfc_boundary(&mut data);
        program_sections.push(NcaSectionInput::RomFs { data, crypt_type: section_crypt_type });
    }
    if !opts.no_logo {
        if let Some(logo) = &opts.logo {
            let logo_pfs0 = build_pfs0(&sorted_pfs0_files(logo));
            program_sections.push(NcaSectionInput::Pfs0 {
                pfs0: logo_pfs0,
                block_size: LOGO_BLOCK_SIZE,
                crypt_type: CRYPT_TYPE_NONE,
            });
        }
    }
    let program_opts = NcaBuildOptions {
        content_type: CONTENT_TYPE_PROGRAM,
        key_generation: opts.key_generation,
        content_key: rand::random(),
        key_area_encryption_key: opts.key_area_key,
        header_key,
        title_id,
        sdk_version: opts.sdk_version,
        sign,
        plaintext: opts.plaintext,
    };
    let program_envelope = assemble_nca(&program_sections, &program_opts, crypto).context(NcaSnafu)?;
    let (program_hash, _) = nca_hash_and_id(&program_envelope, crypto);
    let program_id = NcaId::from_hash(&program_hash);

    // --- Control NCA: a single RomFS section built from the control map. ---
    let control_root = romfs_from_map(&control);
    let mut control_data = build_romfs(&control_root);
    pad_to_ivfc_boundary(&mut control_data);
    let control_sections = vec![NcaSectionInput::RomFs { data: control_data, crypt_type: section_crypt_type }];
    let control_opts = NcaBuildOptions {
        content_type: CONTENT_TYPE_CONTROL,
        key_generation: opts.key_generation,
        content_key: rand::random(),
        key_area_encryption_key: opts.key_area_key,
        header_key,
        title_id,
        sdk_version: opts.sdk_version,
        sign,
        plaintext: opts.plaintext,
    };
    let control_envelope = assemble_nca(&control_sections, &control_opts, crypto).context(NcaSnafu)?;
    let (control_hash, _) = nca_hash_and_id(&control_envelope, crypto);
    let control_id = NcaId::from_hash(&control_hash);

    // --- Optional Manual NCAs. ---
    let htmldoc = opts
        .htmldoc
        .as_ref()
        .map(|entry| assemble_manual_nca(entry, section_crypt_type, &opts, header_key, title_id, sign, crypto))
        .transpose()?;
    let legalinfo = opts
        .legalinfo
        .as_ref()
        .map(|entry| assemble_manual_nca(entry, section_crypt_type, &opts, header_key, title_id, sign, crypto))
        .transpose()?;

    // --- CNMT + Meta NCA. ---
    let mut records = vec![
        ContentRecord::new(program_hash, program_envelope.len() as u64, CONTENT_TYPE_PROGRAM, 0),
        ContentRecord::new(control_hash, control_envelope.len() as u64, CONTENT_TYPE_CONTROL, 0),
    ];
    let mut manual_id_offset = 0u8;
    if let Some((_, envelope)) = &htmldoc {
        let (hash, _) = nca_hash_and_id(envelope, crypto);
        records.push(ContentRecord::new(hash, envelope.len() as u64, CONTENT_TYPE_MANUAL, manual_id_offset));
        manual_id_offset += 1;
    }
    if let Some((_, envelope)) = &legalinfo {
        let (hash, _) = nca_hash_and_id(envelope, crypto);
        records.push(ContentRecord::new(hash, envelope.len() as u64, CONTENT_TYPE_MANUAL, manual_id_offset));
    }

    let cnmt = build_cnmt(title_id, 0, &records);
    let title_id_hex = TitleId(title_id).to_lower_hex();
    let cnmt_pfs0 = build_pfs0(&[Pfs0File::new(format!("Application_{title_id_hex}.cnmt"), cnmt)]);
    let meta_sections = vec![NcaSectionInput::Pfs0 {
        pfs0: cnmt_pfs0,
        block_size: META_BLOCK_SIZE,
        crypt_type: section_crypt_type,
    }];
    let meta_opts = NcaBuildOptions {
        content_type: CONTENT_TYPE_META,
        key_generation: opts.key_generation,
        content_key: rand::random(),
        key_area_encryption_key: opts.key_area_key,
        header_key,
        title_id,
        sdk_version: opts.sdk_version,
        sign,
        plaintext: opts.plaintext,
    };
    let meta_envelope = assemble_nca(&meta_sections, &meta_opts, crypto).context(NcaSnafu)?;
    let (meta_hash, _) = nca_hash_and_id(&meta_envelope, crypto);
    let meta_id = NcaId::from_hash(&meta_hash);

    // --- Final NSP packaging, fixed file order. ---
    let mut nca_ids = vec![format!("{program_id}"), format!("{control_id}")];
    let mut files = vec![
        Pfs0File::new(program_id.filename(), program_envelope),
        Pfs0File::new(control_id.filename(), control_envelope),
    ];
    if let Some((id, envelope)) = htmldoc {
        nca_ids.push(format!("{id}"));
        files.push(Pfs0File::new(id.filename(), envelope));
    }
    if let Some((id, envelope)) = legalinfo {
        nca_ids.push(format!("{id}"));
        files.push(Pfs0File::new(id.filename(), envelope));
    }
    nca_ids.push(format!("{meta_id}"));
    files.push(Pfs0File::new(meta_id.cnmt_filename(), meta_envelope));

    let nsp = build_pfs0(&files);

    Ok(BuildNspResult {
        nsp,
        title_id: TitleId(title_id),
        nca_ids,
        filename: format!("{title_id_hex}.nsp"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACI0_OFFSET_FIELD: usize = 0x70;
    const ACID_OFFSET_FIELD: usize = 0x78;
    const ACI0_TITLE_ID_OFFSET: usize = 0x10;

    fn test_keyfile() -> String {
        let secure_boot_key = "000102030405060708090a0b0c0d0e0f";
        let tsec_key = "101112131415161718191a1b1c1d1e1f";
        let keyblob_key_source_00 = "202122232425262728292a2b2c2d2e2f";
        let master_key_source = "404142434445464748494a4b4c4d4e4f";
        let header_kek_source = "505152535455565758595a5b5c5d5e5f";
        let header_key_source = "606162636465666768696a6b6c6d6e6f707172737475767778797a7b7c7d7e7f";
        let mut encrypted_keyblob_00 = vec![0u8; 0xB0];
        for (i, b) in encrypted_keyblob_00.iter_mut().enumerate() {
            *b = i as u8;
        }
        format!(
            "secure_boot_key = {secure_boot_key}\n\
             tsec_key = {tsec_key}\n\
             keyblob_key_source_00 = {keyblob_key_source_00}\n\
             encrypted_keyblob_00 = {}\n\
             master_key_source = {master_key_source}\n\
             header_kek_source = {header_kek_source}\n\
             header_key_source = {header_key_source}\n",
            hex::encode(&encrypted_keyblob_00)
        )
    }

    fn minimal_npdm() -> Vec<u8> {
        let mut npdm = vec![0u8; 0x300];
        npdm[0..4].copy_from_slice(b"META");
        let aci0_offset = 0x80u32;
        let acid_offset = 0x100u32;
        npdm[ACI0_OFFSET_FIELD..ACI0_OFFSET_FIELD + 4].copy_from_slice(&aci0_offset.to_le_bytes());
        npdm[ACID_OFFSET_FIELD..ACID_OFFSET_FIELD + 4].copy_from_slice(&acid_offset.to_le_bytes());
        npdm[aci0_offset as usize..aci0_offset as usize + 4].copy_from_slice(b"ACI0");
        npdm[aci0_offset as usize + ACI0_TITLE_ID_OFFSET..aci0_offset as usize + ACI0_TITLE_ID_OFFSET + 8]
            .copy_from_slice(&0x0100000000001000u64.to_le_bytes());
        npdm[acid_offset as usize + 0x200..acid_offset as usize + 0x204].copy_from_slice(b"ACID");
        npdm
    }

    fn minimal_control() -> HashMap<String, Vec<u8>> {
        let mut control = HashMap::new();
        control.insert(
            "control.nacp".to_string(),
            vec![0u8; 12 * 0x300 + 0x1000],
        );
        control.insert("icon_AmericanEnglish.dat".to_string(), vec![0x89, 0x50, 0x4E, 0x47]);
        control
    }

    fn minimal_opts() -> BuildNspOptions {
        let mut exefs = HashMap::new();
        exefs.insert("main.npdm".to_string(), minimal_npdm());
        exefs.insert("main".to_string(), vec![0u8; 32]);

        let keyset = KeySet::from_file_contents(&test_keyfile()).unwrap();
        BuildNspOptions::new(KeysInput::KeySet(keyset), exefs, minimal_control())
    }

    #[test]
    fn builds_minimal_nsp() {
        let result = build_nsp(minimal_opts()).unwrap();
        assert_eq!(&result.nsp[0..4], b"PFS0");
        assert_eq!(result.title_id.0, 0x0100000000001000);
        assert_eq!(result.nca_ids.len(), 3); // program, control, meta
        assert_eq!(result.filename, "0100000000001000.nsp");
    }

    #[test]
    fn title_override_is_reflected_in_filename() {
        let mut opts = minimal_opts();
        opts.title_id = Some(0x0100000000002000);
        let result = build_nsp(opts).unwrap();
        assert_eq!(result.title_id.0, 0x0100000000002000);
        assert_eq!(result.filename, "0100000000002000.nsp");
    }

    #[test]
    fn patches_title_name_and_publisher_into_control_nacp() {
        let mut opts = minimal_opts();
        opts.title_name = Some("My Game".to_string());
        opts.title_publisher = Some("My Studio".to_string());
        let mut nacp = minimal_control().remove("control.nacp").unwrap();
        patch_nacp(&mut nacp, "My Game", "My Studio", true);
        assert_eq!(&nacp[0..7], b"My Game");
        assert_eq!(&nacp[0x200..0x200 + 9], b"My Studio");

        let result = build_nsp(opts).unwrap();
        assert_eq!(&result.nsp[0..4], b"PFS0");
    }

    #[test]
    fn missing_main_npdm_is_rejected() {
        let mut opts = minimal_opts();
        opts.exefs.remove("main.npdm");
        let result = build_nsp(opts);
        assert!(matches!(result, Err(BuildNspError::MissingInput { name: "main.npdm" })));
    }

    #[test]
    fn missing_control_nacp_is_rejected() {
        let mut opts = minimal_opts();
        opts.control.remove("control.nacp");
        let result = build_nsp(opts);
        assert!(matches!(result, Err(BuildNspError::MissingInput { name: "control.nacp" })));
    }

    #[test]
    fn plaintext_mode_builds_without_signature() {
        let mut opts = minimal_opts();
        opts.plaintext = true;
        opts.no_sign_nca_sig2 = true;
        let result = build_nsp(opts).unwrap();
        assert_eq!(&result.nsp[0..4], b"PFS0");
    }
}
