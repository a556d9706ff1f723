//! NPDM (META/ACI0/ACID) patcher: extracts/overrides the title id and can
//! stamp the bundled RSA public modulus into the ACID section so the
//! program's own signature can be verified against it.

use snafu::{ensure, Snafu};

const META_MAGIC: [u8; 4] = *b"META";
const ACI0_MAGIC: [u8; 4] = *b"ACI0";
const ACID_MAGIC: [u8; 4] = *b"ACID";

const ACI0_OFFSET_FIELD: usize = 0x70;
const ACID_OFFSET_FIELD: usize = 0x78;
const ACI0_TITLE_ID_OFFSET: usize = 0x10;
const ACID_MAGIC_OFFSET: usize = 0x200;
const ACID_PUBLIC_MODULUS_OFFSET: usize = 0x100;
const ACID_PUBLIC_MODULUS_END: usize = 0x200;

const TITLE_ID_MIN: u64 = 0x0100_0000_0000_0000;
const TITLE_ID_MAX: u64 = 0x0FFF_FFFF_FFFF_FFFF;

#[derive(Snafu, Debug)]
pub enum NpdmError {
    #[snafu(display("NPDM blob is too small to hold its META/ACI0/ACID headers"))]
    Truncated,
    #[snafu(display("invalid META magic"))]
    InvalidMetaMagic,
    #[snafu(display("invalid ACI0 magic"))]
    InvalidAci0Magic,
    #[snafu(display("invalid ACID magic"))]
    InvalidAcidMagic,
    #[snafu(display("title id {title_id:#018x} is outside the valid application range"))]
    TitleIdOutOfRange { title_id: u64 },
}

/// Patches an NPDM blob in place: optionally overrides the title id,
/// validates it falls in the application range, and optionally stamps the
/// bundled RSA public modulus into the ACID section.
pub fn patch_npdm(
    npdm: &mut [u8],
    title_id_override: Option<u64>,
    patch_acid_key: Option<&[u8; 256]>,
) -> Result<u64, NpdmError> {
    ensure!(npdm.len() >= 0x80, TruncatedSnafu);
    ensure!(npdm[0..4] == META_MAGIC, InvalidMetaMagicSnafu);

    let aci0_offset = u32::from_le_bytes(npdm[ACI0_OFFSET_FIELD..ACI0_OFFSET_FIELD + 4].try_into().unwrap()) as usize;
    let acid_offset = u32::from_le_bytes(npdm[ACID_OFFSET_FIELD..ACID_OFFSET_FIELD + 4].try_into().unwrap()) as usize;

    ensure!(npdm.len() >= aci0_offset + 0x20, TruncatedSnafu);
    ensure!(npdm[aci0_offset..aci0_offset + 4] == ACI0_MAGIC, InvalidAci0MagicSnafu);
    ensure!(npdm.len() >= acid_offset + ACID_MAGIC_OFFSET + 4, TruncatedSnafu);
    ensure!(
        npdm[acid_offset + ACID_MAGIC_OFFSET..acid_offset + ACID_MAGIC_OFFSET + 4] == ACID_MAGIC,
        InvalidAcidMagicSnafu
    );

    let title_id_field = aci0_offset + ACI0_TITLE_ID_OFFSET;
    if let Some(title_id) = title_id_override {
        npdm[title_id_field..title_id_field + 8].copy_from_slice(&title_id.to_le_bytes());
    }
    let title_id = u64::from_le_bytes(npdm[title_id_field..title_id_field + 8].try_into().unwrap());

    ensure!(
        (TITLE_ID_MIN..=TITLE_ID_MAX).contains(&title_id),
        TitleIdOutOfRangeSnafu { title_id }
    );

    if let Some(modulus) = patch_acid_key {
        let start = acid_offset + ACID_PUBLIC_MODULUS_OFFSET;
        let end = acid_offset + ACID_PUBLIC_MODULUS_END;
        ensure!(npdm.len() >= end, TruncatedSnafu);
        npdm[start..end].copy_from_slice(modulus);
    }

    Ok(title_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_npdm() -> Vec<u8> {
        let mut npdm = vec![0u8; 0x300];
        npdm[0..4].copy_from_slice(&META_MAGIC);
        let aci0_offset = 0x80u32;
        let acid_offset = 0x100u32;
        npdm[ACI0_OFFSET_FIELD..ACI0_OFFSET_FIELD + 4].copy_from_slice(&aci0_offset.to_le_bytes());
        npdm[ACID_OFFSET_FIELD..ACID_OFFSET_FIELD + 4].copy_from_slice(&acid_offset.to_le_bytes());
        npdm[aci0_offset as usize..aci0_offset as usize + 4].copy_from_slice(&ACI0_MAGIC);
        npdm[aci0_offset as usize + ACI0_TITLE_ID_OFFSET..aci0_offset as usize + ACI0_TITLE_ID_OFFSET + 8]
            .copy_from_slice(&0x0100000000001000u64.to_le_bytes());
        let acid_magic_at = acid_offset as usize + ACID_MAGIC_OFFSET;
        npdm[acid_magic_at..acid_magic_at + 4].copy_from_slice(&ACID_MAGIC);
        npdm
    }

    #[test]
    fn extracts_title_id_without_override() {
        let mut npdm = minimal_npdm();
        let title_id = patch_npdm(&mut npdm, None, None).unwrap();
        assert_eq!(title_id, 0x0100000000001000);
    }

    #[test]
    fn overrides_title_id() {
        let mut npdm = minimal_npdm();
        let title_id = patch_npdm(&mut npdm, Some(0x0100000000002000), None).unwrap();
        assert_eq!(title_id, 0x0100000000002000);
    }

    #[test]
    fn rejects_title_id_outside_application_range() {
        let mut npdm = minimal_npdm();
        let aci0_offset = 0x80usize;
        npdm[aci0_offset + ACI0_TITLE_ID_OFFSET..aci0_offset + ACI0_TITLE_ID_OFFSET + 8]
            .copy_from_slice(&0x0000000000001000u64.to_le_bytes());
        let result = patch_npdm(&mut npdm, None, None);
        assert!(matches!(result, Err(NpdmError::TitleIdOutOfRange { .. })));
    }

    #[test]
    fn patches_acid_public_modulus() {
        let mut npdm = minimal_npdm();
        let modulus = [0x42u8; 256];
        patch_npdm(&mut npdm, None, Some(&modulus)).unwrap();
        let acid_offset = 0x100usize;
        assert_eq!(
            &npdm[acid_offset + ACID_PUBLIC_MODULUS_OFFSET..acid_offset + ACID_PUBLIC_MODULUS_END],
            &modulus[..]
        );
    }
}
