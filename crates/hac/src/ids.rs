use crate::hexstring::HexData;
use binrw::{BinRead, BinWrite};
use hex::FromHexError;
use snafu::Snafu;
use std::fmt::{Debug, Display};
use std::str::FromStr;

#[derive(Snafu, Debug)]
pub enum IdParseError {
    InvalidLength { expected: usize, actual: usize },
    InvalidChar { char: char, index: usize },
}

fn parse_id(s: &str, result: &mut [u8]) -> Result<(), IdParseError> {
    hex::decode_to_slice(s, result).map_err(|e| match e {
        FromHexError::InvalidHexCharacter { c, index } => {
            IdParseError::InvalidChar { char: c, index }
        }
        FromHexError::OddLength | FromHexError::InvalidStringLength => {
            IdParseError::InvalidLength {
                expected: result.len() * 2,
                actual: s.len(),
            }
        }
    })?;
    Ok(())
}

/// A title ID, displayed and parsed as 16 uppercase hex digits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BinRead, BinWrite)]
pub struct TitleId(pub u64);

impl TitleId {
    /// `Application_<16hexTitleId>.cnmt` / `<hexTitleId>.nsp` naming form.
    pub fn to_lower_hex(self) -> String {
        format!("{:016x}", self.0)
    }

    /// The title id of the patch (update) title for this application.
    pub fn patch_title_id(self) -> TitleId {
        TitleId(self.0 + 0x800)
    }
}

impl Debug for TitleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}
impl Display for TitleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl FromStr for TitleId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = [0; 0x8];
        hex::decode_to_slice(s, &mut result).map_err(|e| match e {
            FromHexError::InvalidHexCharacter { c, index } => {
                IdParseError::InvalidChar { char: c, index }
            }
            FromHexError::OddLength | FromHexError::InvalidStringLength => {
                IdParseError::InvalidLength {
                    expected: 16,
                    actual: s.len(),
                }
            }
        })?;
        Ok(TitleId(u64::from_be_bytes(result)))
    }
}

impl From<u64> for TitleId {
    fn from(v: u64) -> Self {
        TitleId(v)
    }
}

/// The first 16 bytes of an NCA's SHA-256 hash, used as the file id (`<ncaId>.nca`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BinRead, BinWrite)]
pub struct NcaId(pub HexData<0x10>);

impl Debug for NcaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 .0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
impl Display for NcaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl NcaId {
    pub fn from_hash(hash: &[u8; 0x20]) -> Self {
        let mut id = [0; 0x10];
        id.copy_from_slice(&hash[..0x10]);
        NcaId(HexData(id))
    }

    pub fn filename(&self) -> String {
        format!("{}.nca", self)
    }

    pub fn cnmt_filename(&self) -> String {
        format!("{}.cnmt.nca", self)
    }
}

impl FromStr for NcaId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = [0; 0x10];
        parse_id(s, &mut result).map(|_| NcaId(HexData(result)))
    }
}
