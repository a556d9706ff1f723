//! XCI gamecard image locator: a `"HEAD"` magic at offset 0x100 followed by
//! a root HFS0 partition (normally at 0xF000, falling back to 0x10000 on
//! older/variant layouts) whose entries are themselves sub-HFS0 partitions.
//! The `"secure"` root entry carries the actual content file map.

use crate::formats::hfs0::Hfs0;
use snafu::{OptionExt, Snafu};

const HEAD_MAGIC_OFFSET: usize = 0x100;
const HEAD_MAGIC: [u8; 4] = *b"HEAD";
const ROOT_HFS0_OFFSET_PRIMARY: usize = 0xF000;
const ROOT_HFS0_OFFSET_FALLBACK: usize = 0x10000;

#[derive(Snafu, Debug)]
pub enum XciError {
    #[snafu(display("truncated XCI image"))]
    Truncated,
    #[snafu(display("invalid XCI HEAD magic"))]
    InvalidMagic,
    #[snafu(display("could not locate the root HFS0 partition"))]
    RootHfs0NotFound,
    #[snafu(display("the root HFS0 has no \"secure\" partition"))]
    NoSecurePartition,
}

pub struct Xci<'a> {
    data: &'a [u8],
    pub root: Hfs0,
    pub root_offset: usize,
}

impl<'a> Xci<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, XciError> {
        if data.len() < HEAD_MAGIC_OFFSET + 4 {
            return TruncatedSnafu.fail();
        }
        if data[HEAD_MAGIC_OFFSET..HEAD_MAGIC_OFFSET + 4] != HEAD_MAGIC {
            return InvalidMagicSnafu.fail();
        }

        for root_offset in [ROOT_HFS0_OFFSET_PRIMARY, ROOT_HFS0_OFFSET_FALLBACK] {
            if let Some(slice) = data.get(root_offset..) {
                if let Ok(root) = Hfs0::parse(slice) {
                    return Ok(Xci {
                        data,
                        root,
                        root_offset,
                    });
                }
            }
        }
        RootHfs0NotFoundSnafu.fail()
    }

    /// The "secure" sub-partition, which carries the actual content files.
    pub fn secure_partition(&self) -> Result<Hfs0, XciError> {
        let entry = self
            .root
            .entries
            .iter()
            .find(|e| e.name == "secure")
            .context(NoSecurePartitionSnafu)?;
        let start = self.root_offset + entry.offset as usize;
        let end = start + entry.size as usize;
        let sub = self.data.get(start..end).context(TruncatedSnafu)?;
        Hfs0::parse(sub).map_err(|_| XciError::NoSecurePartition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_head_magic() {
        let data = vec![0u8; 0x20000];
        assert!(matches!(Xci::parse(&data), Err(XciError::InvalidMagic)));
    }

    #[test]
    fn rejects_truncated_image() {
        let data = vec![0u8; 0x10];
        assert!(matches!(Xci::parse(&data), Err(XciError::Truncated)));
    }
}
