//! Container and content formats: PFS0/HFS0/XCI framing, RomFS/IVFC data
//! layout, NPDM/CNMT/NACP metadata patching, and the NCA/NCZ content
//! archive formats built on top of them.

pub mod cnmt;
pub mod hfs0;
pub mod ivfc;
pub mod nacp;
pub mod nca;
pub mod ncz;
pub mod npdm;
pub mod pfs0;
pub mod romfs;
pub mod xci;
