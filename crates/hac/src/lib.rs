pub use binrw;
pub use snafu;

mod brw_utils;
pub mod build_nsp;
pub mod crypto;
pub mod formats;
mod hexstring;
pub mod ids;
pub mod sink;
