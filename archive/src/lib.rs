mod error;
mod extract;
pub mod rootfs;
mod types;

pub use error::ArchiveError;
pub use extract::{extract, extract_async, extract_from};
pub use types::*;
