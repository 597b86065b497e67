pub mod assets;
pub mod boot;

pub use assets::list_assets;
pub use boot::{BootArgs, boot, print_config};
