mod console;
mod error;
mod launcher;
mod process;
mod types;

pub use console::{ConsoleBridge, ConsoleWriter, LineSink};
pub use error::ShimError;
pub use launcher::{SandboxLauncher, DEFAULT_FAKE_ROOT_FLAG};
pub use process::SandboxProcessHandle;
pub use types::*;
