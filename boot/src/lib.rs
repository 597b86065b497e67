mod config;
mod environment;
mod error;
mod events;
mod orchestrator;
mod pointer;
mod session;
mod state;

pub use config::{ArtifactConfig, BootConfig, FramebufferConfig};
pub use environment::{FramebufferSettings, GuestEnvironment};
pub use error::BootError;
pub use events::{BootEvent, ConsoleForwarder, EventSender};
pub use orchestrator::BootOrchestrator;
pub use pointer::ConsolePointerSink;
pub use session::GuestSession;
pub use state::{BootState, StateCell};
