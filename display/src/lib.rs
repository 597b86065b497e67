mod compositor;
mod error;
mod frame;
mod input;
mod source;
mod surface;

pub use compositor::{CompositorHandle, CompositorStats, FramebufferCompositor, TickOutcome};
pub use error::DisplayError;
pub use frame::{Frame, FramebufferLayout, PixelFormat};
pub use input::{PointerAction, PointerEvent, PointerSink};
pub use source::{FileFrameSource, FrameSource, MemoryFrameSource};
pub use surface::{DisplaySurface, RawFileSurface};
