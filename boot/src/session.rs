use crate::environment::GuestEnvironment;
use crate::error::BootError;
use crate::events::EventSender;
use crate::pointer::ConsolePointerSink;
use crate::state::{BootState, StateCell};
use std::process::ExitStatus;
use std::sync::Arc;
use vphone_display::{
    CompositorHandle, CompositorStats, DisplayError, DisplaySurface, FileFrameSource,
    FramebufferCompositor,
};
use vphone_shim::{ConsoleBridge, ConsoleWriter, SandboxProcessHandle};

/// A running guest. Exists only after a confirmed spawn.
///
/// Dropping the session without [`teardown`](Self::teardown) still kills the
/// runtime process, but skips the graceful signal and the final state change.
pub struct GuestSession {
    env: Arc<GuestEnvironment>,
    process: SandboxProcessHandle,
    console: ConsoleBridge,
    writer: ConsoleWriter,
    compositor: Option<CompositorHandle>,
    state: StateCell,
    events: EventSender,
}

impl std::fmt::Debug for GuestSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestSession")
            .field("process", &self.process)
            .field("state", &self.state.get())
            .field("display", &self.compositor.is_some())
            .finish_non_exhaustive()
    }
}

impl GuestSession {
    pub(crate) fn new(
        env: Arc<GuestEnvironment>,
        process: SandboxProcessHandle,
        console: ConsoleBridge,
        state: StateCell,
        events: EventSender,
    ) -> Self {
        let writer = console.writer();
        Self {
            env,
            process,
            console,
            writer,
            compositor: None,
            state,
            events,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn is_alive(&mut self) -> bool {
        self.process.is_alive()
    }

    pub fn state(&self) -> BootState {
        self.state.get()
    }

    /// A cloneable writer for sending from other tasks.
    pub fn console(&self) -> ConsoleWriter {
        self.writer.clone()
    }

    /// Sends one command line to the guest. Failures are also reported as a status line.
    pub async fn send(&self, text: &str) -> Result<(), BootError> {
        self.writer.send(text).await.map_err(|e| {
            self.events.status(format!("shell error: {}", e));
            BootError::from(e)
        })
    }

    pub fn pointer_sink(&self) -> ConsolePointerSink {
        ConsolePointerSink::new(self.writer.clone())
    }

    /// Starts presenting the guest framebuffer on `surface`.
    pub fn start_display(&mut self, surface: impl DisplaySurface) -> Result<(), BootError> {
        let Some(fb) = &self.env.framebuffer else {
            return Err(BootError::Config("no framebuffer configured".to_string()));
        };

        if self.compositor.is_some() {
            return Err(DisplayError::SurfaceUnavailable("a display is already attached".into()).into());
        }

        let compositor =
            FramebufferCompositor::new(FileFrameSource::new(&fb.path), surface, fb.layout);
        self.compositor = Some(compositor.spawn(fb.interval));
        self.events
            .status(format!("Display attached to {}", fb.path.display()));
        Ok(())
    }

    /// Stops the compositor, if one is running, after its in-flight tick.
    pub async fn stop_display(&mut self) -> Option<CompositorStats> {
        let stats = self.compositor.take()?.stop().await;
        tracing::info!(presented = stats.presented, skipped = stats.skipped, "Display detached");
        Some(stats)
    }

    /// Stops the display, closes guest input, terminates and reaps the runtime,
    /// then waits for the console readers to drain.
    pub async fn teardown(mut self) -> Result<ExitStatus, BootError> {
        self.stop_display().await;
        self.writer.close().await;

        let status = match self.process.terminate(self.env.teardown_grace).await {
            Ok(status) => status,
            Err(e) => {
                let reason = e.to_string();
                if self.state.transition(BootState::Failed(reason.clone())).is_ok() {
                    self.events.state(BootState::Failed(reason));
                }
                return Err(e.into());
            }
        };

        self.console.join_within(self.env.teardown_grace).await;

        self.state.transition(BootState::Terminated)?;
        self.events.state(BootState::Terminated);
        self.events.status(format!("Guest terminated ({})", status));
        Ok(status)
    }
}
