use crate::error::DisplayError;
use crate::frame::FramebufferLayout;
use crate::source::FrameSource;
use crate::surface::DisplaySurface;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What a single compositor tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Presented,
    /// The guest has not written a buffer yet.
    NoFrame,
    /// The buffer was short or malformed and was dropped whole.
    Incomplete,
    SurfaceUnavailable,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositorStats {
    pub ticks: u64,
    pub presented: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Polls a guest pixel buffer and pushes complete frames to a surface.
///
/// Lossy by construction: each tick reads whatever buffer is current and
/// nothing is queued between ticks.
pub struct FramebufferCompositor {
    source: Box<dyn FrameSource>,
    surface: Box<dyn DisplaySurface>,
    layout: FramebufferLayout,
    stats: CompositorStats,
}

impl FramebufferCompositor {
    pub fn new(
        source: impl FrameSource,
        surface: impl DisplaySurface,
        layout: FramebufferLayout,
    ) -> Self {
        Self {
            source: Box::new(source),
            surface: Box::new(surface),
            layout,
            stats: CompositorStats::default(),
        }
    }

    pub fn stats(&self) -> CompositorStats {
        self.stats
    }

    /// Runs one blocking read/decode/present cycle.
    pub fn tick(&mut self) -> TickOutcome {
        self.stats.ticks += 1;
        let outcome = self.compose();

        match outcome {
            TickOutcome::Presented => self.stats.presented += 1,
            TickOutcome::Failed => self.stats.failed += 1,
            _ => self.stats.skipped += 1,
        }
        outcome
    }

    fn compose(&mut self) -> TickOutcome {
        let buf = match self.source.latest() {
            Ok(Some(buf)) => buf,
            Ok(None) => return TickOutcome::NoFrame,
            Err(e) => {
                tracing::debug!("Failed to read framebuffer: {}", e);
                return TickOutcome::Failed;
            }
        };

        let Some(frame) = self.layout.decode(&buf) else {
            tracing::trace!(len = buf.len(), "Dropping incomplete framebuffer");
            return TickOutcome::Incomplete;
        };

        match self.surface.present(&frame) {
            Ok(()) => TickOutcome::Presented,
            Err(DisplayError::SurfaceUnavailable(reason)) => {
                tracing::trace!("Display surface not ready: {}", reason);
                TickOutcome::SurfaceUnavailable
            }
            Err(e) => {
                tracing::debug!("Failed to present frame: {}", e);
                TickOutcome::Failed
            }
        }
    }

    /// Runs the poll loop on the tokio runtime until stopped.
    pub fn spawn(self, interval: Duration) -> CompositorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut compositor = self;
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let tick = tokio::task::spawn_blocking(move || {
                            compositor.tick();
                            compositor
                        });
                        match tick.await {
                            Ok(c) => compositor = c,
                            Err(e) => {
                                tracing::warn!("Compositor tick panicked: {}", e);
                                return CompositorStats::default();
                            }
                        }
                    }
                }
            }

            tracing::debug!(stats = ?compositor.stats, "Compositor stopped");
            compositor.stats
        });

        tracing::info!(interval = ?interval, "Framebuffer compositor started");
        CompositorHandle { stop: stop_tx, task }
    }
}

/// Owner of a running compositor loop.
pub struct CompositorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<CompositorStats>,
}

impl CompositorHandle {
    /// Signals the loop and waits for the in-flight tick to finish.
    pub async fn stop(self) -> CompositorStats {
        let _ = self.stop.send(true);
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!("Compositor task failed: {}", e);
                CompositorStats::default()
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, PixelFormat};
    use crate::source::{FileFrameSource, MemoryFrameSource};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct CaptureSurface {
        frames: Arc<Mutex<Vec<Frame>>>,
        unavailable: bool,
    }

    impl DisplaySurface for CaptureSurface {
        fn present(&mut self, frame: &Frame) -> Result<(), DisplayError> {
            if self.unavailable {
                return Err(DisplayError::SurfaceUnavailable("detached".to_string()));
            }
            self.frames.lock().unwrap().push(frame.clone());
            Ok(())
        }
    }

    fn layout() -> FramebufferLayout {
        FramebufferLayout::new(2, 2, PixelFormat::Rgba8888)
    }

    #[test]
    fn test_tick_skips_until_frame_exists() {
        let dir = TempDir::new().unwrap();
        let fb = dir.path().join("fb0");
        let surface = CaptureSurface::default();
        let mut compositor =
            FramebufferCompositor::new(FileFrameSource::new(&fb), surface.clone(), layout());

        assert_eq!(compositor.tick(), TickOutcome::NoFrame);

        std::fs::write(&fb, [7u8; 15]).unwrap();
        assert_eq!(compositor.tick(), TickOutcome::Incomplete);
        assert!(surface.frames.lock().unwrap().is_empty());

        std::fs::write(&fb, [7u8; 16]).unwrap();
        assert_eq!(compositor.tick(), TickOutcome::Presented);

        let frames = surface.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pixels, vec![7u8; 16]);

        let stats = compositor.stats();
        assert_eq!((stats.ticks, stats.presented, stats.skipped), (3, 1, 2));
    }

    #[test]
    fn test_unavailable_surface_skips_tick() {
        let source = MemoryFrameSource::new();
        source.push(vec![0u8; 16]);
        let surface = CaptureSurface {
            unavailable: true,
            ..Default::default()
        };
        let mut compositor = FramebufferCompositor::new(source, surface, layout());

        assert_eq!(compositor.tick(), TickOutcome::SurfaceUnavailable);
        assert_eq!(compositor.stats().failed, 0);
    }

    #[tokio::test]
    async fn test_loop_presents_latest_and_stops() {
        let source = MemoryFrameSource::new();
        let surface = CaptureSurface::default();
        source.push(vec![1u8; 16]);
        source.push(vec![2u8; 16]);

        let handle = FramebufferCompositor::new(source.clone(), surface.clone(), layout())
            .spawn(Duration::from_millis(5));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while surface.frames.lock().unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "no frame presented");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stats = handle.stop().await;
        assert_eq!(stats.presented, 1);
        assert!(stats.ticks >= 1);

        let frames = surface.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pixels, vec![2u8; 16]);
    }
}
