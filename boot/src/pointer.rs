use async_trait::async_trait;
use vphone_display::{DisplayError, PointerAction, PointerEvent, PointerSink};
use vphone_shim::ConsoleWriter;

pub const DEFAULT_GUEST_DISPLAY: &str = ":1";

/// Replays pointer events in the guest with `xdotool`, typed over the console.
#[derive(Clone)]
pub struct ConsolePointerSink {
    writer: ConsoleWriter,
    display: String,
}

impl ConsolePointerSink {
    pub fn new(writer: ConsoleWriter) -> Self {
        Self {
            writer,
            display: DEFAULT_GUEST_DISPLAY.to_string(),
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = display.into();
        self
    }

    pub fn command_for(&self, event: &PointerEvent) -> String {
        xdotool_command(&self.display, event)
    }
}

fn xdotool_command(display: &str, event: &PointerEvent) -> String {
    let x = event.x.max(0);
    let y = event.y.max(0);
    let button = match event.action {
        PointerAction::Press => " mousedown 1",
        PointerAction::Move => "",
        PointerAction::Release => " mouseup 1",
    };
    format!("DISPLAY={} xdotool mousemove {} {}{}", display, x, y, button)
}

#[async_trait]
impl PointerSink for ConsolePointerSink {
    async fn send_pointer(&self, event: PointerEvent) -> Result<(), DisplayError> {
        let command = self.command_for(&event);
        tracing::trace!(command = %command, "Forwarding pointer event");
        self.writer
            .send(&command)
            .await
            .map_err(|e| DisplayError::Forward(e.to_string()))
    }
}
