use crate::state::BootState;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use vphone_shim::{ConsoleLine, LineSink, StreamKind};

/// Notifications for the UI context. Delivery is fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootEvent {
    State(BootState),
    Status(String),
    Console(ConsoleLine),
    /// Both guest output streams reached end of file.
    GuestExited,
}

/// Sending half of the status channel. Sends never block and never fail the caller.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<BootEvent>>,
}

impl EventSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BootEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sender whose events are only logged.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, event: BootEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("{}", message);
        self.send(BootEvent::Status(message));
    }

    pub fn state(&self, state: BootState) {
        tracing::debug!(state = %state, "Boot state changed");
        self.send(BootEvent::State(state));
    }
}

/// Forwards guest console output as events.
pub struct ConsoleForwarder {
    events: EventSender,
    open_streams: AtomicUsize,
}

impl ConsoleForwarder {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            open_streams: AtomicUsize::new(2),
        }
    }
}

impl LineSink for ConsoleForwarder {
    fn on_line(&self, line: ConsoleLine) {
        self.events.send(BootEvent::Console(line));
    }

    fn on_closed(&self, stream: StreamKind) {
        tracing::debug!(stream = %stream, "Guest stream closed");
        if self.open_streams.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.events.status("guest process exited");
            self.events.send(BootEvent::GuestExited);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_notice_after_both_streams() {
        let (events, mut rx) = EventSender::channel();
        let forwarder = ConsoleForwarder::new(events);

        forwarder.on_line(ConsoleLine::new(StreamKind::Stdout, "hi"));
        forwarder.on_closed(StreamKind::Stdout);
        assert_eq!(
            rx.try_recv().unwrap(),
            BootEvent::Console(ConsoleLine::new(StreamKind::Stdout, "hi"))
        );
        assert!(rx.try_recv().is_err());

        forwarder.on_closed(StreamKind::Stderr);
        assert_eq!(rx.try_recv().unwrap(), BootEvent::Status("guest process exited".into()));
        assert_eq!(rx.try_recv().unwrap(), BootEvent::GuestExited);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (events, rx) = EventSender::channel();
        drop(rx);
        events.status("nobody listening");
        EventSender::detached().state(BootState::Idle);
    }
}
