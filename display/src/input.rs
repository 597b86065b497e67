use crate::error::DisplayError;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerAction {
    Press,
    Move,
    Release,
}

impl PointerAction {
    /// Maps platform touch codes (down = 0, move = 1, up = 2). Other codes are ignored.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(PointerAction::Press),
            1 => Some(PointerAction::Move),
            2 => Some(PointerAction::Release),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            PointerAction::Press => 0,
            PointerAction::Move => 1,
            PointerAction::Release => 2,
        }
    }
}

impl fmt::Display for PointerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointerAction::Press => write!(f, "press"),
            PointerAction::Move => write!(f, "move"),
            PointerAction::Release => write!(f, "release"),
        }
    }
}

impl FromStr for PointerAction {
    type Err = DisplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "press" | "down" => Ok(PointerAction::Press),
            "move" => Ok(PointerAction::Move),
            "release" | "up" => Ok(PointerAction::Release),
            other => other
                .parse::<i32>()
                .ok()
                .and_then(PointerAction::from_code)
                .ok_or_else(|| DisplayError::UnknownAction(s.to_string())),
        }
    }
}

/// A discrete pointer event in framebuffer coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    pub x: i32,
    pub y: i32,
    pub action: PointerAction,
}

impl PointerEvent {
    pub fn new(x: i32, y: i32, action: PointerAction) -> Self {
        Self { x, y, action }
    }

    pub fn from_code(x: i32, y: i32, code: i32) -> Option<Self> {
        PointerAction::from_code(code).map(|action| Self::new(x, y, action))
    }
}

/// Forwards pointer events to the guest's display stack.
#[async_trait]
pub trait PointerSink: Send + Sync {
    async fn send_pointer(&self, event: PointerEvent) -> Result<(), DisplayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_codes() {
        assert_eq!(PointerAction::from_code(0), Some(PointerAction::Press));
        assert_eq!(PointerAction::from_code(1), Some(PointerAction::Move));
        assert_eq!(PointerAction::from_code(2), Some(PointerAction::Release));
        assert_eq!(PointerAction::from_code(3), None);
        assert_eq!(PointerAction::from_code(-1), None);
        assert!(PointerEvent::from_code(1, 2, 5).is_none());
    }

    #[test]
    fn test_parse() {
        assert_eq!("down".parse::<PointerAction>().unwrap(), PointerAction::Press);
        assert_eq!("Move".parse::<PointerAction>().unwrap(), PointerAction::Move);
        assert_eq!("2".parse::<PointerAction>().unwrap(), PointerAction::Release);
        assert!(matches!(
            "tap".parse::<PointerAction>(),
            Err(DisplayError::UnknownAction(_))
        ));
    }

    struct Recording(Mutex<Vec<PointerEvent>>);

    #[async_trait]
    impl PointerSink for Recording {
        async fn send_pointer(&self, event: PointerEvent) -> Result<(), DisplayError> {
            self.0.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sink_is_object_safe() {
        let recording = std::sync::Arc::new(Recording(Mutex::new(Vec::new())));
        let sink: std::sync::Arc<dyn PointerSink> = recording.clone();

        sink.send_pointer(PointerEvent::new(10, 20, PointerAction::Press))
            .await
            .unwrap();
        assert_eq!(
            recording.0.lock().unwrap().as_slice(),
            &[PointerEvent::new(10, 20, PointerAction::Press)]
        );
    }
}
