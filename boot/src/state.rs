use crate::error::BootError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Boot sequence states. `Terminated` and `Failed` are absorbing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootState {
    Idle,
    ProvisioningRuntime,
    ProvisioningRootfs,
    Extracting,
    Launching,
    Running,
    Terminated,
    Failed(String),
}

impl BootState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BootState::Terminated | BootState::Failed(_))
    }

    /// Forward-only transitions. `Extracting` may be skipped when the rootfs is already extracted.
    pub fn can_transition_to(&self, next: &BootState) -> bool {
        use BootState::*;

        match (self, next) {
            (current, Failed(_)) => !current.is_terminal(),
            (Idle, ProvisioningRuntime)
            | (ProvisioningRuntime, ProvisioningRootfs)
            | (ProvisioningRootfs, Extracting)
            | (ProvisioningRootfs, Launching)
            | (Extracting, Launching)
            | (Launching, Running)
            | (Running, Terminated) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootState::Idle => write!(f, "idle"),
            BootState::ProvisioningRuntime => write!(f, "provisioning runtime"),
            BootState::ProvisioningRootfs => write!(f, "provisioning rootfs"),
            BootState::Extracting => write!(f, "extracting"),
            BootState::Launching => write!(f, "launching"),
            BootState::Running => write!(f, "running"),
            BootState::Terminated => write!(f, "terminated"),
            BootState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Shared, observable boot state. Every change is validated against the state machine.
#[derive(Debug, Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<BootState>>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(BootState::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> BootState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BootState> {
        self.tx.subscribe()
    }

    /// Atomically moves `Idle` to `ProvisioningRuntime`, rejecting any concurrent or repeated start.
    pub fn begin(&self) -> Result<(), BootError> {
        let mut rejected = None;
        self.tx.send_if_modified(|state| {
            if *state == BootState::Idle {
                *state = BootState::ProvisioningRuntime;
                true
            } else {
                rejected = Some(state.clone());
                false
            }
        });

        match rejected {
            Some(state) => Err(BootError::AlreadyStarted(state)),
            None => Ok(()),
        }
    }

    pub fn transition(&self, next: BootState) -> Result<(), BootError> {
        let mut rejected = None;
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(&next) {
                *state = next.clone();
                true
            } else {
                rejected = Some(state.clone());
                false
            }
        });

        match rejected {
            Some(from) => Err(BootError::InvalidTransition { from, to: next }),
            None => Ok(()),
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_without_skips() {
        let cell = StateCell::new();
        cell.begin().unwrap();
        cell.transition(BootState::ProvisioningRootfs).unwrap();

        let err = cell.transition(BootState::Running).unwrap_err();
        assert!(matches!(
            err,
            BootError::InvalidTransition { from: BootState::ProvisioningRootfs, to: BootState::Running }
        ));

        cell.transition(BootState::Extracting).unwrap();
        cell.transition(BootState::Launching).unwrap();
        cell.transition(BootState::Running).unwrap();
        cell.transition(BootState::Terminated).unwrap();
        assert_eq!(cell.get(), BootState::Terminated);
    }

    #[test]
    fn test_extracting_may_be_skipped() {
        assert!(BootState::ProvisioningRootfs.can_transition_to(&BootState::Launching));
        assert!(!BootState::ProvisioningRuntime.can_transition_to(&BootState::Extracting));
        assert!(!BootState::Running.can_transition_to(&BootState::Launching));
    }

    #[test]
    fn test_failed_is_absorbing() {
        let cell = StateCell::new();
        cell.begin().unwrap();
        cell.transition(BootState::Failed("no network".into())).unwrap();

        assert!(cell.transition(BootState::Failed("again".into())).is_err());
        assert!(cell.transition(BootState::Terminated).is_err());
        assert!(!BootState::Terminated.can_transition_to(&BootState::Failed("x".into())));
        assert_eq!(cell.get(), BootState::Failed("no network".into()));
    }

    #[test]
    fn test_begin_rejects_second_start() {
        let cell = StateCell::new();
        let other = cell.clone();

        cell.begin().unwrap();
        let err = other.begin().unwrap_err();
        assert!(matches!(err, BootError::AlreadyStarted(BootState::ProvisioningRuntime)));
    }

    #[tokio::test]
    async fn test_subscribers_observe_changes() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();
        assert_eq!(*rx.borrow(), BootState::Idle);

        cell.begin().unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), BootState::ProvisioningRuntime);

        // Rejected transitions do not wake subscribers.
        let _ = cell.transition(BootState::Running);
        assert!(!rx.has_changed().unwrap());
    }
}
