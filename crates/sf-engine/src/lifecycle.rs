use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of the background search loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No run has started since the engine was created or data was loaded.
    Idle,
    Running,
    /// Stop requested; the loop exits at its next round boundary.
    Interrupting,
    Stopped,
}

impl LifecycleState {
    /// Whether a loop thread may still be executing rounds.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Interrupting)
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Interrupting => 2,
            Self::Stopped => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Interrupting,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Interrupting => "interrupting",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Lock-free cell holding the current [`LifecycleState`].
#[derive(Debug)]
pub(crate) struct AtomicLifecycle(AtomicU8);

impl AtomicLifecycle {
    pub(crate) fn new(state: LifecycleState) -> Self {
        Self(AtomicU8::new(state.to_u8()))
    }

    pub(crate) fn load(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: LifecycleState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }

    /// Move from `current` to `new`; returns the observed state on failure.
    pub(crate) fn transition(
        &self,
        current: LifecycleState,
        new: LifecycleState,
    ) -> Result<(), LifecycleState> {
        self.0
            .compare_exchange(current.to_u8(), new.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(LifecycleState::from_u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_only_from_expected_state() {
        let state = AtomicLifecycle::new(LifecycleState::Idle);
        assert_eq!(
            state.transition(LifecycleState::Running, LifecycleState::Interrupting),
            Err(LifecycleState::Idle)
        );
        state.store(LifecycleState::Running);
        assert!(state
            .transition(LifecycleState::Running, LifecycleState::Interrupting)
            .is_ok());
        assert_eq!(state.load(), LifecycleState::Interrupting);
        assert!(state.load().is_active());
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&LifecycleState::Interrupting).unwrap(),
            "\"interrupting\""
        );
        assert_eq!(LifecycleState::Stopped.to_string(), "stopped");
    }
}
