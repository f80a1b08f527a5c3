//! Lifecycle state machine
//!
//! States only ever move forward. A transition to an earlier (or the same)
//! state is rejected, so every state is entered at most once.

use std::sync::atomic::{AtomicU8, Ordering};
use strum_macros::{AsRefStr, Display, EnumIter};

/// Where a managed runtime is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, AsRefStr, EnumIter)]
#[repr(u8)]
pub enum LifecycleState {
    Created = 0,
    Initializing = 1,
    Configuring = 2,
    Starting = 3,
    Running = 4,
    StopRequested = 5,
    Stopping = 6,
    Stopped = 7,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Initializing,
            2 => Self::Configuring,
            3 => Self::Starting,
            4 => Self::Running,
            5 => Self::StopRequested,
            6 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    /// True once shutdown has been requested, whatever happened after
    pub fn is_shutdown_requested(self) -> bool {
        self >= Self::StopRequested
    }
}

/// Atomic holder for a [`LifecycleState`] that only moves forward
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(LifecycleState::Created as u8))
    }

    pub(crate) fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to` if it is strictly ahead of the current state.
    ///
    /// Returns the state observed before the attempt in both cases.
    pub(crate) fn advance(&self, to: LifecycleState) -> Result<LifecycleState, LifecycleState> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < to as u8).then_some(to as u8)
            })
            .map(LifecycleState::from_u8)
            .map_err(LifecycleState::from_u8)
    }
}
