//! Per-service run state machine.
//!
//! ```text
//! IDLE -> LOCKING -> BACKING_UP -> APPLYING -> VERIFYING -> UNLOCKING -> DONE
//!            |                                                ^
//!            +------------------(nothing to do)---------------+
//! any non-terminal -> FAILED | BLOCKED
//! ```

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Idle,
    Locking,
    BackingUp,
    Applying,
    Verifying,
    Unlocking,
    Done,
    Failed,
    Blocked,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Locking => "LOCKING",
            Self::BackingUp => "BACKING_UP",
            Self::Applying => "APPLYING",
            Self::Verifying => "VERIFYING",
            Self::Unlocking => "UNLOCKING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Blocked => "BLOCKED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Blocked)
    }

    pub fn can_transition_to(&self, next: ServiceState) -> bool {
        use ServiceState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (*self, next),
            (_, Failed)
                | (_, Blocked)
                | (Idle, Locking)
                | (Locking, BackingUp)
                | (Locking, Unlocking)
                | (BackingUp, Applying)
                | (Applying, Verifying)
                | (Verifying, Unlocking)
                | (Unlocking, Done)
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
