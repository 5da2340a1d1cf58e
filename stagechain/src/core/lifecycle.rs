//! Stage lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a stage within one scenario run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// The stage has not been applied yet.
    #[default]
    Uninitialized,
    /// The stage applied successfully and its outputs were captured.
    Applied,
    /// The stage's resources were torn down.
    Destroyed,
    /// Applying the stage failed; resources may be partially created.
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Applied => write!(f, "applied"),
            Self::Destroyed => write!(f, "destroyed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl LifecycleState {
    /// Returns true if moving to `next` is permitted.
    ///
    /// A failed stage may still be destroyed, since apply can leave
    /// partially created resources behind.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Applied)
                | (Self::Uninitialized, Self::Failed)
                | (Self::Applied, Self::Destroyed)
                | (Self::Failed, Self::Destroyed)
        )
    }

    /// Returns true if cloud resources may exist for this stage.
    #[must_use]
    pub fn holds_resources(self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }
}
