//! Tracking state machine.

use serde::{Deserialize, Serialize};

/// Per-frame tracking status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackingState {
    /// No keyframe yet.
    #[default]
    NotInitialized,
    /// Pose estimated from this frame's correspondences.
    Ok,
    /// Pose estimation failed on a few consecutive frames; the last pose is held.
    RecentlyLost,
    /// Pose estimation failed for too long; the last pose is held.
    Lost,
}

impl TrackingState {
    /// Next state after a frame whose pose could not be estimated.
    ///
    /// `failures` counts consecutive failed frames including this one.
    pub fn after_failure(self, failures: u32, lost_after: u32) -> Self {
        match self {
            Self::NotInitialized => Self::NotInitialized,
            _ if failures >= lost_after => Self::Lost,
            _ => Self::RecentlyLost,
        }
    }

    pub fn is_tracking(self) -> bool {
        self == Self::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_transitions() {
        assert_eq!(TrackingState::Ok.after_failure(1, 5), TrackingState::RecentlyLost);
        assert_eq!(TrackingState::RecentlyLost.after_failure(4, 5), TrackingState::RecentlyLost);
        assert_eq!(TrackingState::RecentlyLost.after_failure(5, 5), TrackingState::Lost);
        assert_eq!(TrackingState::NotInitialized.after_failure(9, 5), TrackingState::NotInitialized);
        assert!(!TrackingState::Lost.is_tracking());
    }
}
