use std::fmt;

use thiserror::Error;

/// Device capability the core refuses to use when the platform lacks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    FacingMode,
    ScreenCapture,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::FacingMode => write!(f, "camera flipping"),
            Capability::ScreenCapture => write!(f, "screen sharing"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RoomError {
    /// Camera, microphone or screen access was refused.
    #[error("permission denied for {0}")]
    PermissionDenied(String),

    #[error("{0} is not supported on this device")]
    UnsupportedCapability(Capability),

    /// One peer's sender rejected a track swap.
    #[error("track replacement failed for peer {peer_id}: {reason}")]
    TrackReplacement { peer_id: String, reason: String },

    #[error("media acquisition failed: {0}")]
    Acquisition(String),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("peer transport error: {0}")]
    Transport(String),

    #[error("the room has already been left")]
    Left,
}

impl RoomError {
    /// Short actionable text for the person in the room.
    pub fn user_message(&self) -> String {
        match self {
            RoomError::PermissionDenied(_) => {
                "Failed to access camera and microphone. Please check your permissions.".into()
            }
            RoomError::UnsupportedCapability(capability) => {
                format!("Sorry, {capability} is not supported on this device.")
            }
            RoomError::TrackReplacement { .. } => {
                "Some participants may still see your previous video.".into()
            }
            RoomError::Acquisition(_) => "Failed to switch video source. Please try again.".into(),
            RoomError::InvalidState(what) => format!("Not possible right now: {what}."),
            RoomError::Signaling(_) | RoomError::Transport(_) => {
                "Connection problem. Please check your network and rejoin.".into()
            }
            RoomError::Left => "You have already left this room.".into(),
        }
    }
}

impl From<webrtc::Error> for RoomError {
    fn from(err: webrtc::Error) -> Self {
        RoomError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for RoomError {
    fn from(err: serde_json::Error) -> Self {
        RoomError::Signaling(err.to_string())
    }
}

pub type Result<T, E = RoomError> = std::result::Result<T, E>;
