use std::str::FromStr;

use tokio::sync::mpsc;

use crate::peer::{IncomingCall, LinkEvent};
use crate::signal::SignalEvent;

/// Everything the room task reacts to. Producers only send; the room task
/// is the single owner of the state these events mutate.
#[derive(Debug)]
pub enum RoomEvent {
    Signal(SignalEvent),
    Incoming(IncomingCall),
    Link {
        peer_id: String,
        generation: u64,
        event: LinkEvent,
    },
    Action(UserAction),
    /// The shared screen ended outside of our control (native stop button).
    ScreenShareEnded {
        track_id: String,
    },
    Resize,
    Unload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    ToggleAudio,
    ToggleVideo,
    FlipCamera,
    ToggleScreenShare,
    Leave,
    Debug,
}

impl FromStr for UserAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mic" | "audio" => Ok(UserAction::ToggleAudio),
            "cam" | "camera" | "video" => Ok(UserAction::ToggleVideo),
            "flip" => Ok(UserAction::FlipCamera),
            "share" | "screen" => Ok(UserAction::ToggleScreenShare),
            "leave" | "quit" | "exit" => Ok(UserAction::Leave),
            "debug" => Ok(UserAction::Debug),
            other => Err(format!("unknown action `{other}`")),
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<RoomEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RoomEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
