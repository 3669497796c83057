pub mod config;
pub mod devices;
pub mod error;
pub mod event;
pub mod layout;
pub mod media;
pub mod peer;
pub mod registry;
pub mod room;
pub mod rtc;
pub mod session;
pub mod signal;
pub mod source;
pub mod status;
pub mod utils;

pub use config::RoomConfig;
pub use error::{Capability, Result, RoomError};
pub use event::{RoomEvent, UserAction};
pub use layout::{GridId, GridLayout, GridLayoutEngine, GridRenderer, Orientation};
pub use media::{FacingMode, MediaDevices, MediaStream, MediaTrack, TrackKind};
pub use peer::{PeerConnector, PeerLink, PeerMeshManager};
pub use registry::{ParticipantRegistry, TileId};
pub use room::{Controls, Cue, Notifier, Room};
pub use session::Session;
pub use signal::{Signaling, WsSignaling};
pub use source::MediaSourceController;
pub use status::StatusIndicatorTracker;
