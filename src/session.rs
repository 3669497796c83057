use serde::Serialize;

use crate::media::{FacingMode, MediaStream, TrackKind};
use crate::utils::TaskHandle;

/// Call state of the local participant.
///
/// Created once the local media is ready and passed by reference to every
/// component; there is no process-wide instance.
pub struct Session {
    pub self_id: String,
    pub self_name: String,
    pub room: String,
    pub local_stream: MediaStream,
    pub screen_stream: Option<MediaStream>,
    pub facing_mode: FacingMode,
    pub is_screen_sharing: bool,
    has_left: bool,
    pub grid_number: usize,
    /// Fires `ScreenShareEnded` when the shared screen goes away out-of-band.
    pub(crate) screen_end_hook: Option<TaskHandle>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub self_id: String,
    pub self_name: String,
    pub room: String,
    pub facing_mode: FacingMode,
    pub is_screen_sharing: bool,
    pub has_left: bool,
    pub grid_number: usize,
    pub audio_enabled: Option<bool>,
    pub video_enabled: Option<bool>,
}

impl Session {
    pub fn new(
        self_id: impl Into<String>,
        self_name: impl Into<String>,
        room: impl Into<String>,
        local_stream: MediaStream,
    ) -> Self {
        Self {
            self_id: self_id.into(),
            self_name: self_name.into(),
            room: room.into(),
            local_stream,
            screen_stream: None,
            facing_mode: FacingMode::default(),
            is_screen_sharing: false,
            has_left: false,
            grid_number: 1,
            screen_end_hook: None,
        }
    }

    pub fn has_left(&self) -> bool {
        self.has_left
    }

    /// One-way transition. Returns true only for the call that flipped it.
    pub fn mark_left(&mut self) -> bool {
        !std::mem::replace(&mut self.has_left, true)
    }

    pub fn track_enabled(&self, kind: TrackKind) -> Option<bool> {
        self.local_stream.track(kind).map(|t| t.is_enabled())
    }

    /// Stops every local capture, screen included.
    pub fn stop_media(&mut self) {
        self.screen_end_hook = None;
        self.local_stream.stop_all();
        if let Some(screen) = self.screen_stream.take() {
            screen.stop_all();
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            self_id: self.self_id.clone(),
            self_name: self.self_name.clone(),
            room: self.room.clone(),
            facing_mode: self.facing_mode,
            is_screen_sharing: self.is_screen_sharing,
            has_left: self.has_left,
            grid_number: self.grid_number,
            audio_enabled: self.track_enabled(TrackKind::Audio),
            video_enabled: self.track_enabled(TrackKind::Video),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaTrack;

    fn session() -> Session {
        let stream = MediaStream::new(vec![
            MediaTrack::new(TrackKind::Audio, "mic"),
            MediaTrack::new(TrackKind::Video, "camera"),
        ]);
        Session::new("me", "Me", "lobby", stream)
    }

    #[test]
    fn leaving_flips_once() {
        let mut session = session();
        assert!(!session.has_left());
        assert!(session.mark_left());
        assert!(!session.mark_left());
        assert!(session.has_left());
    }

    #[test]
    fn stop_media_ends_every_track() {
        let mut session = session();
        let screen = MediaStream::new(vec![MediaTrack::new(TrackKind::Video, "screen")]);
        session.screen_stream = Some(screen.clone());

        session.stop_media();

        assert!(session.local_stream.tracks().iter().all(|t| t.is_ended()));
        assert!(screen.tracks().iter().all(|t| t.is_ended()));
        assert!(session.screen_stream.is_none());
    }

    #[test]
    fn snapshot_reports_track_flags() {
        let session = session();
        if let Some(audio) = session.local_stream.audio_track() {
            audio.set_enabled(false);
        }
        let snapshot = session.snapshot();
        assert_eq!(snapshot.audio_enabled, Some(false));
        assert_eq!(snapshot.video_enabled, Some(true));
        assert_eq!(snapshot.grid_number, 1);
    }
}
