//! Local and remote media handles.
//!
//! A [`MediaTrack`] is a cheap cloneable handle: every clone observes the
//! same enabled flag and the same `ended` state, the way a capture track is
//! shared between a self-view tile and the peer senders.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Which physical camera is in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[default]
    Front,
    Rear,
}

impl FacingMode {
    pub fn opposite(self) -> Self {
        match self {
            FacingMode::Front => FacingMode::Rear,
            FacingMode::Rear => FacingMode::Front,
        }
    }
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), kind, label)
    }

    pub fn with_id(id: impl Into<String>, kind: TrackKind, label: impl Into<String>) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                label: label.into(),
                enabled: AtomicBool::new(true),
                ended,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Mutes or unmutes the track at the source. No renegotiation happens.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Releases the underlying source. Stopping twice is a no-op.
    pub fn stop(&self) {
        if !self.inner.ended.send_replace(true) {
            log::debug!("{} track {} stopped", self.kind(), self.id());
        }
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Resolves once the track has ended, either through [`MediaTrack::stop`]
    /// or because the source went away out-of-band.
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// True when both handles point at the same underlying track.
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.same_track(other)
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// An ordered set of tracks, at most one per kind in practice.
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), tracks)
    }

    pub fn with_id(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.track(TrackKind::Audio)
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.track(TrackKind::Video)
    }

    pub fn count(&self, kind: TrackKind) -> usize {
        self.tracks.iter().filter(|t| t.kind() == kind).count()
    }

    /// Detaches every video track and attaches `track` in their place.
    /// The detached tracks are returned so the caller decides whether to stop them.
    pub fn replace_video_track(&mut self, track: MediaTrack) -> Vec<MediaTrack> {
        let (old, kept): (Vec<_>, Vec<_>) = self
            .tracks
            .drain(..)
            .partition(|t| t.kind() == TrackKind::Video);
        self.tracks = kept;
        self.tracks.push(track);
        old
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Constraints for a camera capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing: Option<FacingMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub audio: bool,
    pub video: Option<VideoConstraints>,
}

/// What the platform can do. Each flag gates the matching control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub facing_mode: bool,
    pub screen_capture: bool,
    pub mobile: bool,
}

/// Capture primitives of the host platform.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Camera and/or microphone capture.
    async fn user_media(&self, request: CaptureRequest) -> Result<MediaStream>;

    /// Screen capture. Only called when `capabilities().screen_capture` is set.
    async fn display_media(&self) -> Result<MediaStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_enabled_flag() {
        let track = MediaTrack::new(TrackKind::Audio, "mic");
        let clone = track.clone();
        clone.set_enabled(false);
        assert!(!track.is_enabled());
        assert!(track.same_track(&clone));
        assert!(!track.same_track(&MediaTrack::new(TrackKind::Audio, "mic")));
    }

    #[test]
    fn replace_video_keeps_audio() {
        let audio = MediaTrack::new(TrackKind::Audio, "mic");
        let camera = MediaTrack::new(TrackKind::Video, "camera");
        let screen = MediaTrack::new(TrackKind::Video, "screen");
        let mut stream = MediaStream::new(vec![audio.clone(), camera.clone()]);

        let old = stream.replace_video_track(screen.clone());

        assert_eq!(old, vec![camera]);
        assert_eq!(stream.count(TrackKind::Video), 1);
        assert_eq!(stream.count(TrackKind::Audio), 1);
        assert_eq!(stream.video_track(), Some(&screen));
        assert_eq!(stream.audio_track(), Some(&audio));
    }

    #[tokio::test]
    async fn ended_resolves_after_stop() {
        let track = MediaTrack::new(TrackKind::Video, "camera");
        let waiter = {
            let track = track.clone();
            tokio::spawn(async move { track.ended().await })
        };
        track.stop();
        track.stop();
        waiter.await.unwrap();
        assert!(track.is_ended());
    }

    #[test]
    fn facing_mode_flips() {
        assert_eq!(FacingMode::Front.opposite(), FacingMode::Rear);
        assert_eq!(FacingMode::Rear.opposite().opposite(), FacingMode::Rear);
    }
}
