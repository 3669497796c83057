//! Local capture state machine: camera (front/rear) and screen share.

use std::future::Future;
use std::sync::Arc;

use crate::config::RoomConfig;
use crate::error::{Capability, Result, RoomError};
use crate::event::{EventSender, RoomEvent};
use crate::media::{
    Capabilities, CaptureRequest, FacingMode, MediaDevices, MediaStream, MediaTrack, TrackKind,
    VideoConstraints,
};
use crate::peer::PeerMeshManager;
use crate::registry::ParticipantRegistry;
use crate::session::Session;
use crate::utils::TaskHandle;

pub struct MediaSourceController {
    devices: Arc<dyn MediaDevices>,
    events: EventSender,
    ideal_width: u32,
    ideal_height: u32,
}

impl MediaSourceController {
    pub fn new(devices: Arc<dyn MediaDevices>, events: EventSender, config: &RoomConfig) -> Self {
        Self {
            devices,
            events,
            ideal_width: config.ideal_width,
            ideal_height: config.ideal_height,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.devices.capabilities()
    }

    fn camera(&self, facing: FacingMode, audio: bool) -> CaptureRequest {
        CaptureRequest {
            audio,
            video: Some(VideoConstraints {
                ideal_width: self.ideal_width,
                ideal_height: self.ideal_height,
                facing: Some(facing),
            }),
        }
    }

    /// Camera and microphone for joining the room.
    pub async fn acquire_initial(&self) -> Result<MediaStream> {
        let stream = self
            .devices
            .user_media(self.camera(FacingMode::default(), true))
            .await?;
        if let Some(video) = stream.video_track() {
            log::info!("local video ready: {}", video.label());
        }
        Ok(stream)
    }

    /// Replaces the local video track with the one produced by `acquire`.
    ///
    /// Nothing is touched until acquisition succeeds. After that the old
    /// track is stopped and detached, the self-view follows the new one and
    /// every peer sender is switched; a peer that refuses is only logged.
    /// The audio track is left alone.
    pub async fn switch_source<F>(
        &self,
        session: &mut Session,
        registry: &mut ParticipantRegistry,
        mesh: &PeerMeshManager,
        acquire: F,
    ) -> Result<MediaStream>
    where
        F: Future<Output = Result<MediaStream>>,
    {
        let stream = acquire.await.map_err(|err| {
            log::error!("switch_source: acquiring new source failed: {err}");
            err
        })?;
        let Some(video) = stream.video_track().cloned() else {
            stream.stop_all();
            return Err(RoomError::Acquisition("new source has no video track".into()));
        };

        if let Some(previous) = session.local_stream.video_track() {
            video.set_enabled(previous.is_enabled());
        }
        for old in session.local_stream.replace_video_track(video.clone()) {
            old.stop();
        }
        registry.update_local_stream(session.local_stream.clone());

        let failures = mesh.replace_outbound_video_track(&video).await;
        if !failures.is_empty() {
            log::warn!(
                "switch_source: {} of {} peers kept the previous track",
                failures.len(),
                mesh.len()
            );
        }
        log::info!("local video switched to {}", video.label());
        Ok(stream)
    }

    pub async fn flip_camera(
        &self,
        session: &mut Session,
        registry: &mut ParticipantRegistry,
        mesh: &PeerMeshManager,
    ) -> Result<FacingMode> {
        if !self.capabilities().facing_mode {
            return Err(RoomError::UnsupportedCapability(Capability::FacingMode));
        }
        if session.is_screen_sharing {
            return Err(RoomError::InvalidState(
                "the camera cannot be flipped while sharing the screen",
            ));
        }

        let facing = session.facing_mode.opposite();
        let acquire = self.devices.user_media(self.camera(facing, false));
        self.switch_source(session, registry, mesh, acquire).await?;
        session.facing_mode = facing;
        log::info!("camera flipped to {facing:?}");
        Ok(facing)
    }

    pub async fn start_screen_share(
        &self,
        session: &mut Session,
        registry: &mut ParticipantRegistry,
        mesh: &PeerMeshManager,
    ) -> Result<()> {
        if session.is_screen_sharing {
            return Ok(());
        }
        if !self.capabilities().screen_capture {
            return Err(RoomError::UnsupportedCapability(Capability::ScreenCapture));
        }

        let screen = self.devices.display_media().await?;
        let screen = self
            .switch_source(session, registry, mesh, std::future::ready(Ok(screen)))
            .await?;

        if let Some(track) = screen.video_track() {
            session.screen_end_hook = Some(self.watch_screen_end(track.clone()));
        }
        session.screen_stream = Some(screen);
        session.is_screen_sharing = true;
        registry.set_local_mirrored(false);
        log::info!("screen sharing started");
        Ok(())
    }

    /// Goes back to the camera with the remembered facing mode.
    pub async fn stop_screen_share(
        &self,
        session: &mut Session,
        registry: &mut ParticipantRegistry,
        mesh: &PeerMeshManager,
    ) -> Result<()> {
        let Some(screen) = session.screen_stream.clone() else {
            return Ok(());
        };
        // our own switch ends the screen track; that must not re-trigger a stop
        session.screen_end_hook = None;

        let acquire = self
            .devices
            .user_media(self.camera(session.facing_mode, false));
        if let Err(err) = self.switch_source(session, registry, mesh, acquire).await {
            match screen.video_track().filter(|t| !t.is_ended()) {
                Some(track) => {
                    session.screen_end_hook = Some(self.watch_screen_end(track.clone()));
                }
                None => {
                    // the screen is gone too; drop it so a flip or a new share can recover
                    log::warn!("stop_screen_share: screen ended and the camera is unavailable");
                    session.screen_stream = None;
                    session.is_screen_sharing = false;
                }
            }
            return Err(err);
        }

        screen.stop_all();
        session.screen_stream = None;
        session.is_screen_sharing = false;
        registry.set_local_mirrored(true);
        log::info!("screen sharing stopped");
        Ok(())
    }

    pub async fn toggle_screen_share(
        &self,
        session: &mut Session,
        registry: &mut ParticipantRegistry,
        mesh: &PeerMeshManager,
    ) -> Result<bool> {
        if session.is_screen_sharing {
            self.stop_screen_share(session, registry, mesh).await?;
        } else {
            self.start_screen_share(session, registry, mesh).await?;
        }
        Ok(session.is_screen_sharing)
    }

    /// Mutes or unmutes the local track of `kind` at the source and updates
    /// the self-view indicator. Returns the new enabled flag.
    pub fn toggle_local_track(
        &self,
        session: &Session,
        registry: &ParticipantRegistry,
        kind: TrackKind,
    ) -> Option<bool> {
        let track = session.local_stream.track(kind)?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        registry.local_indicators().set(kind, !enabled);
        log::info!("local {kind} {}", if enabled { "on" } else { "off" });
        Some(enabled)
    }

    fn watch_screen_end(&self, track: MediaTrack) -> TaskHandle {
        let events = self.events.clone();
        TaskHandle::spawn(async move {
            track.ended().await;
            log::info!("shared screen ended outside the app");
            let _ = events.send(RoomEvent::ScreenShareEnded {
                track_id: track.id().to_owned(),
            });
        })
    }
}
