//! Room orchestration: signaling roster, peer mesh, local media and layout
//! kept consistent on a single owner task.

use std::sync::Arc;

use serde::Serialize;

use crate::config::RoomConfig;
use crate::error::{Result, RoomError};
use crate::event::{EventReceiver, EventSender, RoomEvent, UserAction};
use crate::layout::{GridLayoutEngine, GridRenderer, GridView};
use crate::media::{FacingMode, MediaDevices, MediaStream, TrackKind};
use crate::peer::{IncomingCall, LinkEvent, PeerConnector, PeerMeshManager};
use crate::registry::{ParticipantRegistry, ParticipantSummary};
use crate::session::{Session, SessionSnapshot};
use crate::signal::{SignalEvent, Signaling};
use crate::source::MediaSourceController;
use crate::status::{Indicators, StatusIndicatorTracker};

/// Shown when the screen went away and the camera could not be restored.
pub const CAMERA_LOST: &str = "Failed to return to camera. Please refresh the page.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    ParticipantJoined,
    ParticipantLeft,
    Leave,
}

/// User-facing side effects the core does not own: sounds and alerts.
pub trait Notifier: Send + Sync {
    fn cue(&self, cue: Cue);

    fn alert(&self, message: &str);
}

/// Which controls are exposed and what state they show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Controls {
    pub mic_on: bool,
    pub camera_on: bool,
    pub flip_camera: bool,
    pub screen_share: bool,
    pub sharing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub session: SessionSnapshot,
    pub participants: Vec<ParticipantSummary>,
    pub connections: Vec<String>,
    pub grids: Vec<GridView>,
}

pub struct Room<S: Signaling> {
    config: RoomConfig,
    session: Session,
    mesh: PeerMeshManager,
    sources: MediaSourceController,
    registry: ParticipantRegistry,
    status: StatusIndicatorTracker,
    layout: GridLayoutEngine,
    signaling: Arc<S>,
    notifier: Arc<dyn Notifier>,
}

impl<S: Signaling> Room<S> {
    /// Acquires local media, shows the self-view and announces us to the room.
    ///
    /// Failing to get camera or microphone is fatal: the user is alerted and
    /// the error is returned without joining.
    pub async fn start(
        config: RoomConfig,
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn PeerConnector>,
        signaling: Arc<S>,
        renderer: Box<dyn GridRenderer>,
        notifier: Arc<dyn Notifier>,
        events: EventSender,
    ) -> Result<Self> {
        let sources = MediaSourceController::new(devices, events.clone(), &config);
        let local = match sources.acquire_initial().await {
            Ok(stream) => stream,
            Err(err) => {
                log::error!("initialize: local media unavailable: {err}");
                notifier.alert(&err.user_message());
                return Err(err);
            }
        };

        let session = Session::new(
            config.self_id.clone(),
            config.self_name.clone(),
            config.room.clone(),
            local.clone(),
        );
        let registry = ParticipantRegistry::new(&config.self_name, local, Indicators::default());
        let mut layout = GridLayoutEngine::new(renderer);
        layout.place_tile(registry.local_tile().id);

        let mut room = Self {
            status: StatusIndicatorTracker::new(config.poll_interval),
            mesh: PeerMeshManager::new(connector, events),
            config,
            session,
            sources,
            registry,
            layout,
            signaling,
            notifier,
        };
        room.recalculate_grid();

        let joined = room
            .signaling
            .join(&room.session.room, &room.session.self_id, &room.session.self_name)
            .await;
        if let Err(err) = joined {
            log::error!("initialize: join not delivered: {err}");
            room.session.stop_media();
            room.notifier.alert(&err.user_message());
            return Err(err);
        }
        log::info!(
            "joined room {} as {} ({})",
            room.session.room,
            room.session.self_name,
            room.session.self_id
        );
        Ok(room)
    }

    /// Drains events until the room is left, then waits out the leave delay.
    pub async fn run(mut self, mut events: EventReceiver) -> Result<()> {
        while let Some(event) = events.recv().await {
            if !self.handle(event).await {
                break;
            }
        }
        if self.session.has_left() {
            tokio::time::sleep(self.config.leave_delay).await;
        }
        Ok(())
    }

    /// Applies one event. Returns false once the room has been left.
    pub async fn handle(&mut self, event: RoomEvent) -> bool {
        if self.session.has_left() {
            log::debug!("ignoring {event:?} after leaving");
            return false;
        }

        match event {
            RoomEvent::Signal(SignalEvent::ParticipantJoined { id, name }) => {
                self.on_participant_joined(&id, &name).await;
            }
            RoomEvent::Signal(SignalEvent::ParticipantLeft { id, name }) => {
                self.on_participant_left(&id, &name).await;
            }
            RoomEvent::Signal(SignalEvent::Relay { from, .. }) => {
                log::debug!("negotiation payload from {from} reached the room task");
            }
            RoomEvent::Signal(SignalEvent::Closed) => {
                log::warn!("signaling closed; existing connections stay up");
            }
            RoomEvent::Incoming(call) => self.on_incoming(call).await,
            RoomEvent::Link {
                peer_id,
                generation,
                event,
            } => self.on_link_event(&peer_id, generation, event).await,
            RoomEvent::Action(action) => self.on_action(action).await,
            RoomEvent::ScreenShareEnded { track_id } => {
                let current = self
                    .session
                    .screen_stream
                    .as_ref()
                    .and_then(|s| s.video_track())
                    .is_some_and(|t| t.id() == track_id);
                if current {
                    if let Err(err) = self.stop_screen_share().await {
                        log::error!("stop_screen_share failed: {err}");
                        self.notifier.alert(CAMERA_LOST);
                    }
                }
            }
            RoomEvent::Resize => {
                self.recalculate_grid();
            }
            RoomEvent::Unload => {
                self.leave().await;
            }
        }
        !self.session.has_left()
    }

    async fn on_action(&mut self, action: UserAction) {
        let outcome = match action {
            UserAction::ToggleAudio => self.toggle_local_track(TrackKind::Audio).map(|_| ()),
            UserAction::ToggleVideo => self.toggle_local_track(TrackKind::Video).map(|_| ()),
            UserAction::FlipCamera => self.flip_camera().await.map(|_| ()),
            UserAction::ToggleScreenShare => self.toggle_screen_share().await.map(|_| ()),
            UserAction::Leave => {
                self.leave().await;
                Ok(())
            }
            UserAction::Debug => {
                self.recalculate_grid();
                match serde_json::to_string_pretty(&self.snapshot()) {
                    Ok(dump) => log::info!("room state:\n{dump}"),
                    Err(err) => log::warn!("room state unavailable: {err}"),
                }
                Ok(())
            }
        };
        if let Err(err) = outcome {
            // a denied screen picker means the user cancelled it
            let cancelled = action == UserAction::ToggleScreenShare
                && matches!(err, RoomError::PermissionDenied(_));
            if cancelled {
                log::info!("{action:?}: screen capture was not granted: {err}");
            } else {
                self.report(&format!("{action:?}"), &err);
            }
        }
    }

    /// Roster announced a newcomer: call them.
    pub async fn on_participant_joined(&mut self, id: &str, name: &str) {
        if self.session.has_left() || id == self.session.self_id {
            return;
        }
        log::info!("{name} ({id}) connected");
        self.notifier.cue(Cue::ParticipantJoined);

        if self.mesh.contains(id) {
            self.remove_user(id).await;
        }
        if let Err(err) = self.mesh.on_roster_join(&self.session, id, name).await {
            log::error!("on_roster_join: calling {name} ({id}) failed: {err}");
        }
    }

    /// Roster reported a departure. Our own departure echo is ignored.
    pub async fn on_participant_left(&mut self, id: &str, name: &str) {
        log::info!("{name} ({id}) disconnected");
        if id == self.session.self_id {
            return;
        }
        self.remove_user(id).await;
        self.notifier.cue(Cue::ParticipantLeft);
    }

    pub async fn on_incoming(&mut self, call: IncomingCall) {
        let peer_id = call.metadata.id.clone();
        if self.session.has_left() {
            log::debug!("refusing a call from {peer_id} after leaving");
            call.link.close().await;
            return;
        }
        if peer_id == self.session.self_id {
            log::warn!("refusing a connection that claims our own id");
            call.link.close().await;
            return;
        }
        if self.registry.contains(&peer_id) || self.mesh.contains(&peer_id) {
            self.remove_user(&peer_id).await;
        }
        if let Err(err) = self.mesh.on_incoming_connection(&self.session, call).await {
            log::error!("on_incoming_connection: {peer_id}: {err}");
        }
    }

    async fn on_link_event(&mut self, peer_id: &str, generation: u64, event: LinkEvent) {
        if !self.mesh.is_current(peer_id, generation) {
            log::debug!("dropping {event:?} from stale connection {peer_id}#{generation}");
            return;
        }
        match event {
            LinkEvent::Stream(stream) => {
                let name = self
                    .mesh
                    .name_of(peer_id)
                    .unwrap_or(peer_id)
                    .to_owned();
                self.add_remote_user(peer_id, &name, stream);
            }
            LinkEvent::Closed => {
                self.remove_user(peer_id).await;
            }
        }
    }

    /// Shows a participant whose media arrived. A second arrival for the same
    /// id, or any arrival after leaving, is ignored. Returns true when a tile
    /// was created.
    pub fn add_remote_user(&mut self, id: &str, name: &str, stream: MediaStream) -> bool {
        if self.session.has_left() {
            return false;
        }
        if self.registry.contains(id) {
            log::info!("{name} ({id}) already shown, skipping");
            return false;
        }
        let indicators = self.status.watch(id, &stream);
        let Some(tile) = self.registry.add(id, name, stream, indicators) else {
            return false;
        };
        self.layout.place_tile(tile);
        self.recalculate_grid();
        log::info!("added {name} ({id}) as {tile}");
        true
    }

    /// Drops tile, participant and connection for `id`. Safe to repeat; a
    /// no-op once the room is left.
    pub async fn remove_user(&mut self, id: &str) -> bool {
        if self.session.has_left() {
            return false;
        }
        let mut changed = false;
        if let Some(participant) = self.registry.remove(id) {
            self.status.unwatch(id);
            self.layout.remove_tile(participant.tile.id);
            changed = true;
        }
        changed |= self.mesh.remove(id).await;
        if changed {
            self.recalculate_grid();
        }
        changed
    }

    pub fn recalculate_grid(&mut self) -> usize {
        self.session.grid_number = self.layout.recompute();
        self.session.grid_number
    }

    pub fn toggle_local_track(&mut self, kind: TrackKind) -> Result<bool> {
        self.ensure_active()?;
        self.sources
            .toggle_local_track(&self.session, &self.registry, kind)
            .ok_or(RoomError::InvalidState("no local track of that kind"))
    }

    pub async fn flip_camera(&mut self) -> Result<FacingMode> {
        self.ensure_active()?;
        self.sources
            .flip_camera(&mut self.session, &mut self.registry, &self.mesh)
            .await
    }

    pub async fn start_screen_share(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.sources
            .start_screen_share(&mut self.session, &mut self.registry, &self.mesh)
            .await
    }

    pub async fn stop_screen_share(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.sources
            .stop_screen_share(&mut self.session, &mut self.registry, &self.mesh)
            .await
    }

    pub async fn toggle_screen_share(&mut self) -> Result<bool> {
        self.ensure_active()?;
        self.sources
            .toggle_screen_share(&mut self.session, &mut self.registry, &self.mesh)
            .await
    }

    /// Tears everything down exactly once. Returns false on repeated calls.
    pub async fn leave(&mut self) -> bool {
        if !self.session.mark_left() {
            return false;
        }
        self.session.stop_media();
        self.mesh.close_all().await;
        self.status.shutdown();
        if let Err(err) = self.signaling.leave().await {
            log::warn!("leave: departure notice not delivered: {err}");
        }
        self.notifier.cue(Cue::Leave);
        log::info!("left room {}", self.session.room);
        true
    }

    pub fn controls(&self) -> Controls {
        let caps = self.sources.capabilities();
        Controls {
            mic_on: self.session.track_enabled(TrackKind::Audio).unwrap_or(false),
            camera_on: self.session.track_enabled(TrackKind::Video).unwrap_or(false),
            flip_camera: caps.facing_mode && caps.mobile,
            screen_share: caps.screen_capture,
            sharing: self.session.is_screen_sharing,
        }
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            session: self.session.snapshot(),
            participants: self.registry.summaries(),
            connections: self.mesh.peer_ids(),
            grids: self.layout.grids(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn mesh(&self) -> &PeerMeshManager {
        &self.mesh
    }

    pub fn layout(&self) -> &GridLayoutEngine {
        &self.layout
    }

    pub fn status(&self) -> &StatusIndicatorTracker {
        &self.status
    }

    fn ensure_active(&self) -> Result<()> {
        if self.session.has_left() {
            Err(RoomError::Left)
        } else {
            Ok(())
        }
    }

    fn report(&self, operation: &str, err: &RoomError) {
        log::error!("{operation} failed: {err}");
        self.notifier.alert(&err.user_message());
    }
}
