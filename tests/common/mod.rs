#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use meshroom::error::{Result, RoomError};
use meshroom::event::{self, EventReceiver, EventSender};
use meshroom::layout::{GridId, GridLayout, GridRenderer, Orientation};
use meshroom::media::{
    Capabilities, CaptureRequest, MediaDevices, MediaStream, MediaTrack, TrackKind,
};
use meshroom::peer::{
    CallMetadata, HandlerSlot, LinkEvent, LinkHandler, PeerConnector, PeerLink, Subscription,
};
use meshroom::registry::TileId;
use meshroom::signal::Signaling;
use meshroom::{Cue, Notifier, Room, RoomConfig};

pub fn av_stream(label: &str) -> MediaStream {
    MediaStream::new(vec![
        MediaTrack::new(TrackKind::Audio, format!("{label} mic")),
        MediaTrack::new(TrackKind::Video, format!("{label} camera")),
    ])
}

pub struct FakeLink {
    pub peer_id: String,
    pub slot: HandlerSlot,
    pub video: Mutex<Option<MediaTrack>>,
    pub fail_replace: AtomicBool,
    pub answered: AtomicUsize,
    pub closed: AtomicUsize,
}

impl FakeLink {
    pub fn new(peer_id: &str, stream: &MediaStream) -> Arc<Self> {
        Arc::new(Self {
            peer_id: peer_id.to_owned(),
            slot: HandlerSlot::default(),
            video: Mutex::new(stream.video_track().cloned()),
            fail_replace: AtomicBool::new(false),
            answered: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        })
    }

    /// Simulates the remote media arriving.
    pub fn deliver(&self, stream: MediaStream) {
        self.slot.emit(LinkEvent::Stream(stream));
    }

    pub fn drop_connection(&self) {
        self.slot.emit(LinkEvent::Closed);
    }

    pub fn outbound_video(&self) -> Option<MediaTrack> {
        self.video.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) > 0
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn subscribe(&self, handler: LinkHandler) -> Subscription {
        self.slot.subscribe(handler)
    }

    async fn answer(&self, stream: &MediaStream) -> Result<()> {
        self.answered.fetch_add(1, Ordering::SeqCst);
        *self.video.lock().unwrap() = stream.video_track().cloned();
        Ok(())
    }

    async fn replace_video_track(&self, track: &MediaTrack) -> Result<()> {
        if self.fail_replace.load(Ordering::SeqCst) {
            return Err(RoomError::Transport("sender rejected the track".into()));
        }
        *self.video.lock().unwrap() = Some(track.clone());
        Ok(())
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub links: Mutex<HashMap<String, Arc<FakeLink>>>,
    pub calls: Mutex<Vec<(String, CallMetadata)>>,
    pub failing: Mutex<HashSet<String>>,
}

impl FakeConnector {
    pub fn link(&self, peer_id: &str) -> Arc<FakeLink> {
        self.links.lock().unwrap()[peer_id].clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Links created for `peer_id` from now on reject track replacement.
    pub fn fail_replacement_for(&self, peer_id: &str) {
        self.failing.lock().unwrap().insert(peer_id.to_owned());
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn call(
        &self,
        peer_id: &str,
        stream: &MediaStream,
        metadata: CallMetadata,
    ) -> Result<Arc<dyn PeerLink>> {
        let link = FakeLink::new(peer_id, stream);
        if self.failing.lock().unwrap().contains(peer_id) {
            link.fail_replace.store(true, Ordering::SeqCst);
        }
        self.calls
            .lock()
            .unwrap()
            .push((peer_id.to_owned(), metadata));
        self.links
            .lock()
            .unwrap()
            .insert(peer_id.to_owned(), link.clone());
        Ok(link as Arc<dyn PeerLink>)
    }
}

pub struct FakeDevices {
    pub capabilities: Mutex<Capabilities>,
    pub deny_camera: AtomicBool,
    pub deny_screen: AtomicBool,
    pub requests: Mutex<Vec<CaptureRequest>>,
    pub screens: Mutex<Vec<MediaStream>>,
}

impl FakeDevices {
    pub fn new(capabilities: Capabilities) -> Arc<Self> {
        Arc::new(Self {
            capabilities: Mutex::new(capabilities),
            deny_camera: AtomicBool::new(false),
            deny_screen: AtomicBool::new(false),
            requests: Mutex::default(),
            screens: Mutex::default(),
        })
    }

    pub fn last_request(&self) -> Option<CaptureRequest> {
        self.requests.lock().unwrap().last().copied()
    }

    pub fn last_screen(&self) -> Option<MediaStream> {
        self.screens.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    fn capabilities(&self) -> Capabilities {
        *self.capabilities.lock().unwrap()
    }

    async fn user_media(&self, request: CaptureRequest) -> Result<MediaStream> {
        self.requests.lock().unwrap().push(request);
        if self.deny_camera.load(Ordering::SeqCst) {
            return Err(RoomError::PermissionDenied("camera".into()));
        }
        let mut tracks = Vec::new();
        if request.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, "mic"));
        }
        if let Some(video) = request.video {
            let facing = video.facing.unwrap_or_default();
            tracks.push(MediaTrack::new(TrackKind::Video, format!("{facing:?} camera")));
        }
        Ok(MediaStream::new(tracks))
    }

    async fn display_media(&self) -> Result<MediaStream> {
        if self.deny_screen.load(Ordering::SeqCst) {
            return Err(RoomError::PermissionDenied("screen".into()));
        }
        let screen = MediaStream::new(vec![MediaTrack::new(TrackKind::Video, "screen")]);
        self.screens.lock().unwrap().push(screen.clone());
        Ok(screen)
    }
}

#[derive(Default)]
pub struct RenderState {
    pub orientation: Orientation,
    pub grids: Vec<GridId>,
    pub arranged: HashMap<GridId, (Vec<TileId>, GridLayout)>,
    pub focused: Vec<GridId>,
}

#[derive(Clone, Default)]
pub struct RecordingRenderer {
    pub state: Arc<Mutex<RenderState>>,
}

impl RecordingRenderer {
    pub fn set_orientation(&self, orientation: Orientation) {
        self.state.lock().unwrap().orientation = orientation;
    }

    /// Tiles and layout last applied to `grid`, if it is still shown.
    pub fn arranged(&self, grid: GridId) -> Option<(Vec<TileId>, GridLayout)> {
        self.state.lock().unwrap().arranged.get(&grid).cloned()
    }

    pub fn live_grids(&self) -> usize {
        self.state.lock().unwrap().grids.len()
    }
}

impl GridRenderer for RecordingRenderer {
    fn orientation(&self) -> Orientation {
        self.state.lock().unwrap().orientation
    }

    fn add_grid(&mut self, grid: GridId, _tiles: &[TileId]) {
        self.state.lock().unwrap().grids.push(grid);
    }

    fn remove_grid(&mut self, grid: GridId) {
        let mut state = self.state.lock().unwrap();
        state.grids.retain(|g| *g != grid);
        state.arranged.remove(&grid);
    }

    fn focus_grid(&mut self, grid: GridId) {
        self.state.lock().unwrap().focused.push(grid);
    }

    fn arrange(&mut self, grid: GridId, tiles: &[TileId], layout: GridLayout) {
        self.state
            .lock()
            .unwrap()
            .arranged
            .insert(grid, (tiles.to_vec(), layout));
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub cues: Mutex<Vec<Cue>>,
    pub alerts: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn cues(&self) -> Vec<Cue> {
        self.cues.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn cue(&self, cue: Cue) {
        self.cues.lock().unwrap().push(cue);
    }

    fn alert(&self, message: &str) {
        self.alerts.lock().unwrap().push(message.to_owned());
    }
}

#[derive(Default)]
pub struct FakeSignaling {
    pub joins: Mutex<Vec<(String, String, String)>>,
    pub leaves: AtomicUsize,
    pub relayed: Mutex<Vec<(String, String)>>,
}

impl FakeSignaling {
    pub fn leave_count(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Signaling for FakeSignaling {
    async fn join(&self, room: &str, self_id: &str, self_name: &str) -> Result<()> {
        self.joins
            .lock()
            .unwrap()
            .push((room.to_owned(), self_id.to_owned(), self_name.to_owned()));
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn relay(&self, target: &str, data: String) -> Result<()> {
        self.relayed.lock().unwrap().push((target.to_owned(), data));
        Ok(())
    }
}

pub struct Harness {
    pub room: Room<FakeSignaling>,
    pub events: EventReceiver,
    pub tx: EventSender,
    pub connector: Arc<FakeConnector>,
    pub devices: Arc<FakeDevices>,
    pub renderer: RecordingRenderer,
    pub notifier: Arc<RecordingNotifier>,
    pub signaling: Arc<FakeSignaling>,
}

pub fn capabilities() -> Capabilities {
    Capabilities {
        facing_mode: true,
        screen_capture: true,
        mobile: true,
    }
}

pub fn config() -> RoomConfig {
    RoomConfig {
        room: "standup".into(),
        self_id: "me".into(),
        self_name: "Ana".into(),
        ..Default::default()
    }
}

pub async fn start(capabilities: Capabilities, orientation: Orientation) -> Harness {
    let (tx, events) = event::channel();
    let connector = Arc::new(FakeConnector::default());
    let devices = FakeDevices::new(capabilities);
    let renderer = RecordingRenderer::default();
    renderer.set_orientation(orientation);
    let notifier = Arc::new(RecordingNotifier::default());
    let signaling = Arc::new(FakeSignaling::default());

    let room = Room::start(
        config(),
        devices.clone(),
        connector.clone(),
        signaling.clone(),
        Box::new(renderer.clone()),
        notifier.clone(),
        tx.clone(),
    )
    .await
    .expect("room starts");

    Harness {
        room,
        events,
        tx,
        connector,
        devices,
        renderer,
        notifier,
        signaling,
    }
}

impl Harness {
    /// Applies every event queued so far. Returns how many were handled.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.room.handle(event).await;
            handled += 1;
        }
        handled
    }

    /// Roster join followed by the peer's media arriving.
    pub async fn admit(&mut self, id: &str, name: &str) -> Arc<FakeLink> {
        self.room.on_participant_joined(id, name).await;
        let link = self.connector.link(id);
        link.deliver(av_stream(name));
        self.pump().await;
        link
    }

    pub fn local_video(&self) -> MediaTrack {
        self.room
            .session()
            .local_stream
            .video_track()
            .cloned()
            .expect("local video")
    }
}
