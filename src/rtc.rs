//! webrtc-rs implementation of the peer-connection primitives.
//!
//! Offers, answers and trickled candidates travel as [`Negotiation`]
//! payloads inside signaling `signal` frames.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::RoomConfig;
use crate::error::{Result, RoomError};
use crate::event::{EventSender, RoomEvent};
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::peer::{
    CallMetadata, HandlerSlot, IncomingCall, LinkEvent, LinkHandler, PeerConnector, PeerLink,
    Subscription,
};
use crate::signal::Signaling;
use crate::utils::{lock, to_json, TaskHandle};

/// Peer negotiation payload carried in the `data` field of a signal frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Negotiation {
    Offer { sdp: String, metadata: CallMetadata },
    Answer { sdp: String },
    Candidate { candidate: RTCIceCandidateInit },
    Hangup,
}

pub fn new_api() -> Result<API> {
    let mut m = MediaEngine::default();
    m.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut m)?;

    Ok(APIBuilder::new()
        .with_media_engine(m)
        .with_interceptor_registry(registry)
        .build())
}

/// Opus frame carrying 20ms of silence.
const OPUS_SILENCE: &[u8] = &[0xf8, 0xff, 0xfe];
/// Placeholder 16x16 VP8 keyframe.
const VP8_BLANK: &[u8] = &[
    0x50, 0x01, 0x00, 0x9d, 0x01, 0x2a, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00,
];
const AUDIO_FRAME: Duration = Duration::from_millis(20);
const VIDEO_FRAME: Duration = Duration::from_millis(33);

struct LocalSample {
    media: MediaTrack,
    sample: Arc<TrackLocalStaticSample>,
    // aborted when the entry is pruned
    _pump: TaskHandle,
}

/// Sample tracks backing local [`MediaTrack`]s, shared by every connection.
/// Each one is fed by a pump until its media track ends.
#[derive(Clone)]
struct LocalTracks {
    stream_id: String,
    tracks: Arc<Mutex<HashMap<String, LocalSample>>>,
}

impl LocalTracks {
    fn get(&self, track: &MediaTrack) -> Arc<TrackLocalStaticSample> {
        let mut tracks = lock(&self.tracks);
        tracks.retain(|_, local| !local.media.is_ended() || local.media.same_track(track));
        tracks
            .entry(track.id().to_owned())
            .or_insert_with(|| {
                let mime_type = match track.kind() {
                    TrackKind::Audio => MIME_TYPE_OPUS,
                    TrackKind::Video => MIME_TYPE_VP8,
                };
                let sample = Arc::new(TrackLocalStaticSample::new(
                    RTCRtpCodecCapability {
                        mime_type: mime_type.to_owned(),
                        ..Default::default()
                    },
                    track.id().to_owned(),
                    self.stream_id.clone(),
                ));
                LocalSample {
                    media: track.clone(),
                    _pump: TaskHandle::spawn(pump_samples(track.clone(), sample.clone())),
                    sample,
                }
            })
            .sample
            .clone()
    }
}

/// Writes placeholder frames into `sample` on the frame cadence of its kind
/// until `media` ends. A disabled track sends the same blank frames so the
/// peer still sees the track.
async fn pump_samples(media: MediaTrack, sample: Arc<TrackLocalStaticSample>) {
    let (frame, duration) = match media.kind() {
        TrackKind::Audio => (OPUS_SILENCE, AUDIO_FRAME),
        TrackKind::Video => (VP8_BLANK, VIDEO_FRAME),
    };
    let mut ticker = tokio::time::interval(duration);
    loop {
        tokio::select! {
            biased;
            _ = media.ended() => break,
            _ = ticker.tick() => {
                let written = sample
                    .write_sample(&Sample {
                        data: Bytes::from_static(frame),
                        duration,
                        ..Default::default()
                    })
                    .await;
                if let Err(e) = written {
                    log::trace!("sample for {} dropped: {e}", media.id());
                }
            }
        }
    }
    log::debug!("{} ended, sample pump stopped", media.label());
}

pub struct RtcConnector<S: Signaling + 'static> {
    api: API,
    config: RTCConfiguration,
    signaling: Arc<S>,
    events: EventSender,
    local: LocalTracks,
    links: Mutex<HashMap<String, Weak<RtcLink<S>>>>,
}

impl<S: Signaling + 'static> RtcConnector<S> {
    pub fn new(config: &RoomConfig, signaling: Arc<S>, events: EventSender) -> Result<Self> {
        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        Ok(Self {
            api: new_api()?,
            config: rtc_config,
            signaling,
            events,
            local: LocalTracks {
                stream_id: config.self_id.clone(),
                tracks: Arc::default(),
            },
            links: Mutex::default(),
        })
    }

    /// Applies a negotiation payload relayed from `from`.
    pub async fn handle_signal(&self, from: &str, data: &str) -> Result<()> {
        match serde_json::from_str::<Negotiation>(data)? {
            Negotiation::Offer { sdp, metadata } => {
                if metadata.id != from {
                    log::warn!("offer from {from} claims id {}", metadata.id);
                }
                let link = self.new_link(from).await?;
                link.pc
                    .set_remote_description(RTCSessionDescription::offer(sdp)?)
                    .await?;
                self.track_link(&link);
                log::info!("incoming call from {} ({from})", metadata.name);
                let _ = self.events.send(RoomEvent::Incoming(IncomingCall { link, metadata }));
            }
            Negotiation::Answer { sdp } => {
                let link = self.link(from)?;
                link.pc
                    .set_remote_description(RTCSessionDescription::answer(sdp)?)
                    .await?;
            }
            Negotiation::Candidate { candidate } => {
                let link = self.link(from)?;
                if let Err(e) = link.pc.add_ice_candidate(candidate).await {
                    log::warn!("error adding ice candidate from {from}: {e}");
                }
            }
            Negotiation::Hangup => {
                if let Ok(link) = self.link(from) {
                    log::info!("{from} hung up");
                    link.shutdown(false).await;
                }
            }
        }
        Ok(())
    }

    fn link(&self, peer_id: &str) -> Result<Arc<RtcLink<S>>> {
        lock(&self.links)
            .get(peer_id)
            .and_then(Weak::upgrade)
            .ok_or_else(|| RoomError::Transport(format!("no connection to {peer_id}")))
    }

    fn track_link(&self, link: &Arc<RtcLink<S>>) {
        let mut links = lock(&self.links);
        links.retain(|_, weak| weak.strong_count() > 0);
        links.insert(link.peer_id.clone(), Arc::downgrade(link));
    }

    async fn new_link(&self, peer_id: &str) -> Result<Arc<RtcLink<S>>> {
        let pc = Arc::new(self.api.new_peer_connection(self.config.clone()).await?);
        let link = Arc::new(RtcLink {
            peer_id: peer_id.to_owned(),
            pc: pc.clone(),
            signaling: self.signaling.clone(),
            local: self.local.clone(),
            slot: HandlerSlot::default(),
            closed: Arc::new(AtomicBool::new(false)),
            hung_up: AtomicBool::new(false),
        });

        let signaling = self.signaling.clone();
        let target = peer_id.to_owned();
        pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(candidate) = candidate {
                let signaling = signaling.clone();
                let target = target.clone();
                tokio::spawn(async move {
                    let sent = match candidate.to_json() {
                        Ok(candidate) => match to_json(&Negotiation::Candidate { candidate }) {
                            Ok(data) => signaling.relay(&target, data).await,
                            Err(e) => Err(e),
                        },
                        Err(e) => Err(e.into()),
                    };
                    if let Err(e) = sent {
                        log::warn!("candidate for {target} not sent: {e}");
                    }
                });
            }
            Box::pin(async {})
        }));

        let slot = link.slot.clone();
        let closed = link.closed.clone();
        let id = peer_id.to_owned();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            log::debug!("connection to {id}: {s}");
            if matches!(s, RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed)
                && !closed.swap(true, Ordering::AcqRel)
            {
                slot.emit(LinkEvent::Closed);
            }
            Box::pin(async {})
        }));

        let assembler = RemoteAssembler {
            slot: link.slot.clone(),
            tracks: Arc::default(),
        };
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            assembler.add(track);
            Box::pin(async {})
        }));

        Ok(link)
    }
}

#[async_trait]
impl<S: Signaling + 'static> PeerConnector for RtcConnector<S> {
    async fn call(
        &self,
        peer_id: &str,
        stream: &MediaStream,
        metadata: CallMetadata,
    ) -> Result<Arc<dyn PeerLink>> {
        let link = self.new_link(peer_id).await?;
        link.add_tracks(stream).await?;

        let offer = link.pc.create_offer(None).await?;
        link.pc.set_local_description(offer.clone()).await?;
        self.track_link(&link);
        self.signaling
            .relay(
                peer_id,
                to_json(&Negotiation::Offer {
                    sdp: offer.sdp,
                    metadata,
                })?,
            )
            .await?;
        log::info!("calling {peer_id}");
        Ok(link as Arc<dyn PeerLink>)
    }
}

/// Builds one remote stream from the audio and video tracks of a connection.
#[derive(Clone)]
struct RemoteAssembler {
    slot: HandlerSlot,
    tracks: Arc<Mutex<Vec<MediaTrack>>>,
}

impl RemoteAssembler {
    fn add(&self, remote: Arc<TrackRemote>) {
        let kind = match remote.kind() {
            RTPCodecType::Audio => TrackKind::Audio,
            RTPCodecType::Video => TrackKind::Video,
            other => {
                log::warn!("ignoring remote track of kind {other:?}");
                return;
            }
        };
        let track = MediaTrack::with_id(remote.id(), kind, format!("remote {kind}"));

        let ready = {
            let mut tracks = lock(&self.tracks);
            tracks.retain(|t| t.kind() != kind);
            tracks.push(track.clone());
            let complete = [TrackKind::Audio, TrackKind::Video]
                .iter()
                .all(|k| tracks.iter().any(|t| t.kind() == *k));
            complete.then(|| MediaStream::with_id(remote.stream_id(), tracks.clone()))
        };

        tokio::spawn(async move {
            while remote.read_rtp().await.is_ok() {}
            track.stop();
        });

        if let Some(stream) = ready {
            self.slot.emit(LinkEvent::Stream(stream));
        }
    }
}

pub struct RtcLink<S: Signaling + 'static> {
    peer_id: String,
    pc: Arc<RTCPeerConnection>,
    signaling: Arc<S>,
    local: LocalTracks,
    slot: HandlerSlot,
    closed: Arc<AtomicBool>,
    hung_up: AtomicBool,
}

impl<S: Signaling + 'static> RtcLink<S> {
    async fn add_tracks(&self, stream: &MediaStream) -> Result<()> {
        for track in stream.tracks() {
            let sample = self.local.get(track);
            let sender = self
                .pc
                .add_track(sample as Arc<dyn TrackLocal + Send + Sync>)
                .await?;

            // Read incoming RTCP so the interceptors keep working.
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }
        Ok(())
    }

    /// Closes the connection once. `notify` relays a hangup to the peer.
    async fn shutdown(&self, notify: bool) {
        if self.hung_up.swap(true, Ordering::AcqRel) {
            return;
        }
        if notify {
            let sent = match to_json(&Negotiation::Hangup) {
                Ok(data) => self.signaling.relay(&self.peer_id, data).await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                log::debug!("hangup for {} not sent: {e}", self.peer_id);
            }
        }
        if let Err(e) = self.pc.close().await {
            log::error!("closing connection to {} failed: {e}", self.peer_id);
        }
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.slot.emit(LinkEvent::Closed);
        }
    }
}

#[async_trait]
impl<S: Signaling + 'static> PeerLink for RtcLink<S> {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn subscribe(&self, handler: LinkHandler) -> Subscription {
        self.slot.subscribe(handler)
    }

    async fn answer(&self, stream: &MediaStream) -> Result<()> {
        self.add_tracks(stream).await?;
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        self.signaling
            .relay(&self.peer_id, to_json(&Negotiation::Answer { sdp: answer.sdp })?)
            .await
    }

    async fn replace_video_track(&self, track: &MediaTrack) -> Result<()> {
        let sample = self.local.get(track);
        for sender in self.pc.get_senders().await {
            let Some(current) = sender.track().await else {
                continue;
            };
            if current.kind() == RTPCodecType::Video {
                sender
                    .replace_track(Some(sample as Arc<dyn TrackLocal + Send + Sync>))
                    .await?;
                return Ok(());
            }
        }
        Err(RoomError::Transport(format!(
            "no outbound video sender for {}",
            self.peer_id
        )))
    }

    async fn close(&self) {
        self.shutdown(true).await;
    }
}
