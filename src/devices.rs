//! Device backend for the console client.
//!
//! Hands out placeholder tracks with the configured capabilities. Encoded
//! frames are written to the peer tracks by whatever capture pipeline the
//! host wires in; this backend only models the device state.

use async_trait::async_trait;

use crate::error::{Capability, Result, RoomError};
use crate::media::{Capabilities, CaptureRequest, MediaDevices, MediaStream, MediaTrack, TrackKind};

pub struct SyntheticDevices {
    capabilities: Capabilities,
}

impl SyntheticDevices {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn user_media(&self, request: CaptureRequest) -> Result<MediaStream> {
        let mut tracks = Vec::new();
        if request.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, "synthetic microphone"));
        }
        if let Some(video) = request.video {
            let facing = video.facing.unwrap_or_default();
            tracks.push(MediaTrack::new(
                TrackKind::Video,
                format!(
                    "synthetic {facing:?} camera {}x{}",
                    video.ideal_width, video.ideal_height
                ),
            ));
        }
        if tracks.is_empty() {
            return Err(RoomError::Acquisition("nothing requested".into()));
        }
        Ok(MediaStream::new(tracks))
    }

    async fn display_media(&self) -> Result<MediaStream> {
        if !self.capabilities.screen_capture {
            return Err(RoomError::UnsupportedCapability(Capability::ScreenCapture));
        }
        Ok(MediaStream::new(vec![MediaTrack::new(
            TrackKind::Video,
            "synthetic screen",
        )]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{FacingMode, VideoConstraints};

    #[tokio::test]
    async fn honours_requested_kinds() {
        let devices = SyntheticDevices::new(Capabilities::default());
        let stream = devices
            .user_media(CaptureRequest {
                audio: false,
                video: Some(VideoConstraints {
                    ideal_width: 640,
                    ideal_height: 480,
                    facing: Some(FacingMode::Rear),
                }),
            })
            .await
            .unwrap();
        assert_eq!(stream.count(TrackKind::Audio), 0);
        assert_eq!(stream.count(TrackKind::Video), 1);
        assert!(stream.tracks()[0].label().contains("Rear"));
    }

    #[tokio::test]
    async fn screen_requires_capability() {
        let devices = SyntheticDevices::new(Capabilities::default());
        assert!(matches!(
            devices.display_media().await,
            Err(RoomError::UnsupportedCapability(Capability::ScreenCapture))
        ));
    }
}
