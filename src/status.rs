//! Mute / video-off indicators derived from track state.
//!
//! Track-state notifications are not reliably delivered by the transport, so
//! every watched track is polled on a fixed period. An `ended` signal wins
//! immediately and is final: the poll task stops and the indicator stays off.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::utils::{lock, TaskHandle};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndicatorState {
    pub muted: bool,
    pub video_off: bool,
}

/// Shared indicator cell read by the renderer and written by poll tasks.
#[derive(Debug, Clone, Default)]
pub struct Indicators(Arc<Mutex<IndicatorState>>);

impl Indicators {
    pub fn get(&self) -> IndicatorState {
        *lock(&self.0)
    }

    /// Shows or hides the indicator for `kind`. Returns true on a change.
    pub fn set(&self, kind: TrackKind, off: bool) -> bool {
        let mut state = lock(&self.0);
        let slot = match kind {
            TrackKind::Audio => &mut state.muted,
            TrackKind::Video => &mut state.video_off,
        };
        let changed = *slot != off;
        *slot = off;
        changed
    }
}

// dropping the handles cancels polling
struct Watch(Vec<TaskHandle>);

pub struct StatusIndicatorTracker {
    period: Duration,
    watches: HashMap<String, Watch>,
}

impl StatusIndicatorTracker {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            watches: HashMap::new(),
        }
    }

    /// Starts polling every track of `stream` on behalf of `participant_id`.
    /// Watching the same id again replaces the previous watch.
    pub fn watch(&mut self, participant_id: &str, stream: &MediaStream) -> Indicators {
        let indicators = Indicators::default();
        let tasks = stream
            .tracks()
            .iter()
            .map(|track| {
                let label = format!("{participant_id}/{}", track.kind());
                TaskHandle::spawn(poll_track(
                    label,
                    track.clone(),
                    indicators.clone(),
                    self.period,
                ))
            })
            .collect();
        self.watches.insert(participant_id.to_owned(), Watch(tasks));
        indicators
    }

    /// Cancels the poll tasks of a participant. Unknown ids are ignored.
    pub fn unwatch(&mut self, participant_id: &str) -> bool {
        self.watches.remove(participant_id).is_some()
    }

    pub fn is_watching(&self, participant_id: &str) -> bool {
        self.watches.contains_key(participant_id)
    }

    pub fn shutdown(&mut self) {
        self.watches.clear();
    }
}

async fn poll_track(label: String, track: MediaTrack, indicators: Indicators, period: Duration) {
    let kind = track.kind();
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            biased;
            _ = track.ended() => {
                indicators.set(kind, true);
                log::debug!("{label} ended, indicator pinned off");
                break;
            }
            _ = ticker.tick() => {
                if indicators.set(kind, !track.is_enabled()) {
                    log::debug!("{label} enabled={}", track.is_enabled());
                }
            }
        }
    }
}
