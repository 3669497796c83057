//! Participant identity to tile and indicator mapping.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::media::MediaStream;
use crate::status::{IndicatorState, Indicators};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TileId(pub u64);

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileOwner {
    Local,
    Remote(String),
}

/// Rendered unit bound to one participant or to the local session.
#[derive(Debug, Clone)]
pub struct Tile {
    pub id: TileId,
    pub owner: TileOwner,
    pub label: String,
    pub stream: MediaStream,
    /// Self-view is mirrored unless a screen is being shown.
    pub mirrored: bool,
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub tile: Tile,
    pub indicators: Indicators,
}

impl Participant {
    pub fn muted(&self) -> bool {
        self.indicators.get().muted
    }

    pub fn video_off(&self) -> bool {
        self.indicators.get().video_off
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantSummary {
    pub id: String,
    pub display_name: String,
    pub tile: TileId,
    pub indicators: IndicatorState,
}

pub struct ParticipantRegistry {
    local: Tile,
    local_indicators: Indicators,
    participants: HashMap<String, Participant>,
    next_tile: u64,
}

impl ParticipantRegistry {
    pub fn new(self_name: &str, local_stream: MediaStream, local_indicators: Indicators) -> Self {
        Self {
            local: Tile {
                id: TileId(0),
                owner: TileOwner::Local,
                label: format!("You ({self_name})"),
                stream: local_stream,
                mirrored: true,
            },
            local_indicators,
            participants: HashMap::new(),
            next_tile: 1,
        }
    }

    pub fn local_tile(&self) -> &Tile {
        &self.local
    }

    pub fn local_indicators(&self) -> &Indicators {
        &self.local_indicators
    }

    /// Points the self-view at the current local stream.
    pub fn update_local_stream(&mut self, stream: MediaStream) {
        self.local.stream = stream;
    }

    pub fn set_local_mirrored(&mut self, mirrored: bool) {
        self.local.mirrored = mirrored;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.participants.contains_key(id)
    }

    /// Creates the participant and its tile. Returns `None` when the id is
    /// already registered; a repeated arrival must not create a second tile.
    pub fn add(
        &mut self,
        id: &str,
        display_name: &str,
        stream: MediaStream,
        indicators: Indicators,
    ) -> Option<TileId> {
        if self.participants.contains_key(id) {
            return None;
        }
        let tile = Tile {
            id: TileId(self.next_tile),
            owner: TileOwner::Remote(id.to_owned()),
            label: display_name.to_owned(),
            stream,
            mirrored: false,
        };
        self.next_tile += 1;
        let tile_id = tile.id;
        self.participants.insert(
            id.to_owned(),
            Participant {
                id: id.to_owned(),
                display_name: display_name.to_owned(),
                tile,
                indicators,
            },
        );
        Some(tile_id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Participant> {
        self.participants.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn tile_of(&self, id: &str) -> Option<TileId> {
        self.participants.get(id).map(|p| p.tile.id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Participants sorted by tile creation order.
    pub fn summaries(&self) -> Vec<ParticipantSummary> {
        let mut list: Vec<_> = self
            .participants
            .values()
            .map(|p| ParticipantSummary {
                id: p.id.clone(),
                display_name: p.display_name.clone(),
                tile: p.tile.id,
                indicators: p.indicators.get(),
            })
            .collect();
        list.sort_by_key(|p| p.tile);
        list
    }
}
