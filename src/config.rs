use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::media::Capabilities;

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:3000/signaling";
pub const DEFAULT_STUN: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub signaling_url: String,
    pub room: String,
    pub self_id: String,
    pub self_name: String,
    pub ice_servers: Vec<String>,
    /// How often remote track state is polled for the indicators.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Pause after leaving so the departure cue can finish.
    #[serde(with = "millis")]
    pub leave_delay: Duration,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub capabilities: Capabilities,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_owned(),
            room: "lobby".to_owned(),
            self_id: uuid::Uuid::new_v4().to_string(),
            self_name: "guest".to_owned(),
            ice_servers: vec![DEFAULT_STUN.to_owned()],
            poll_interval: Duration::from_millis(1000),
            leave_delay: Duration::from_millis(450),
            ideal_width: 1920,
            ideal_height: 1080,
            capabilities: Capabilities {
                facing_mode: true,
                screen_capture: true,
                mobile: false,
            },
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
