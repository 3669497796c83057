use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{Result, RoomError};
use crate::utils::to_json;

/// Messages on the signaling socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    Join {
        room: String,
        id: String,
        name: String,
    },
    Leave,
    ParticipantJoined {
        id: String,
        name: String,
    },
    ParticipantLeft {
        id: String,
        name: String,
    },
    /// Opaque peer negotiation payload. `target` on the way out, `from` on the way in.
    Signal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        data: String,
    },
}

/// Inbound signaling, as the rest of the client sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalEvent {
    ParticipantJoined { id: String, name: String },
    ParticipantLeft { id: String, name: String },
    Relay { from: String, data: String },
    Closed,
}

impl SignalEvent {
    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::ParticipantJoined { id, name } => {
                Some(SignalEvent::ParticipantJoined { id, name })
            }
            Message::ParticipantLeft { id, name } => Some(SignalEvent::ParticipantLeft { id, name }),
            Message::Signal {
                from: Some(from),
                data,
                ..
            } => Some(SignalEvent::Relay { from, data }),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Signaling: Send + Sync {
    async fn join(&self, room: &str, self_id: &str, self_name: &str) -> Result<()>;

    async fn leave(&self) -> Result<()>;

    /// Forwards a negotiation payload to one participant.
    async fn relay(&self, target: &str, data: String) -> Result<()>;
}

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, tungstenite::Message>;

pub struct WsSignaling {
    write: Mutex<WsWrite>,
}

impl WsSignaling {
    /// Opens the socket and spawns a reader that turns frames into [`SignalEvent`]s.
    pub async fn connect(url: &str) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SignalEvent>)> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| RoomError::Signaling(format!("connecting to {url}: {e}")))?;
        log::info!("connected to signaling server {url}");

        let (write, mut read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(tungstenite::Message::Text(text)) => {
                        match serde_json::from_str::<Message>(&text) {
                            Ok(message) => {
                                if let Some(event) = SignalEvent::from_message(message) {
                                    if tx.send(event).is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => log::warn!("ignoring malformed signaling frame: {e}"),
                        }
                    }
                    Ok(tungstenite::Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("signaling socket error: {e}");
                        break;
                    }
                }
            }
            log::warn!("signaling channel closed");
            let _ = tx.send(SignalEvent::Closed);
        });

        Ok((
            Arc::new(Self {
                write: Mutex::new(write),
            }),
            rx,
        ))
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let text = to_json(message)?;
        self.write
            .lock()
            .await
            .send(tungstenite::Message::Text(text))
            .await
            .map_err(|e| RoomError::Signaling(e.to_string()))
    }
}

#[async_trait]
impl Signaling for WsSignaling {
    async fn join(&self, room: &str, self_id: &str, self_name: &str) -> Result<()> {
        self.send(&Message::Join {
            room: room.to_owned(),
            id: self_id.to_owned(),
            name: self_name.to_owned(),
        })
        .await
    }

    async fn leave(&self) -> Result<()> {
        self.send(&Message::Leave).await?;
        let _ = self.write.lock().await.close().await;
        Ok(())
    }

    async fn relay(&self, target: &str, data: String) -> Result<()> {
        self.send(&Message::Signal {
            target: Some(target.to_owned()),
            from: None,
            data,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_tagged_kebab_case() {
        let json = to_json(&Message::Join {
            room: "r1".into(),
            id: "a".into(),
            name: "Ana".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"join","room":"r1","id":"a","name":"Ana"}"#);
        assert_eq!(to_json(&Message::Leave).unwrap(), r#"{"type":"leave"}"#);
    }

    #[test]
    fn inbound_roster_events_map_to_signal_events() {
        let message: Message =
            serde_json::from_str(r#"{"type":"participant-left","id":"b","name":"Bob"}"#).unwrap();
        assert_eq!(
            SignalEvent::from_message(message),
            Some(SignalEvent::ParticipantLeft {
                id: "b".into(),
                name: "Bob".into()
            })
        );
    }

    #[test]
    fn relay_needs_a_sender() {
        let inbound: Message =
            serde_json::from_str(r#"{"type":"signal","from":"b","data":"{}"}"#).unwrap();
        assert_eq!(
            SignalEvent::from_message(inbound),
            Some(SignalEvent::Relay {
                from: "b".into(),
                data: "{}".into()
            })
        );

        let outbound: Message =
            serde_json::from_str(r#"{"type":"signal","target":"b","data":"{}"}"#).unwrap();
        assert_eq!(SignalEvent::from_message(outbound), None);
    }
}
