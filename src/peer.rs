//! Full-mesh bookkeeping: one live connection per remote participant.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RoomError};
use crate::event::{EventSender, RoomEvent};
use crate::media::{MediaStream, MediaTrack};
use crate::session::Session;
use crate::utils::lock;

/// Identity the caller attaches to every outbound connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMetadata {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Remote media arrived. May repeat on renegotiation.
    Stream(MediaStream),
    Closed,
}

pub type LinkHandler = Box<dyn Fn(LinkEvent) + Send + Sync>;

/// Disposer for a link handler. Disposing (or dropping) guarantees the
/// handler is not invoked afterwards.
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    pub fn dispose(mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

#[derive(Default)]
struct SlotInner {
    handler: Option<(u64, Arc<LinkHandler>)>,
    pending: Vec<LinkEvent>,
    next_id: u64,
}

/// Single handler slot for link implementations. Events emitted while
/// nobody listens are held back and replayed to the next subscriber.
#[derive(Clone, Default)]
pub struct HandlerSlot {
    inner: Arc<Mutex<SlotInner>>,
}

impl HandlerSlot {
    pub fn subscribe(&self, handler: LinkHandler) -> Subscription {
        let handler = Arc::new(handler);
        let (id, pending) = {
            let mut inner = lock(&self.inner);
            inner.next_id += 1;
            let id = inner.next_id;
            inner.handler = Some((id, handler.clone()));
            (id, std::mem::take(&mut inner.pending))
        };
        for event in pending {
            handler(event);
        }

        let slot = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(slot) = slot.upgrade() {
                let mut inner = lock(&slot);
                if matches!(inner.handler, Some((current, _)) if current == id) {
                    inner.handler = None;
                }
            }
        })
    }

    pub fn emit(&self, event: LinkEvent) {
        let handler = {
            let mut inner = lock(&self.inner);
            match &inner.handler {
                Some((_, handler)) => handler.clone(),
                None => {
                    inner.pending.push(event);
                    return;
                }
            }
        };
        handler(event);
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.inner).handler.is_some()
    }
}

/// One bidirectional media channel to a remote participant.
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn peer_id(&self) -> &str;

    fn subscribe(&self, handler: LinkHandler) -> Subscription;

    /// Accepts an incoming connection, offering our stream.
    async fn answer(&self, stream: &MediaStream) -> Result<()>;

    /// Swaps the track on the outbound video sender.
    async fn replace_video_track(&self, track: &MediaTrack) -> Result<()>;

    /// Idempotent.
    async fn close(&self);
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Starts an outbound connection. Does not wait for the remote side.
    async fn call(
        &self,
        peer_id: &str,
        stream: &MediaStream,
        metadata: CallMetadata,
    ) -> Result<Arc<dyn PeerLink>>;
}

pub struct IncomingCall {
    pub link: Arc<dyn PeerLink>,
    pub metadata: CallMetadata,
}

impl fmt::Debug for IncomingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingCall")
            .field("peer_id", &self.link.peer_id())
            .field("metadata", &self.metadata)
            .finish()
    }
}

struct PeerEntry {
    link: Arc<dyn PeerLink>,
    name: String,
    generation: u64,
    subscription: Subscription,
}

pub struct PeerMeshManager {
    connector: Arc<dyn PeerConnector>,
    events: EventSender,
    peers: HashMap<String, PeerEntry>,
    next_generation: u64,
}

impl PeerMeshManager {
    pub fn new(connector: Arc<dyn PeerConnector>, events: EventSender) -> Self {
        Self {
            connector,
            events,
            peers: HashMap::new(),
            next_generation: 1,
        }
    }

    /// Calls a participant announced by the roster, offering the local stream.
    /// Returns the connection generation used to tag its events.
    pub async fn on_roster_join(
        &mut self,
        session: &Session,
        peer_id: &str,
        name: &str,
    ) -> Result<u64> {
        let metadata = CallMetadata {
            id: session.self_id.clone(),
            name: session.self_name.clone(),
        };
        let link = self
            .connector
            .call(peer_id, &session.local_stream, metadata)
            .await?;
        Ok(self.register(peer_id, name, link).await)
    }

    /// Accepts any incoming connection with the local stream.
    pub async fn on_incoming_connection(
        &mut self,
        session: &Session,
        call: IncomingCall,
    ) -> Result<u64> {
        let IncomingCall { link, metadata } = call;
        let generation = self
            .register(&metadata.id, &metadata.name, link.clone())
            .await;
        if let Err(err) = link.answer(&session.local_stream).await {
            log::error!("answering {} failed: {err}", metadata.id);
            self.remove(&metadata.id).await;
            return Err(err);
        }
        Ok(generation)
    }

    async fn register(&mut self, peer_id: &str, name: &str, link: Arc<dyn PeerLink>) -> u64 {
        if let Some(stale) = self.peers.remove(peer_id) {
            log::warn!("replacing existing connection to {peer_id}");
            stale.subscription.dispose();
            stale.link.close().await;
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let events = self.events.clone();
        let id = peer_id.to_owned();
        let subscription = link.subscribe(Box::new(move |event| {
            let _ = events.send(RoomEvent::Link {
                peer_id: id.clone(),
                generation,
                event,
            });
        }));

        self.peers.insert(
            peer_id.to_owned(),
            PeerEntry {
                link,
                name: name.to_owned(),
                generation,
                subscription,
            },
        );
        log::info!("connection to {name} ({peer_id}) registered, generation {generation}");
        generation
    }

    /// False for events of a connection that was replaced or removed since.
    pub fn is_current(&self, peer_id: &str, generation: u64) -> bool {
        self.peers
            .get(peer_id)
            .is_some_and(|p| p.generation == generation)
    }

    /// Unsubscribes and closes the connection. Unknown ids are ignored.
    pub async fn remove(&mut self, peer_id: &str) -> bool {
        let Some(entry) = self.peers.remove(peer_id) else {
            return false;
        };
        entry.subscription.dispose();
        entry.link.close().await;
        log::info!("connection to {} ({peer_id}) closed", entry.name);
        true
    }

    /// Puts `track` on every open connection's outbound video sender.
    /// A failing connection is logged and skipped; the rest still switch.
    pub async fn replace_outbound_video_track(&self, track: &MediaTrack) -> Vec<RoomError> {
        let results = join_all(self.peers.iter().map(|(peer_id, entry)| async move {
            (peer_id, entry.link.replace_video_track(track).await)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(peer_id, result)| {
                let err = result.err()?;
                log::error!("replacing video track for {peer_id} failed: {err}");
                Some(RoomError::TrackReplacement {
                    peer_id: peer_id.clone(),
                    reason: err.to_string(),
                })
            })
            .collect()
    }

    pub async fn close_all(&mut self) {
        let entries: Vec<_> = self.peers.drain().collect();
        let links: Vec<_> = entries
            .into_iter()
            .map(|(_, entry)| {
                entry.subscription.dispose();
                entry.link
            })
            .collect();
        join_all(links.iter().map(|link| link.close())).await;
        if !links.is_empty() {
            log::info!("closed {} peer connections", links.len());
        }
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn name_of(&self, peer_id: &str) -> Option<&str> {
        self.peers.get(peer_id).map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn slot_replays_pending_events() {
        let slot = HandlerSlot::default();
        slot.emit(LinkEvent::Closed);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let _subscription = slot.subscribe(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        slot.emit(LinkEvent::Closed);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disposed_handler_is_not_called() {
        let slot = HandlerSlot::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let subscription = slot.subscribe(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        subscription.dispose();
        assert!(!slot.is_subscribed());

        slot.emit(LinkEvent::Closed);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn old_disposer_leaves_newer_handler_alone() {
        let slot = HandlerSlot::default();
        let first = slot.subscribe(Box::new(|_| {}));
        let _second = slot.subscribe(Box::new(|_| {}));
        drop(first);
        assert!(slot.is_subscribed());
    }
}
