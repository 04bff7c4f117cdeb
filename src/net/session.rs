//! Session management module
//!
//! Maps entity guids to bounded outbound channels. Hand-off is
//! fire-and-forget: a full or closed channel is reported to the caller and
//! never retried.

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

use crate::error::DeliveryError;
use crate::game::Guid;
use crate::protocol::packets::Packet;

/// Default outbound queue depth per session
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Something that can hand packets to an entity's connection
pub trait PacketSink: Send + Sync {
    fn deliver(&self, target: Guid, packet: &Packet) -> Result<(), DeliveryError>;
}

/// Outbound half of one entity's connection
#[derive(Debug, Clone)]
pub struct SessionHandle {
    guid: Guid,
    outbound_tx: mpsc::Sender<Bytes>,
}

impl SessionHandle {
    /// Create a handle and the receiving end the transport drains
    pub fn channel(guid: Guid, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        (Self { guid, outbound_tx }, outbound_rx)
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn is_closed(&self) -> bool {
        self.outbound_tx.is_closed()
    }

    /// Queue a framed packet without blocking
    pub fn send(&self, packet: &Packet) -> Result<(), DeliveryError> {
        self.outbound_tx
            .try_send(packet.to_frame())
            .map_err(|e| match e {
                TrySendError::Full(_) => DeliveryError::QueueFull(self.guid),
                TrySendError::Closed(_) => DeliveryError::ConnectionClosed(self.guid),
            })
    }
}

/// Thread-safe registry of outbound sessions
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<Guid, SessionHandle>,
    capacity: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            capacity,
        }
    }

    /// Open a channel for an entity, replacing any previous one
    pub fn open(&self, guid: Guid) -> mpsc::Receiver<Bytes> {
        let (handle, outbound_rx) = SessionHandle::channel(guid, self.capacity);
        self.register(handle);
        outbound_rx
    }

    pub fn register(&self, handle: SessionHandle) {
        let guid = handle.guid();
        if self.sessions.insert(guid, handle).is_some() {
            debug!(guid = guid, "Replaced existing session");
        }
        info!(guid = guid, sessions = self.sessions.len(), "Session registered");
    }

    /// Drop an entity's network association
    pub fn unregister(&self, guid: Guid) -> Option<SessionHandle> {
        let removed = self.sessions.remove(&guid).map(|(_, handle)| handle);
        if removed.is_some() {
            info!(guid = guid, "Session unregistered");
        }
        removed
    }

    pub fn get(&self, guid: Guid) -> Option<SessionHandle> {
        self.sessions.get(&guid).map(|r| r.clone())
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.sessions.contains_key(&guid)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl PacketSink for SessionRegistry {
    fn deliver(&self, target: Guid, packet: &Packet) -> Result<(), DeliveryError> {
        let handle = self
            .sessions
            .get(&target)
            .ok_or(DeliveryError::SessionNotFound(target))?;
        handle.send(packet)
    }
}
