//! The single outbound session and the rooms it has joined.
//!
//! A [`Session`] only exists for an encrypted transport. During startup it is
//! mutable so rooms can be joined one by one; [`Session::freeze`] then turns
//! it into an [`ActiveSession`] whose room list can no longer change and which
//! is cheap to share between the relay and the receive task.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    config::{JoinFailurePolicy, MucConfig},
    error::RelayError,
    xmpp::{
        Event, HistoryPolicy, MessageType, OutgoingMessage, RoomJoin, Stanza, XmppError,
        XmppReceiver, XmppSender,
    },
};

/// Outbound half of a protocol connection.
///
/// Implementations must tolerate `send` being called while another task is
/// reading from the same connection. Sending a [`Stanza::Join`] returns once
/// the room has accepted or refused the join.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn is_encrypted(&self) -> bool;

    async fn send(&self, stanza: Stanza) -> Result<(), XmppError>;

    async fn close(&self) -> Result<(), XmppError>;
}

/// Inbound half of a protocol connection.
#[async_trait]
pub trait EventSource: Send {
    /// `Ok(None)` means the peer closed the stream.
    async fn next_event(&mut self) -> Result<Option<Event>, XmppError>;
}

#[async_trait]
impl Transport for XmppSender {
    fn is_encrypted(&self) -> bool {
        XmppSender::is_encrypted(self)
    }

    async fn send(&self, stanza: Stanza) -> Result<(), XmppError> {
        XmppSender::send(self, stanza).await
    }

    async fn close(&self) -> Result<(), XmppError> {
        XmppSender::close(self).await
    }
}

#[async_trait]
impl EventSource for XmppReceiver {
    async fn next_event(&mut self) -> Result<Option<Event>, XmppError> {
        XmppReceiver::next_event(self).await
    }
}

/// How a relayed message is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Direct,
    Room,
}

impl Delivery {
    fn message_type(self) -> MessageType {
        match self {
            Delivery::Direct => MessageType::Chat,
            Delivery::Room => MessageType::Groupchat,
        }
    }
}

/// Rooms that accepted our join, in join order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JoinedRooms(Vec<String>);

impl JoinedRooms {
    fn record(&mut self, room: &str) {
        if !self.contains(room) {
            self.0.push(room.to_string());
        }
    }

    pub fn contains(&self, room: &str) -> bool {
        self.0.iter().any(|joined| joined == room)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

pub struct Session<T> {
    transport: Arc<T>,
    rooms: JoinedRooms,
}

impl<T: Transport> Session<T> {
    /// Wraps a connected transport, refusing it unless it is encrypted.
    pub fn establish(transport: T) -> Result<Self, RelayError> {
        if !transport.is_encrypted() {
            return Err(RelayError::Encryption(
                "transport reports no TLS protection".to_string(),
            ));
        }

        Ok(Self {
            transport: Arc::new(transport),
            rooms: JoinedRooms::default(),
        })
    }

    pub fn rooms(&self) -> &JoinedRooms {
        &self.rooms
    }

    /// Joins one room; it is recorded only once the room accepts the join.
    pub async fn join_room(
        &mut self,
        room: &MucConfig,
        nick: &str,
        history: HistoryPolicy,
    ) -> Result<(), RelayError> {
        let join = RoomJoin {
            room: room.jid.clone(),
            nick: nick.to_string(),
            password: room.password().map(str::to_string),
            history,
        };

        self.transport
            .send(Stanza::Join(join))
            .await
            .map_err(|source| RelayError::Join {
                room: room.jid.clone(),
                source,
            })?;

        self.rooms.record(&room.jid);
        info!(room = %room.jid, protected = room.password().is_some(), "joined room");
        Ok(())
    }

    /// Joins every room in order.
    ///
    /// With [`JoinFailurePolicy::Abort`] the first failure is returned. With
    /// [`JoinFailurePolicy::Skip`] failures are logged and handed back so the
    /// caller can report them.
    pub async fn join_rooms(
        &mut self,
        rooms: &[MucConfig],
        nick: &str,
        history: HistoryPolicy,
        policy: JoinFailurePolicy,
    ) -> Result<Vec<RelayError>, RelayError> {
        let mut skipped = Vec::new();
        debug!(count = rooms.len(), nick, "joining rooms");

        for room in rooms {
            match self.join_room(room, nick, history).await {
                Ok(()) => {}
                Err(err) if policy == JoinFailurePolicy::Skip => {
                    warn!(room = %room.jid, error = %err, "skipping room");
                    skipped.push(err);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(skipped)
    }

    /// Best-effort close, for sessions that never reach the relay phase.
    pub async fn close(&self) {
        close_transport(self.transport.as_ref()).await;
    }

    /// Ends the startup phase; the room list is fixed from here on.
    pub fn freeze(self) -> ActiveSession<T> {
        ActiveSession {
            transport: self.transport,
            rooms: self.rooms.0.into(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

pub struct ActiveSession<T> {
    transport: Arc<T>,
    rooms: Arc<[String]>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for ActiveSession<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            rooms: Arc::clone(&self.rooms),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T: Transport> ActiveSession<T> {
    pub fn rooms(&self) -> &[String] {
        &self.rooms
    }

    /// Fire-and-forget send; no delivery receipt is awaited.
    pub async fn send(
        &self,
        to: &str,
        delivery: Delivery,
        text: &str,
        stamp: DateTime<Utc>,
    ) -> Result<(), XmppError> {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = OutgoingMessage {
            to: to.to_string(),
            kind: delivery.message_type(),
            body: text.to_string(),
            id: format!("relay-{}-{seq}", stamp.timestamp_millis()),
        };
        self.transport.send(Stanza::Message(message)).await
    }

    /// Best-effort close of the outbound stream.
    pub async fn close(&self) {
        close_transport(self.transport.as_ref()).await;
    }
}

async fn close_transport<T: Transport>(transport: &T) {
    if let Err(error) = transport.close().await {
        debug!(%error, "failed to close session cleanly");
    }
}

/// Room nickname: the configured one, else this machine's host name.
pub fn resolve_nickname(configured: Option<&str>) -> Result<String, RelayError> {
    if let Some(nick) = configured.map(str::trim).filter(|nick| !nick.is_empty()) {
        return Ok(nick.to_string());
    }

    let host = hostname::get().map_err(RelayError::Hostname)?;
    Ok(host.to_string_lossy().into_owned())
}
