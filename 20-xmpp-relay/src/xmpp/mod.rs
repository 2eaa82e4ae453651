//! The bot's view of XMPP, backed by `tokio-xmpp`.
//!
//! - [`stanza`] converts between the bot's message types and
//!   `xmpp-parsers` stanzas.
//! - [`client`] owns the `tokio-xmpp` client in a driver task and hands out
//!   a cloneable sender and a receiver.

pub mod client;
pub mod stanza;

use std::time::Duration;

use thiserror::Error;

pub use client::{Credentials, XmppReceiver, XmppSender, connect};
pub use stanza::{
    ChatMessage, Event, HistoryPolicy, MessageType, OutgoingMessage, PresenceUpdate, RoomJoin,
    Stanza,
};

#[derive(Debug, Error)]
pub enum XmppError {
    #[error(transparent)]
    Client(#[from] tokio_xmpp::Error),

    #[error("invalid address {0}")]
    Address(String),

    #[error("room {room} refused the join: {condition}")]
    JoinRefused { room: String, condition: String },

    #[error("stream closed by server")]
    StreamClosed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}
