//! Producers for the relay queue.
//!
//! [`http`] takes text from `GET /?text=...`. [`command`] watches room
//! traffic for a trigger and answers with an encyclopedia lookup. Both
//! variants run [`receive_loop`] so the session's inbound stream is always
//! drained.

pub mod command;
pub mod http;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    error::RelayError,
    session::EventSource,
    xmpp::{Event, XmppError},
};

#[async_trait]
pub trait EventHandler: Send {
    async fn handle(&mut self, event: Event) -> Result<(), RelayError>;
}

/// Handler for the HTTP relay: inbound traffic is only logged.
#[derive(Debug, Default)]
pub struct LogEvents;

#[async_trait]
impl EventHandler for LogEvents {
    async fn handle(&mut self, event: Event) -> Result<(), RelayError> {
        match event {
            Event::Chat(chat) => debug!(from = %chat.from, text = %chat.body, "message"),
            Event::Presence(presence) => {
                debug!(from = %presence.from, show = ?presence.show, "presence")
            }
            Event::Other(name) => debug!(%name, "stanza"),
        }
        Ok(())
    }
}

/// Feeds every inbound event to `handler` for the lifetime of the session.
///
/// Never returns `Ok`: a read error or the server closing the stream ends
/// the session, and there is no reconnect.
pub async fn receive_loop<S, H>(mut source: S, mut handler: H) -> Result<(), RelayError>
where
    S: EventSource,
    H: EventHandler,
{
    loop {
        match source.next_event().await {
            Ok(Some(event)) => handler.handle(event).await?,
            Ok(None) => return Err(RelayError::Receive(XmppError::StreamClosed)),
            Err(err) => return Err(RelayError::Receive(err)),
        }
    }
}
