use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::EventHandler;
use crate::{
    error::RelayError,
    lookup::Lookup,
    relay::RelaySender,
    xmpp::{ChatMessage, Event, MessageType, stanza::is_from},
};

pub const DEFAULT_TRIGGER: &str = "!wikipedia";

/// Recognizes lookup commands posted in one room.
#[derive(Debug, Clone)]
pub struct CommandTrigger {
    room: String,
    token: String,
    own_nick: Option<String>,
}

impl CommandTrigger {
    pub fn new(room: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            token: token.into(),
            own_nick: None,
        }
    }

    /// Ignore the bot's own messages echoed back by the room.
    pub fn ignoring_nick(mut self, nick: impl Into<String>) -> Self {
        self.own_nick = Some(nick.into());
        self
    }

    /// The query following the command token, if `message` is a command
    /// from the watched room.
    pub fn extract_query(&self, message: &ChatMessage) -> Option<String> {
        if message.kind == MessageType::Error || !is_from(&message.from, &self.room) {
            return None;
        }

        if let Some(nick) = &self.own_nick {
            let own = format!("{}/{nick}", self.room);
            if message.from == own {
                return None;
            }
        }

        let query = message.body.strip_prefix(self.token.as_str())?.trim();
        (!query.is_empty()).then(|| query.to_string())
    }
}

/// Answers commands with a `"title: summary"` line queued for the room.
pub struct CommandHandler<L> {
    trigger: CommandTrigger,
    lookup: L,
    queue: RelaySender,
}

impl<L: Lookup> CommandHandler<L> {
    pub fn new(trigger: CommandTrigger, lookup: L, queue: RelaySender) -> Self {
        Self {
            trigger,
            lookup,
            queue,
        }
    }

    async fn answer(&self, query: &str) -> String {
        match self.lookup.lookup(query).await {
            Ok(Some(article)) => article.summary(),
            Ok(None) => format!("{query}: no article found"),
            Err(error) => {
                warn!(query, %error, "lookup failed");
                format!("{query}: lookup failed, try again later")
            }
        }
    }
}

#[async_trait]
impl<L: Lookup> EventHandler for CommandHandler<L> {
    async fn handle(&mut self, event: Event) -> Result<(), RelayError> {
        let Event::Chat(message) = event else {
            return Ok(());
        };
        debug!(from = %message.from, text = %message.body, "message");

        let Some(query) = self.trigger.extract_query(&message) else {
            return Ok(());
        };
        info!(%query, from = %message.from, "lookup requested");

        let reply = self.answer(&query).await;
        self.queue.enqueue(reply).await
    }
}
