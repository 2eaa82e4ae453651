//! Small XMPP bots that forward text into one-to-one chats and group chat
//! rooms.
//!
//! Two variants share one session layer. The HTTP relay takes text from
//! `GET /?text=...` and fans it out to every configured receiver and room.
//! The command bot watches one room for `!wikipedia <title>` and answers
//! with the article's opening sentences.
//!
//! - [`xmpp`] wraps the `tokio-xmpp` client with mandatory STARTTLS and
//!   joins that wait for the room's answer.
//! - [`session`] enforces encryption, joins rooms and sends messages.
//! - [`relay`] owns the bounded outbound queue and the fan-out loop.
//! - [`inbound`] holds the queue producers: the HTTP endpoint and the
//!   command handler.
//! - [`lookup`] queries the MediaWiki API.
//! - [`runtime`] wires the tasks together and handles SIGINT.
//! - [`config`], [`cli`] and [`error`] are the supporting pieces.

pub mod cli;
pub mod config;
pub mod error;
pub mod inbound;
pub mod lookup;
pub mod relay;
pub mod runtime;
pub mod session;
pub mod xmpp;
