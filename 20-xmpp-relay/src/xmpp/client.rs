//! One `tokio-xmpp` client per session, owned by a driver task.
//!
//! The client is a single `Stream` that also sends, so the driver
//! multiplexes outbound commands with inbound events. Outbound traffic
//! reaches it through [`XmppSender`]; inbound stanzas leave through
//! [`XmppReceiver`]. Pings and join answers are handled in the driver and do
//! not surface as events.

use std::{collections::HashMap, fmt, time::Duration};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::timeout,
};
use tokio_xmpp::{
    AsyncClient, AsyncConfig, AsyncServerConfig, Error as ClientError, Event as ClientEvent, Packet,
    parsers::{
        Element, Jid,
        presence::{Presence, Type as PresenceType},
    },
};
use tracing::{debug, trace, warn};

use super::{
    XmppError,
    stanza::{Event, Stanza, join_response, parse_address, ping_reply},
};

/// Bound on TCP connect plus the whole stream negotiation.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a room has to answer a join.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_PORT: u16 = 5222;
const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 64;

#[derive(Clone)]
pub struct Credentials {
    pub jid: Jid,
    pub password: String,
    /// Explicit `host:port`; the JID's domain is looked up when unset.
    pub host: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("jid", &self.jid)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .finish()
    }
}

impl Credentials {
    /// `user` is a bare JID; a non-empty `resource` is requested at bind time.
    pub fn new(
        user: &str,
        resource: &str,
        password: impl Into<String>,
        host: Option<String>,
    ) -> Result<Self, XmppError> {
        let address = match resource {
            "" => user.to_string(),
            resource => format!("{user}/{resource}"),
        };
        Ok(Self {
            jid: parse_address(&address)?,
            password: password.into(),
            host: host.filter(|host| !host.is_empty()),
        })
    }

    fn server(&self) -> AsyncServerConfig {
        match &self.host {
            None => AsyncServerConfig::UseSrv,
            Some(host) => {
                let (host, port) = match host.rsplit_once(':') {
                    Some((host, port)) => (host, port.parse().unwrap_or(DEFAULT_PORT)),
                    None => (host.as_str(), DEFAULT_PORT),
                };
                AsyncServerConfig::Manual {
                    host: host.to_string(),
                    port,
                }
            }
        }
    }
}

enum Command {
    Send {
        element: Element,
        done: oneshot::Sender<Result<(), XmppError>>,
    },
    Join {
        room: String,
        element: Element,
        done: oneshot::Sender<Result<(), XmppError>>,
    },
    Close {
        done: oneshot::Sender<Result<(), XmppError>>,
    },
}

/// Write side of an established session. Cloning shares the driver.
#[derive(Clone)]
pub struct XmppSender {
    commands: mpsc::Sender<Command>,
    jid: Jid,
}

impl XmppSender {
    /// Full JID assigned by the server during resource binding.
    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    /// Always true: the client negotiates STARTTLS and refuses servers that
    /// do not offer it.
    pub fn is_encrypted(&self) -> bool {
        true
    }

    /// Writes `stanza`. Joins wait for the room's self-presence or error.
    pub async fn send(&self, stanza: Stanza) -> Result<(), XmppError> {
        let element = stanza.to_element()?;
        match stanza {
            Stanza::Message(_) => self.request(|done| Command::Send { element, done }).await,
            Stanza::Join(join) => {
                let room = join.room;
                let answer = self.request(|done| Command::Join {
                    room: room.clone(),
                    element,
                    done,
                });
                timeout(JOIN_TIMEOUT, answer)
                    .await
                    .map_err(|_| XmppError::Timeout(JOIN_TIMEOUT))?
            }
        }
    }

    /// Sends the closing stream tag and stops the driver.
    pub async fn close(&self) -> Result<(), XmppError> {
        self.request(|done| Command::Close { done }).await
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<(), XmppError>>) -> Command,
    ) -> Result<(), XmppError> {
        let (done, answer) = oneshot::channel();
        self.commands
            .send(command(done))
            .await
            .map_err(|_| XmppError::StreamClosed)?;
        answer.await.map_err(|_| XmppError::StreamClosed)?
    }
}

/// Read side of an established session.
pub struct XmppReceiver {
    events: mpsc::Receiver<Result<Event, XmppError>>,
}

impl XmppReceiver {
    /// Next inbound event, or `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Result<Option<Event>, XmppError> {
        self.events.recv().await.transpose()
    }
}

/// Opens an encrypted, authenticated session and sends initial presence.
pub async fn connect(credentials: &Credentials) -> Result<(XmppSender, XmppReceiver), XmppError> {
    let mut client = AsyncClient::new_with_config(AsyncConfig {
        jid: credentials.jid.clone(),
        password: credentials.password.clone(),
        server: credentials.server(),
    });
    client.set_reconnect(false);

    let jid = timeout(CONNECT_TIMEOUT, online(&mut client))
        .await
        .map_err(|_| XmppError::Timeout(CONNECT_TIMEOUT))??;
    debug!(%jid, "resource bound");

    client
        .send(Packet::Stanza(Presence::new(PresenceType::None).into()))
        .await?;

    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(Driver::new(client, commands_rx, events_tx).run());

    Ok((
        XmppSender {
            commands: commands_tx,
            jid,
        },
        XmppReceiver { events: events_rx },
    ))
}

/// Connection side of the client the driver needs: events in, packets out.
trait ClientStream:
    Stream<Item = ClientEvent> + Sink<Packet, Error = ClientError> + Unpin + Send + 'static
{
}

impl<C> ClientStream for C where
    C: Stream<Item = ClientEvent> + Sink<Packet, Error = ClientError> + Unpin + Send + 'static
{
}

async fn online<C: ClientStream>(client: &mut C) -> Result<Jid, XmppError> {
    while let Some(event) = client.next().await {
        match event {
            ClientEvent::Online { bound_jid, .. } => return Ok(bound_jid),
            ClientEvent::Disconnected(err) => return Err(err.into()),
            ClientEvent::Stanza(stanza) => trace!(name = stanza.name(), "stanza before online"),
        }
    }
    Err(XmppError::StreamClosed)
}

enum Step {
    Command(Option<Command>),
    Inbound(Option<ClientEvent>),
}

struct Driver<C> {
    client: C,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<Result<Event, XmppError>>,
    pending_joins: HashMap<String, oneshot::Sender<Result<(), XmppError>>>,
}

impl<C: ClientStream> Driver<C> {
    fn new(
        client: C,
        commands: mpsc::Receiver<Command>,
        events: mpsc::Sender<Result<Event, XmppError>>,
    ) -> Self {
        Self {
            client,
            commands,
            events,
            pending_joins: HashMap::new(),
        }
    }

    async fn run(mut self) {
        loop {
            let step = select! {
                command = self.commands.recv() => Step::Command(command),
                event = self.client.next() => Step::Inbound(event),
            };

            let keep_going = match step {
                Step::Command(Some(command)) => self.execute(command).await,
                Step::Command(None) => {
                    self.end_stream().await.ok();
                    false
                }
                Step::Inbound(Some(event)) => self.dispatch(event).await,
                Step::Inbound(None) => false,
            };
            if !keep_going {
                break;
            }
        }

        for (room, done) in self.pending_joins.drain() {
            debug!(%room, "session ended before the room answered");
            let _ = done.send(Err(XmppError::StreamClosed));
        }
    }

    async fn execute(&mut self, command: Command) -> bool {
        match command {
            Command::Send { element, done } => {
                let result = self.client.send(Packet::Stanza(element)).await.map_err(Into::into);
                let _ = done.send(result);
                true
            }
            Command::Join {
                room,
                element,
                done,
            } => {
                match self.client.send(Packet::Stanza(element)).await {
                    Ok(()) => {
                        self.pending_joins.insert(room, done);
                    }
                    Err(err) => {
                        let _ = done.send(Err(err.into()));
                    }
                }
                true
            }
            Command::Close { done } => {
                let _ = done.send(self.end_stream().await);
                false
            }
        }
    }

    async fn dispatch(&mut self, event: ClientEvent) -> bool {
        let stanza = match event {
            ClientEvent::Stanza(stanza) => stanza,
            ClientEvent::Disconnected(err) => {
                let _ = self.events.send(Err(err.into())).await;
                return false;
            }
            ClientEvent::Online { .. } => return true,
        };

        if let Some(reply) = ping_reply(&stanza) {
            trace!(from = stanza.attr("from"), "answering ping");
            if let Err(error) = self.client.send(Packet::Stanza(reply)).await {
                warn!(%error, "failed to answer ping");
            }
            return true;
        }

        self.settle_join(&stanza);
        self.events.send(Ok(Event::classify(stanza))).await.is_ok()
    }

    fn settle_join(&mut self, stanza: &Element) {
        let answered = self
            .pending_joins
            .keys()
            .find_map(|room| join_response(stanza, room).map(|answer| (room.clone(), answer)));

        if let Some((room, answer)) = answered {
            if let Some(done) = self.pending_joins.remove(&room) {
                let result = answer.map_err(|condition| XmppError::JoinRefused { room, condition });
                let _ = done.send(result);
            }
        }
    }

    async fn end_stream(&mut self) -> Result<(), XmppError> {
        self.client.send(Packet::StreamEnd).await?;
        self.client.close().await.map_err(Into::into)
    }
}
