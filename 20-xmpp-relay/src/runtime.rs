//! Task wiring and shutdown.
//!
//! Each bot runs a session task (connect, start the receive loop, join rooms,
//! then drain the relay queue) next to its inbound source. The foreground
//! waits for an interrupt or for any task to fail. On interrupt every task is
//! told to stop through a shared [`CancellationToken`]; pending queue entries
//! are discarded and the stream is closed best-effort.

use std::{future::Future, io, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{net::TcpListener, select, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::{Config, XmppConfig},
    error::RelayError,
    inbound::{
        self, EventHandler, LogEvents,
        command::{CommandHandler, CommandTrigger},
    },
    lookup::WikipediaClient,
    relay::{self, QUEUE_CAPACITY, Relay, RelayReceiver, RelayStats},
    session::{EventSource, Session, Transport, resolve_nickname},
    xmpp,
};

/// How long shutdown waits for the session task to close the stream.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// HTTP variant: `GET /?text=...` fans out to receivers and rooms.
pub async fn run_http_relay(config: Config) -> Result<()> {
    let (queue_tx, queue_rx) = relay::queue(QUEUE_CAPACITY);
    let shutdown = CancellationToken::new();

    let listener = TcpListener::bind(("0.0.0.0", config.http.port))
        .await
        .with_context(|| format!("failed to bind HTTP port {}", config.http.port))?;

    let session = tokio::spawn(run_session(
        config.xmpp,
        queue_rx,
        LogEvents,
        shutdown.clone(),
    ));
    let http = tokio::spawn(inbound::http::serve(listener, queue_tx, shutdown.clone()));

    run_until(session, Some(http), shutdown, interrupted()).await
}

/// Command variant: lookups requested in the room are answered in the room.
pub async fn run_command_bot(xmpp: XmppConfig, trigger: &str, api_url: &str) -> Result<()> {
    let room = xmpp
        .mucs
        .first()
        .map(|muc| muc.jid.clone())
        .ok_or_else(|| anyhow!("the command bot needs a room to watch"))?;
    let nick = resolve_nickname(xmpp.nick())?;

    let (queue_tx, queue_rx) = relay::queue(QUEUE_CAPACITY);
    let shutdown = CancellationToken::new();

    let handler = CommandHandler::new(
        CommandTrigger::new(room, trigger).ignoring_nick(nick),
        WikipediaClient::new(api_url)?,
        queue_tx,
    );

    let session = tokio::spawn(run_session(xmpp, queue_rx, handler, shutdown.clone()));
    run_until(session, None, shutdown, interrupted()).await
}

/// Resolves on SIGINT. A handler that cannot be installed counts as an
/// interrupt.
pub async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
    }
}

async fn run_session<H>(
    xmpp: XmppConfig,
    queue: RelayReceiver,
    handler: H,
    shutdown: CancellationToken,
) -> Result<RelayStats>
where
    H: EventHandler + 'static,
{
    let credentials = xmpp.credentials()?;
    info!(jid = %credentials.jid, "connecting");

    let (sender, receiver) = xmpp::connect(&credentials)
        .await
        .map_err(RelayError::from_connect)?;
    info!(jid = %sender.jid(), "encrypted session established");
    let session = Session::establish(sender)?;

    serve_session(session, receiver, handler, &xmpp, queue, shutdown).await
}

/// Runs an established session: the receive loop, room joins, then the
/// relay until `shutdown` fires or the receive loop fails.
///
/// The stream is closed on every exit path.
pub async fn serve_session<T, S, H>(
    mut session: Session<T>,
    events: S,
    handler: H,
    xmpp: &XmppConfig,
    queue: RelayReceiver,
    shutdown: CancellationToken,
) -> Result<RelayStats>
where
    T: Transport,
    S: EventSource + 'static,
    H: EventHandler + 'static,
{
    let mut receive = tokio::spawn(inbound::receive_loop(events, handler));

    if let Err(err) = join_configured_rooms(&mut session, xmpp).await {
        receive.abort();
        close_within_grace(session.close()).await;
        return Err(err.into());
    }

    let session = session.freeze();
    let relay = Relay::new(session.clone(), xmpp.receivers.clone());

    let outcome = select! {
        stats = relay.run(queue, shutdown) => Ok(stats),
        joined = &mut receive => match flatten(joined, "receive loop") {
            Ok(()) => Err(anyhow!("receive loop ended")),
            Err(error) => Err(error),
        },
    };

    receive.abort();
    close_within_grace(session.close()).await;
    outcome
}

async fn join_configured_rooms<T: Transport>(
    session: &mut Session<T>,
    xmpp: &XmppConfig,
) -> Result<(), RelayError> {
    if xmpp.mucs.is_empty() {
        return Ok(());
    }

    let nick = resolve_nickname(xmpp.nick())?;
    info!(%nick, "joining rooms");
    let skipped = session
        .join_rooms(&xmpp.mucs, &nick, xmpp.history, xmpp.join_failure)
        .await?;
    if !skipped.is_empty() {
        warn!(skipped = skipped.len(), "continuing without some rooms");
    }
    Ok(())
}

async fn close_within_grace(close: impl Future<Output = ()>) {
    if timeout(SHUTDOWN_GRACE, close).await.is_err() {
        warn!("timed out closing the session");
    }
}

/// Waits for `interrupt` or for a task to end.
///
/// An interrupt is a clean exit: the session is cancelled and given
/// [`SHUTDOWN_GRACE`] to close. A task ending on its own is an error.
pub async fn run_until<F>(
    session: JoinHandle<Result<RelayStats>>,
    http: Option<JoinHandle<io::Result<()>>>,
    shutdown: CancellationToken,
    interrupt: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(session);
    let http = async move {
        match http {
            Some(handle) => flatten(handle.await, "HTTP interface"),
            None => std::future::pending().await,
        }
    };

    select! {
        _ = interrupt => {
            info!("received SIGINT, exiting");
            shutdown.cancel();
            match timeout(SHUTDOWN_GRACE, &mut session).await {
                Ok(joined) => match flatten(joined, "session") {
                    Ok(stats) => {
                        info!(relayed = stats.relayed, discarded = stats.discarded, "relay finished");
                    }
                    Err(error) => {
                        warn!(error = %format!("{error:#}"), "session ended with error during shutdown");
                    }
                },
                Err(_) => warn!("session did not stop in time"),
            }
            Ok(())
        }
        joined = &mut session => {
            shutdown.cancel();
            flatten(joined, "session")?;
            Err(anyhow!("session ended unexpectedly"))
        }
        result = http => {
            shutdown.cancel();
            result?;
            Err(anyhow!("HTTP interface stopped unexpectedly"))
        }
    }
}

fn flatten<T, E>(joined: Result<Result<T, E>, tokio::task::JoinError>, task: &str) -> Result<T>
where
    E: Into<anyhow::Error>,
{
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => {
            let error: anyhow::Error = error.into();
            Err(error.context(format!("{task} failed")))
        }
        Err(error) => Err(anyhow::Error::new(error).context(format!("{task} panicked"))),
    }
}
