use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use xmpp_relay::{
    config::{Config, XmppConfig},
    error::RelayError,
    inbound::LogEvents,
    relay::{QUEUE_CAPACITY, RelayStats, queue},
    runtime::{run_until, serve_session},
    session::{EventSource, Session, Transport},
    xmpp::{Event, Stanza, XmppError},
};

const WAIT: Duration = Duration::from_secs(3);

/// Records stanzas and whether the stream was closed. Joins to `refusing`
/// rooms fail.
#[derive(Clone, Default)]
struct TrackingTransport {
    sent: Arc<Mutex<Vec<Stanza>>>,
    closed: Arc<AtomicBool>,
    refusing: Vec<String>,
}

impl TrackingTransport {
    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn messages(&self) -> usize {
        self.sent
            .lock()
            .expect("lock")
            .iter()
            .filter(|stanza| matches!(stanza, Stanza::Message(_)))
            .count()
    }
}

#[async_trait]
impl Transport for TrackingTransport {
    fn is_encrypted(&self) -> bool {
        true
    }

    async fn send(&self, stanza: Stanza) -> Result<(), XmppError> {
        if let Stanza::Join(join) = &stanza {
            if self.refusing.contains(&join.room) {
                return Err(XmppError::JoinRefused {
                    room: join.room.clone(),
                    condition: "not-authorized".to_string(),
                });
            }
        }
        self.sent.lock().expect("lock").push(stanza);
        Ok(())
    }

    async fn close(&self) -> Result<(), XmppError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// An inbound stream that stays open and silent.
struct Quiet;

#[async_trait]
impl EventSource for Quiet {
    async fn next_event(&mut self) -> Result<Option<Event>, XmppError> {
        std::future::pending().await
    }
}

/// An inbound stream the server has already closed.
struct Closed;

#[async_trait]
impl EventSource for Closed {
    async fn next_event(&mut self) -> Result<Option<Event>, XmppError> {
        Ok(None)
    }
}

fn xmpp_config(rooms: &[&str]) -> Result<XmppConfig> {
    let mucs: Vec<_> = rooms
        .iter()
        .map(|room| serde_json::json!({ "jid": room }))
        .collect();
    let raw = serde_json::json!({
        "xmpp": {
            "user": "relay@example.org",
            "password": "secret",
            "nick": "relay",
            "receivers": ["a@example.org"],
            "mucs": mucs,
        }
    });
    Ok(Config::parse(&raw.to_string())?.xmpp)
}

fn is_receive_failure(error: &anyhow::Error) -> bool {
    error
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<RelayError>(), Some(RelayError::Receive(_))))
}

#[tokio::test]
async fn shutdown_discards_queued_messages_and_closes() -> Result<()> {
    let transport = TrackingTransport::default();
    let session = Session::establish(transport.clone())?;
    let config = xmpp_config(&[])?;

    let (tx, rx) = queue(QUEUE_CAPACITY);
    for text in ["one", "two", "three"] {
        tx.enqueue(text).await?;
    }
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let stats =
        timeout(WAIT, serve_session(session, Quiet, LogEvents, &config, rx, shutdown)).await??;

    assert_eq!(
        stats,
        RelayStats {
            relayed: 0,
            discarded: 3
        }
    );
    assert_eq!(transport.messages(), 0);
    assert!(transport.closed());
    Ok(())
}

#[tokio::test]
async fn interrupt_is_a_clean_exit() -> Result<()> {
    let transport = TrackingTransport::default();
    let session = Session::establish(transport.clone())?;
    let config = xmpp_config(&[])?;

    let (_tx, rx) = queue(QUEUE_CAPACITY);
    let shutdown = CancellationToken::new();
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            serve_session(session, Quiet, LogEvents, &config, rx, shutdown).await
        })
    };

    timeout(WAIT, run_until(task, None, shutdown.clone(), async {})).await??;

    assert!(shutdown.is_cancelled());
    assert!(transport.closed());
    Ok(())
}

#[tokio::test]
async fn closed_stream_ends_the_bot_with_an_error() -> Result<()> {
    let transport = TrackingTransport::default();
    let session = Session::establish(transport.clone())?;
    let config = xmpp_config(&[])?;

    let (_tx, rx) = queue(QUEUE_CAPACITY);
    let shutdown = CancellationToken::new();
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            serve_session(session, Closed, LogEvents, &config, rx, shutdown).await
        })
    };

    let result = timeout(
        WAIT,
        run_until(task, None, shutdown.clone(), std::future::pending()),
    )
    .await?;

    let error = result.expect_err("a closed stream is fatal");
    assert!(is_receive_failure(&error), "unexpected error: {error:#}");
    assert!(shutdown.is_cancelled());
    assert!(transport.closed());
    Ok(())
}

#[tokio::test]
async fn refused_join_still_closes_the_stream() -> Result<()> {
    let transport = TrackingTransport {
        refusing: vec!["locked@muc.example.org".to_string()],
        ..TrackingTransport::default()
    };
    let session = Session::establish(transport.clone())?;
    let config = xmpp_config(&["locked@muc.example.org"])?;

    let (_tx, rx) = queue(QUEUE_CAPACITY);
    let result = timeout(
        WAIT,
        serve_session(
            session,
            Quiet,
            LogEvents,
            &config,
            rx,
            CancellationToken::new(),
        ),
    )
    .await?;

    let error = result.expect_err("abort policy stops on the refused room");
    assert!(
        matches!(
            error.downcast_ref::<RelayError>(),
            Some(RelayError::Join { room, .. }) if room == "locked@muc.example.org"
        ),
        "unexpected error: {error:#}"
    );
    assert!(transport.closed());
    Ok(())
}
