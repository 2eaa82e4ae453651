//! The relay loop: a small FIFO queue drained by one consumer that fans each
//! message out to every destination.

use chrono::{DateTime, Utc};
use tokio::{select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::RelayError,
    session::{ActiveSession, Delivery, Transport},
};

/// Smooths short bursts only; producers wait when it is full.
pub const QUEUE_CAPACITY: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    text: String,
    stamp: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stamp: Utc::now(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn stamp(&self) -> DateTime<Utc> {
        self.stamp
    }
}

/// Producer handle, shared by the inbound sources.
#[derive(Debug, Clone)]
pub struct RelaySender {
    tx: mpsc::Sender<OutboundMessage>,
}

impl RelaySender {
    /// Queues `text`, waiting for room if the queue is full.
    pub async fn enqueue(&self, text: impl Into<String>) -> Result<(), RelayError> {
        self.tx
            .send(OutboundMessage::new(text))
            .await
            .map_err(|_| RelayError::QueueClosed)
    }
}

#[derive(Debug)]
pub struct RelayReceiver {
    rx: mpsc::Receiver<OutboundMessage>,
}

impl RelayReceiver {
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.rx.recv().await
    }

    /// Closes the queue and drops whatever is still pending, returning how
    /// many messages were discarded.
    pub fn discard_pending(&mut self) -> usize {
        self.rx.close();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}

pub fn queue(capacity: usize) -> (RelaySender, RelayReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (RelaySender { tx }, RelayReceiver { rx })
}

/// Outcome of one fan-out. Sends are independent, so both counters can be
/// non-zero for the same message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
}

/// What a relay run did before it stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub relayed: usize,
    /// Messages still queued when shutdown was requested.
    pub discarded: usize,
}

pub struct Relay<T> {
    session: ActiveSession<T>,
    receivers: Vec<String>,
}

impl<T: Transport> Relay<T> {
    pub fn new(session: ActiveSession<T>, receivers: Vec<String>) -> Self {
        Self { session, receivers }
    }

    /// Direct receivers first, in configured order, then joined rooms in join
    /// order. A failed send is logged and the remaining destinations are
    /// still attempted.
    pub async fn fan_out(&self, message: &OutboundMessage) -> FanoutReport {
        let direct = self.receivers.iter().map(|to| (to, Delivery::Direct));
        let rooms = self.session.rooms().iter().map(|to| (to, Delivery::Room));

        let mut report = FanoutReport::default();
        for (to, delivery) in direct.chain(rooms) {
            match self
                .session
                .send(to, delivery, message.text(), message.stamp())
                .await
            {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    warn!(%to, ?delivery, %error, "failed to relay message");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Drains `queue` until it closes or `shutdown` fires. Shutdown wins over
    /// queued messages, which are then discarded.
    pub async fn run(self, mut queue: RelayReceiver, shutdown: CancellationToken) -> RelayStats {
        let mut stats = RelayStats::default();

        loop {
            select! {
                biased;
                _ = shutdown.cancelled() => {
                    stats.discarded = queue.discard_pending();
                    info!(relayed = stats.relayed, discarded = stats.discarded, "relay stopping");
                    break;
                }
                message = queue.recv() => {
                    let Some(message) = message else {
                        debug!("relay queue closed");
                        break;
                    };
                    let report = self.fan_out(&message).await;
                    debug!(delivered = report.delivered, failed = report.failed, "relayed message");
                    stats.relayed += 1;
                }
            }
        }

        stats
    }
}
