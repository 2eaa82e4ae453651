use std::{io, path::PathBuf};

use thiserror::Error;
use tokio_xmpp::{Error as ClientError, ProtocolError};

use crate::xmpp::XmppError;

/// Failures surfaced to the lifecycle layer, one variant per kind of fault.
///
/// Whether a variant is fatal is decided by the caller: the runtime
/// terminates on everything except join failures under the `skip` policy.
/// Lookup failures never get here; they are answered in the room.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("could not read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("authentication failed: {0}")]
    Auth(#[source] XmppError),

    #[error("connection failed: {0}")]
    Connection(#[source] XmppError),

    #[error("connection not encrypted: {0}")]
    Encryption(String),

    #[error("could not join room {room}: {source}")]
    Join {
        room: String,
        #[source]
        source: XmppError,
    },

    #[error("could not determine host name for the room nickname: {0}")]
    Hostname(#[source] io::Error),

    #[error("error while receiving from connection: {0}")]
    Receive(#[source] XmppError),

    #[error("outbound queue closed")]
    QueueClosed,
}

impl RelayError {
    /// Sorts a handshake failure into the session establishment kinds.
    pub fn from_connect(err: XmppError) -> Self {
        match err {
            XmppError::Client(ClientError::Protocol(ProtocolError::NoTls))
            | XmppError::Client(ClientError::Tls(_)) => RelayError::Encryption(err.to_string()),
            XmppError::Client(ClientError::Auth(_)) => RelayError::Auth(err),
            other => RelayError::Connection(other),
        }
    }
}
