//! Static bot configuration, read once at startup.
//!
//! The relay reads a JSON file shaped like `config.example.json`; the
//! command bot builds the same structure from its CLI flags.

use std::{fmt, fs, path::Path};

use serde::Deserialize;

use crate::{
    error::RelayError,
    xmpp::{Credentials, HistoryPolicy},
};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    pub xmpp: XmppConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpConfig {
    /// Port for `GET /?text=...`; 0 binds an ephemeral port.
    #[serde(default)]
    pub port: u16,
}

#[derive(Clone, Deserialize)]
pub struct XmppConfig {
    /// Bare JID used to log in.
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub resource: String,
    /// Room nickname; the host name is used when empty.
    #[serde(default)]
    pub nick: String,
    /// Direct receivers, addressed one-to-one.
    #[serde(default)]
    pub receivers: Vec<String>,
    #[serde(default)]
    pub mucs: Vec<MucConfig>,
    /// Explicit `host:port` for servers without a matching A record.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub history: HistoryPolicy,
    #[serde(default)]
    pub join_failure: JoinFailurePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MucConfig {
    pub jid: String,
    #[serde(default)]
    pub password: String,
}

/// What to do when one of several rooms cannot be joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinFailurePolicy {
    /// Stop the bot on the first failed join.
    #[default]
    Abort,
    /// Log the failure and keep going with the rooms that worked.
    Skip,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, RelayError> {
        let raw = fs::read_to_string(path).map_err(|source| RelayError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| RelayError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl XmppConfig {
    pub fn credentials(&self) -> Result<Credentials, RelayError> {
        Credentials::new(
            &self.user,
            self.resource.trim(),
            self.password.clone(),
            self.host.clone(),
        )
        .map_err(|err| RelayError::ConfigInvalid(err.to_string()))
    }

    pub fn nick(&self) -> Option<&str> {
        non_empty(&self.nick)
    }
}

impl MucConfig {
    pub fn new(jid: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            password: String::new(),
        }
    }

    pub fn password(&self) -> Option<&str> {
        non_empty(&self.password)
    }
}

impl fmt::Debug for XmppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmppConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("resource", &self.resource)
            .field("nick", &self.nick)
            .field("receivers", &self.receivers)
            .field("mucs", &self.mucs.iter().map(|m| &m.jid).collect::<Vec<_>>())
            .field("host", &self.host)
            .field("history", &self.history)
            .field("join_failure", &self.join_failure)
            .finish()
    }
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|v| !v.is_empty())
}
