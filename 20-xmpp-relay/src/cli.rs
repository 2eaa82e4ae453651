use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{
    config::{JoinFailurePolicy, MucConfig, XmppConfig},
    inbound::command::DEFAULT_TRIGGER,
    lookup::DEFAULT_API_URL,
    xmpp::HistoryPolicy,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log protocol traffic and inbound stanzas.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Relay text received over HTTP to the configured receivers and rooms.
    Relay(RelayArgs),
    /// Answer `!wikipedia <title>` in a room with the article's summary.
    Wikipedia(WikipediaArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Enable the HTTP input interface.
    #[arg(long)]
    pub http: bool,

    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct WikipediaArgs {
    /// Bare JID to log in as.
    #[arg(long)]
    pub username: String,

    #[arg(long)]
    pub password: String,

    /// Room to watch for commands.
    #[arg(long)]
    pub room: String,

    #[arg(long, default_value = "wikibot")]
    pub nick: String,

    #[arg(long, default_value = "wikibot")]
    pub resource: String,

    /// Server address as `host:port`, when it differs from the JID's domain.
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long, default_value = DEFAULT_TRIGGER)]
    pub trigger: String,

    /// MediaWiki API endpoint.
    #[arg(long, default_value = DEFAULT_API_URL)]
    pub api_url: String,
}

impl WikipediaArgs {
    /// One room, no direct receivers, and no replayed room history.
    pub fn xmpp_config(&self) -> XmppConfig {
        XmppConfig {
            user: self.username.clone(),
            password: self.password.clone(),
            resource: self.resource.clone(),
            nick: self.nick.clone(),
            receivers: Vec::new(),
            mucs: vec![MucConfig::new(&self.room)],
            host: self.host.clone(),
            history: HistoryPolicy::Seconds(0),
            join_failure: JoinFailurePolicy::Abort,
        }
    }
}
