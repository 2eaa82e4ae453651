use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use xmpp_relay::{
    cli::{Cli, Command},
    config::Config,
    runtime,
};

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Relay(args) => {
            if !args.http {
                bail!("no input mode selected, pass --http");
            }
            let config = Config::load(&args.config)
                .with_context(|| format!("failed to load {}", args.config.display()))?;
            info!(config = %args.config.display(), "starting HTTP relay");
            runtime::run_http_relay(config).await?;
        }
        Command::Wikipedia(args) => {
            info!(room = %args.room, trigger = %args.trigger, "starting command bot");
            runtime::run_command_bot(args.xmpp_config(), &args.trigger, &args.api_url).await?;
        }
    }

    Ok(())
}
