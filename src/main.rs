use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use chapterclip::cli::{Cli, Command, KeyCommand};
use chapterclip::config::Settings;
use chapterclip::session;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    chapterclip::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(command = ?cli.command, "parsed cli");
    let settings = Settings::from_args(&cli.global).context("resolve settings")?;

    match cli.command {
        Command::Key {
            command: KeyCommand::Set(args),
        } => {
            session::key_set(&settings, &args.key).await?;
        }
        Command::Key {
            command: KeyCommand::Show(args),
        } => {
            session::key_show(&settings, args.reveal).await?;
        }
        Command::Inspect(args) => {
            session::inspect(&settings, &args).await.context("inspect")?;
        }
        Command::Fetch(args) => {
            session::fetch(&settings, &args).await?;
        }
        Command::Copy(args) => {
            session::copy(&settings, &args).await?;
        }
        Command::Relay(args) => {
            session::relay(&settings, args.listen)
                .await
                .context("relay")?;
        }
    }

    Ok(())
}
