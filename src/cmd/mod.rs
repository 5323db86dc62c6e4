pub mod archive;
pub mod auth;
pub mod completions;
pub mod runs;
pub mod status;
pub mod version;

use crate::Cli;
use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Authenticate with Telegram
    Auth(auth::AuthArgs),
    /// Archive chats into the store
    Archive(archive::ArchiveArgs),
    /// Show the state of a running archive
    Status,
    /// Ask a running archive to stop
    Stop(status::StopArgs),
    /// List past archive runs
    Runs(runs::RunsArgs),
    /// Show version info
    Version,
    /// Generate shell completions
    Completions {
        /// Shell type to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Auth(args) => auth::run(&cli, args).await,
        Command::Archive(args) => archive::run(&cli, args).await,
        Command::Status => status::status(&cli).await,
        Command::Stop(args) => status::stop(&cli, args).await,
        Command::Runs(args) => runs::run(&cli, args).await,
        Command::Version => {
            version::run(&cli);
            Ok(())
        }
        Command::Completions { shell } => completions::run(shell),
    }
}
