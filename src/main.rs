mod app;
mod archive;
mod cmd;
mod config;
mod error;
mod model;
mod out;
mod shutdown;
mod store;
mod tg;

use clap::Parser;
use error::ArchiveError;
use store::StoreLayout;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tgarchive",
    version,
    about = "Incremental Telegram chat archiver (pure Rust, no TDLib)"
)]
pub struct Cli {
    /// Store directory (default: ~/.tgarchive)
    #[arg(long, global = true, default_value = "~/.tgarchive")]
    pub store: String,

    /// Output mode: text (default), json, or none
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub output: out::OutputMode,

    #[command(subcommand)]
    pub command: cmd::Command,
}

impl Cli {
    pub fn store_dir(&self) -> String {
        let s = &self.store;
        if s.starts_with("~/") {
            if let Some(home) = dirs_home() {
                return format!("{}{}", home, &s[1..]);
            }
        }
        s.clone()
    }

    pub fn layout(&self) -> StoreLayout {
        StoreLayout::new(self.store_dir())
    }
}

fn dirs_home() -> Option<String> {
    std::env::var("HOME").ok()
}

/// Whether an error only reflects a shutdown the user asked for.
fn is_shutdown_noise(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<ArchiveError>() {
        Some(e) => !e.is_fatal(),
        None => true,
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set up global shutdown handler
    let shutdown = shutdown::ShutdownController::new();
    shutdown::set_global(shutdown.clone());

    // First Ctrl+C drains, the second aborts
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        log::info!("Received Ctrl+C, finishing queued work (Ctrl+C again to abort)...");
        shutdown_clone.trigger();
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Received second Ctrl+C, aborting");
            shutdown_clone.abort();
        }
    });

    if let Err(e) = cmd::run(cli).await {
        // Don't report error if we're shutting down gracefully
        if shutdown.is_triggered() && !shutdown.is_aborted() && is_shutdown_noise(&e) {
            std::process::exit(0);
        }
        let msg = format!("{e:#}");
        eprintln!("Error: {msg}");
        std::process::exit(1);
    }
}
