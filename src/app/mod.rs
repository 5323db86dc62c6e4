pub mod socket;

use crate::config::ArchiverConfig;
use crate::store::StoreLayout;
use crate::tg::TgClient;
use crate::Cli;
use anyhow::Result;
use grammers_session::updates::UpdatesLike;
use tokio::sync::mpsc;

pub struct App {
    pub tg: TgClient,
    pub layout: StoreLayout,
    pub config: ArchiverConfig,
    pub updates_rx: Option<mpsc::UnboundedReceiver<UpdatesLike>>,
}

impl App {
    pub async fn new(cli: &Cli) -> Result<Self> {
        let app = Self::new_unauthed(cli).await?;
        if !app.tg.is_authorized().await? {
            anyhow::bail!("Session expired or not authenticated. Run `tgarchive auth` first.");
        }
        Ok(app)
    }

    /// Create App without requiring authorization (for auth command).
    pub async fn new_unauthed(cli: &Cli) -> Result<Self> {
        let layout = cli.layout();
        std::fs::create_dir_all(layout.root())?;

        // SqliteSession::open creates the file if it doesn't exist
        let (tg, updates_rx) = TgClient::connect_with_updates(&layout.session_path())?;
        let config = ArchiverConfig::load(layout.root())?;

        Ok(App {
            tg,
            layout,
            config,
            updates_rx: Some(updates_rx),
        })
    }
}
