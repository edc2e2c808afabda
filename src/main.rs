use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use teloxide::prelude::*;
use tg_fetchbot::config;
use tg_fetchbot::handlers::{self, BotState, PendingLinks};
use tg_fetchbot::media::YtDlp;
use tg_fetchbot::registry::UserRegistry;
use tg_fetchbot::throttle::{BotDescriptionPublisher, DescriptionThrottler};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    // Startup-blocking: no registry, no bot.
    let registry = UserRegistry::initialize(&cfg.database_url()).await?;

    let fetcher = YtDlp::new(cfg.downloader.clone(), &cfg.app.download_dir);
    match fetcher.ensure_available().await {
        Ok(version) => info!(%version, "yt-dlp available"),
        Err(err) => warn!(?err, "yt-dlp not available; downloads will fail"),
    }

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let state = Arc::new(BotState {
        registry: registry.clone(),
        throttler: DescriptionThrottler::new(registry, cfg.description_update_interval()),
        publisher: Arc::new(BotDescriptionPublisher::new(bot.clone())),
        fetcher: Arc::new(fetcher),
        pending: PendingLinks::default(),
        admins: cfg.telegram.admin_users.clone(),
        export_path: Path::new(&cfg.app.data_dir).join("users_export.csv"),
    });

    // Timer trigger for the description; handlers also try opportunistically.
    let worker_state = Arc::clone(&state);
    let check_every = cfg.check_interval();
    tokio::spawn(async move {
        loop {
            worker_state
                .throttler
                .maybe_update_description(worker_state.publisher.as_ref())
                .await;
            tokio::time::sleep(check_every).await;
        }
    });

    info!("starting telegram bot");
    Dispatcher::builder(bot, handlers::schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
