use crate::db::UserStats;
use crate::media::{extract_url, FetchedMedia, MediaFetcher, Platform, Quality};
use crate::registry::UserRegistry;
use crate::throttle::{DescriptionPublisher, DescriptionThrottler};
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, ParseMode, User,
};
use teloxide::utils::html;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

/// Everything the update handlers need, injected through the dispatcher.
pub struct BotState {
    pub registry: UserRegistry,
    pub throttler: DescriptionThrottler,
    pub publisher: Arc<dyn DescriptionPublisher>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub pending: PendingLinks,
    pub admins: Vec<i64>,
    pub export_path: PathBuf,
}

/// Last YouTube link per chat, waiting for a quality choice.
#[derive(Debug, Default)]
pub struct PendingLinks {
    links: Mutex<HashMap<ChatId, String>>,
}

impl PendingLinks {
    pub async fn remember(&self, chat_id: ChatId, url: &str) {
        self.links.lock().await.insert(chat_id, url.to_string());
    }

    pub async fn get(&self, chat_id: ChatId) -> Option<String> {
        self.links.lock().await.get(&chat_id).cloned()
    }
}

pub fn schema() -> UpdateHandler<anyhow::Error> {
    dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback))
}

/// Records the user and gives the description throttler a chance to run.
/// The throttler call is spawned so replies never wait on the Bot API.
async fn track_user(state: &Arc<BotState>, user: &User) {
    let user_id = user.id.0 as i64;
    state
        .registry
        .add_user(user_id, Some(&user.first_name), user.username.as_deref())
        .await;

    let state = Arc::clone(state);
    tokio::spawn(async move {
        state
            .throttler
            .maybe_update_description(state.publisher.as_ref())
            .await;
    });
}

/// `/cmd@botname args` -> `/cmd`
fn parse_command(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    if !first.starts_with('/') {
        return None;
    }
    Some(first.split('@').next().unwrap_or(first))
}

fn platform_list() -> String {
    Platform::ALL
        .iter()
        .map(|p| format!("• {}", p.name()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn welcome_text() -> String {
    format!(
        "👋 Welcome to Video Downloader Bot!\n\n\
         Just send me a video link and I'll download it for you!\n\n\
         📱 Supported platforms:\n{}\n\n\
         For YouTube: Choose quality (480p, 720p, 1080p, MP3)\n\
         For other platforms: Auto downloads best quality\n\n\
         Just paste the link!",
        platform_list()
    )
}

fn help_text() -> String {
    format!(
        "👋 Just send me a video link and I'll download it!\n\n📱 Supported platforms:\n{}",
        platform_list()
    )
}

fn unsupported_text() -> String {
    let names: Vec<&str> = Platform::ALL.iter().map(|p| p.name()).collect();
    format!(
        "❌ Please send a valid link from supported platforms!\n\nSupported: {}",
        names.join(", ")
    )
}

fn stats_text(stats: &UserStats) -> String {
    let first = stats
        .first_user_date
        .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "—".to_string());
    format!(
        "📊 Users\n\nTotal: {}\nLast 24h: {}\nFirst user: {}",
        stats.total_users, stats.users_today, first
    )
}

fn quality_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        Quality::CHOICES
            .iter()
            .map(|q| vec![InlineKeyboardButton::callback(q.label(), q.callback_data())]),
    )
}

#[instrument(skip_all)]
pub async fn handle_message(bot: Bot, msg: Message, state: Arc<BotState>) -> Result<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    track_user(&state, user).await;
    let user_id = user.id.0 as i64;

    let Some(text) = msg.text() else {
        bot.send_message(msg.chat.id, help_text()).await?;
        return Ok(());
    };

    match parse_command(text) {
        Some("/start") => {
            bot.send_message(msg.chat.id, welcome_text()).await?;
            return Ok(());
        }
        Some("/stats") if state.admins.contains(&user_id) => {
            let stats = state.registry.get_user_stats().await;
            bot.send_message(msg.chat.id, stats_text(&stats)).await?;
            return Ok(());
        }
        Some("/export") if state.admins.contains(&user_id) => {
            if state.registry.export_users(&state.export_path).await {
                bot.send_document(msg.chat.id, InputFile::file(&state.export_path))
                    .await?;
            } else {
                bot.send_message(msg.chat.id, "❌ Export failed, see logs.")
                    .await?;
            }
            return Ok(());
        }
        _ => {}
    }

    let Some(url) = extract_url(text) else {
        bot.send_message(msg.chat.id, help_text()).await?;
        return Ok(());
    };
    let Some(platform) = Platform::detect(url) else {
        bot.send_message(msg.chat.id, unsupported_text()).await?;
        return Ok(());
    };

    if platform.offers_quality_choice() {
        state.pending.remember(msg.chat.id, url).await;
        bot.send_message(
            msg.chat.id,
            "🎥 Please select the quality you want to download:",
        )
        .reply_markup(quality_keyboard())
        .await?;
        return Ok(());
    }

    let progress = bot
        .send_message(
            msg.chat.id,
            format!(
                "{} Downloading from {}... Please wait!",
                platform.emoji(),
                platform.name()
            ),
        )
        .await?;
    deliver(
        &bot,
        &state,
        msg.chat.id,
        progress.id,
        url,
        platform,
        Quality::Best,
        user_id,
    )
    .await
}

#[instrument(skip_all)]
pub async fn handle_callback(bot: Bot, q: CallbackQuery, state: Arc<BotState>) -> Result<()> {
    track_user(&state, &q.from).await;
    let user_id = q.from.id.0 as i64;

    let quality = q.data.as_deref().and_then(Quality::from_callback_data);
    let target = q.message.as_ref().map(|m| (m.chat().id, m.id()));
    bot.answer_callback_query(q.id.clone()).await?;

    let (Some(quality), Some((chat_id, message_id))) = (quality, target) else {
        return Ok(());
    };

    let Some(url) = state.pending.get(chat_id).await else {
        bot.edit_message_text(
            chat_id,
            message_id,
            "❌ Error: No video URL found. Please send a link again.",
        )
        .await?;
        return Ok(());
    };
    let platform = Platform::detect(&url).unwrap_or(Platform::YouTube);

    bot.edit_message_text(
        chat_id,
        message_id,
        format!("{} Downloading... Please wait!", platform.emoji()),
    )
    .await?;
    deliver(&bot, &state, chat_id, message_id, &url, platform, quality, user_id).await
}

/// Fetch, upload, clean up. Download errors are shown in the progress message
/// rather than propagated.
#[allow(clippy::too_many_arguments)]
async fn deliver(
    bot: &Bot,
    state: &BotState,
    chat_id: ChatId,
    progress_id: MessageId,
    url: &str,
    platform: Platform,
    quality: Quality,
    user_id: i64,
) -> Result<()> {
    let media = match state.fetcher.fetch(url, platform, quality, user_id).await {
        Ok(media) => media,
        Err(err) => {
            warn!(?err, url, "download failed");
            bot.edit_message_text(
                chat_id,
                progress_id,
                format!("❌ Error: {err}\n\nTry another video."),
            )
            .await?;
            return Ok(());
        }
    };

    let _ = bot
        .edit_message_text(chat_id, progress_id, "📤 Uploading to Telegram...")
        .await;
    let upload = upload(bot, chat_id, &media, platform, quality).await;
    media.cleanup().await;

    if let Err(err) = upload {
        error!(?err, "upload failed");
        bot.edit_message_text(
            chat_id,
            progress_id,
            format!("❌ Error: {err}\n\nTry another video."),
        )
        .await?;
        return Ok(());
    }

    let _ = bot.delete_message(chat_id, progress_id).await;
    info!(user_id, platform = platform.name(), quality = quality.as_str(), "delivered");
    bot.send_message(
        chat_id,
        "✅ Done! Send another link to download more videos.",
    )
    .await?;
    Ok(())
}

async fn upload(
    bot: &Bot,
    chat_id: ChatId,
    media: &FetchedMedia,
    platform: Platform,
    quality: Quality,
) -> Result<()> {
    let title = html::escape(&media.title);
    let file = InputFile::file(&media.path);
    if quality.is_audio() {
        bot.send_audio(chat_id, file)
            .caption(format!("🎵 <b>{title}</b>"))
            .parse_mode(ParseMode::Html)
            .await?;
    } else {
        let detail = match quality {
            Quality::Best => format!("📱 From: {}", platform.name()),
            q => format!("📊 Quality: {}", q.label()),
        };
        bot.send_video(chat_id, file)
            .caption(format!("🎬 <b>{title}</b>\n\n{detail}"))
            .parse_mode(ParseMode::Html)
            .await?;
    }
    Ok(())
}
